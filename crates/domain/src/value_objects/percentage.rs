use crate::error::DomainError;
use crate::math::constant_product::mul_div_floor;
use primitive_types::U256;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

const BPS_DENOMINATOR: u32 = 10_000;

/// Inclusive slippage bounds, in basis points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlippageBounds {
    /// Smallest accepted tolerance.
    pub min_bps: u32,
    /// Largest accepted tolerance, at most 10 000 (100%).
    pub max_bps: u32,
}

impl SlippageBounds {
    /// Bounds with `min_bps <= max_bps <= 10_000`.
    pub fn new(min_bps: u32, max_bps: u32) -> Result<Self, DomainError> {
        if min_bps > max_bps || max_bps > BPS_DENOMINATOR {
            return Err(DomainError::InvalidSlippageBounds { min_bps, max_bps });
        }
        Ok(Self { min_bps, max_bps })
    }
}

impl Default for SlippageBounds {
    fn default() -> Self {
        Self {
            min_bps: 1,    // 0.01%
            max_bps: 1000, // 10%
        }
    }
}

/// Advisory band for a chosen tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlippageWarning {
    None,
    /// Below 0.1%: the transaction may fail on ordinary price movement.
    Low,
    /// Above 5%: the trade may be front-run.
    High,
    /// Above 15%.
    Extreme,
}

/// Maximum accepted deviation between quoted and executed output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlippageTolerance {
    bps: u32,
}

impl SlippageTolerance {
    /// Builds a tolerance from basis points, checked against `bounds`.
    pub fn from_bps(bps: u32, bounds: &SlippageBounds) -> Result<Self, DomainError> {
        if bps < bounds.min_bps || bps > bounds.max_bps || bps > BPS_DENOMINATOR {
            return Err(DomainError::SlippageOutOfRange {
                value: Self::bps_to_percent(bps).to_string(),
                min: Self::bps_to_percent(bounds.min_bps).to_string(),
                max: Self::bps_to_percent(bounds.max_bps).to_string(),
            });
        }
        Ok(Self { bps })
    }

    /// Builds a tolerance from a percentage such as `0.5`.
    ///
    /// The percentage must be representable in whole basis points.
    pub fn from_percent(percent: Decimal, bounds: &SlippageBounds) -> Result<Self, DomainError> {
        let out_of_range = || DomainError::SlippageOutOfRange {
            value: percent.to_string(),
            min: Self::bps_to_percent(bounds.min_bps).to_string(),
            max: Self::bps_to_percent(bounds.max_bps).to_string(),
        };

        let scaled = percent * Decimal::from(100);
        if percent.is_sign_negative() || !scaled.fract().is_zero() {
            return Err(out_of_range());
        }
        let bps = scaled.to_u32().ok_or_else(out_of_range)?;
        Self::from_bps(bps, bounds)
    }

    /// Tolerance in basis points.
    pub fn bps(&self) -> u32 {
        self.bps
    }

    /// Tolerance as a percentage, e.g. `0.5`.
    pub fn as_percent(&self) -> Decimal {
        Self::bps_to_percent(self.bps)
    }

    /// `floor(quoted * (100 - s) / 100)`, computed on raw integer units.
    pub fn minimum_output(&self, quoted: U256) -> U256 {
        let keep = BPS_DENOMINATOR.checked_sub(self.bps).unwrap_or(0);
        // keep <= 10_000, so the ratio is <= 1 and cannot overflow
        mul_div_floor(quoted, U256::from(keep), U256::from(BPS_DENOMINATOR)).unwrap_or(quoted)
    }

    pub fn warning(&self) -> SlippageWarning {
        match self.bps {
            0..10 => SlippageWarning::Low,
            10..=500 => SlippageWarning::None,
            501..=1500 => SlippageWarning::High,
            _ => SlippageWarning::Extreme,
        }
    }

    fn bps_to_percent(bps: u32) -> Decimal {
        Decimal::from(bps) / Decimal::from(100)
    }
}
