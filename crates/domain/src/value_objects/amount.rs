use crate::error::DomainError;
use primitive_types::U256;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest mantissa a `Decimal` can carry (2^96 - 1).
const DECIMAL_MAX_MANTISSA: u128 = u128::MAX >> 32;
const DECIMAL_MAX_SCALE: u32 = 28;

/// A raw amount paired with the decimals of its token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Amount {
    pub raw: U256,
    pub decimals: u8,
}

impl Amount {
    pub fn new(raw: U256, decimals: u8) -> Self {
        Self { raw, decimals }
    }

    /// Parses user-entered decimal text such as `"1.5"`.
    pub fn parse(text: &str, decimals: u8) -> Result<Self, DomainError> {
        Ok(Self::new(parse_units(text, decimals)?, decimals))
    }

    /// Converts a non-negative decimal, truncating digits beyond `decimals`.
    pub fn from_decimal(d: Decimal, decimals: u8) -> Option<Self> {
        if d.is_sign_negative() {
            return None;
        }
        let truncated = d.trunc_with_scale(u32::from(decimals)).normalize();
        parse_units(&truncated.to_string(), decimals)
            .ok()
            .map(|raw| Self::new(raw, decimals))
    }

    /// Lossy conversion for display and advisory valuation.
    ///
    /// Low-order digits are dropped until the value fits a `Decimal`; values
    /// that still do not fit saturate at `Decimal::MAX`.
    pub fn to_decimal(&self) -> Decimal {
        let max = U256::from(DECIMAL_MAX_MANTISSA);
        let mut raw = self.raw;
        let mut scale = u32::from(self.decimals);

        while (raw > max || scale > DECIMAL_MAX_SCALE) && scale > 0 {
            raw /= U256::from(10u8);
            scale -= 1;
        }
        if raw > max {
            return Decimal::MAX;
        }
        Decimal::from_i128_with_scale(raw.as_u128() as i128, scale)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_units(self.raw, self.decimals))
    }
}

/// Converts decimal text into a raw integer amount scaled by `decimals`.
pub fn parse_units(text: &str, decimals: u8) -> Result<U256, DomainError> {
    let invalid = |reason: &str| DomainError::InvalidAmount {
        input: text.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(invalid("empty"));
    }

    let (whole, fraction) = match trimmed.split_once('.') {
        Some((w, f)) => (w, f),
        None => (trimmed, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return Err(invalid("no digits"));
    }
    if !whole.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit()) {
        return Err(invalid("not a non-negative decimal number"));
    }
    if fraction.len() > usize::from(decimals) {
        return Err(invalid("too many fractional digits"));
    }

    let mut digits = String::with_capacity(whole.len() + usize::from(decimals));
    digits.push_str(whole);
    digits.push_str(fraction);
    digits.extend(std::iter::repeat_n('0', usize::from(decimals) - fraction.len()));

    let digits = digits.trim_start_matches('0');
    if digits.is_empty() {
        return Ok(U256::zero());
    }
    U256::from_dec_str(digits).map_err(|_| invalid("exceeds 256 bits"))
}

/// Renders a raw amount as exact decimal text, without trailing zeros.
pub fn format_units(raw: U256, decimals: u8) -> String {
    let digits = raw.to_string();
    let decimals = usize::from(decimals);
    if decimals == 0 {
        return digits;
    }

    let padded = if digits.len() <= decimals {
        format!("{}{}", "0".repeat(decimals - digits.len() + 1), digits)
    } else {
        digits
    };
    let (whole, fraction) = padded.split_at(padded.len() - decimals);
    let fraction = fraction.trim_end_matches('0');
    if fraction.is_empty() {
        whole.to_string()
    } else {
        format!("{whole}.{fraction}")
    }
}

/// Short human-readable rendering used in listings.
pub fn format_compact(value: Decimal) -> String {
    let thousand = Decimal::from(1_000);
    let million = Decimal::from(1_000_000);

    if value.is_zero() {
        "0".to_string()
    } else if value < Decimal::new(1, 4) {
        "<0.0001".to_string()
    } else if value < Decimal::ONE {
        format!("{:.6}", value)
    } else if value < thousand {
        format!("{:.4}", value)
    } else if value < million {
        format!("{:.2}K", value / thousand)
    } else {
        format!("{:.2}M", value / million)
    }
}
