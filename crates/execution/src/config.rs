//! Client configuration, read from the environment with built-in defaults.

use crate::error::ClientError;
use cpamm_domain::{SlippageBounds, SlippageTolerance};
use cpamm_protocols::ContractAddresses;
use cpamm_protocols::contracts::ANVIL_CHAIN_ID;
use cpamm_protocols::json_rpc::DEFAULT_RPC_URL;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Trading parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradingConfig {
    /// Default slippage tolerance in basis points.
    pub default_slippage_bps: u32,
    /// Accepted slippage range.
    pub slippage_bounds: SlippageBounds,
    /// Minutes added to the submission time to form the deadline.
    pub deadline_minutes: u32,
    /// Quiet period before a quote request is issued.
    pub quote_debounce: Duration,
    /// How long a submitted transaction is watched before it is reported
    /// as unconfirmed.
    pub confirmation_timeout: Duration,
    /// Delay between receipt polls.
    pub receipt_poll_interval: Duration,
    /// Pools fetched per page.
    pub page_size: usize,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            default_slippage_bps: 50, // 0.5%
            slippage_bounds: SlippageBounds::default(),
            deadline_minutes: 20,
            quote_debounce: Duration::from_millis(300),
            confirmation_timeout: Duration::from_secs(120),
            receipt_poll_interval: Duration::from_secs(1),
            page_size: 10,
        }
    }
}

/// Parses a percentage such as `"0.5"` into basis points.
fn percent_to_bps(key: &str, text: &str) -> Result<u32, ClientError> {
    let invalid = || ClientError::InvalidSlippage(format!("{key}={text}"));
    let percent = Decimal::from_str(text.trim()).map_err(|_| invalid())?;
    let bps = percent * Decimal::from(100);
    if bps.is_sign_negative() || bps.fract() != Decimal::ZERO {
        return Err(invalid());
    }
    bps.to_u32().ok_or_else(invalid)
}

impl TradingConfig {
    /// Defaults overridden by `CPAMM_DEFAULT_SLIPPAGE`, `CPAMM_MIN_SLIPPAGE`,
    /// `CPAMM_MAX_SLIPPAGE` (percent) and `CPAMM_DEADLINE_MINUTES`.
    pub fn from_env() -> Result<Self, ClientError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ClientError> {
        let mut config = Self::default();
        let mut bounds = config.slippage_bounds;
        if let Some(v) = lookup("CPAMM_MIN_SLIPPAGE") {
            bounds.min_bps = percent_to_bps("CPAMM_MIN_SLIPPAGE", &v)?;
        }
        if let Some(v) = lookup("CPAMM_MAX_SLIPPAGE") {
            bounds.max_bps = percent_to_bps("CPAMM_MAX_SLIPPAGE", &v)?;
        }
        config.slippage_bounds = SlippageBounds::new(bounds.min_bps, bounds.max_bps)?;
        if let Some(v) = lookup("CPAMM_DEFAULT_SLIPPAGE") {
            config.default_slippage_bps = percent_to_bps("CPAMM_DEFAULT_SLIPPAGE", &v)?;
        }
        if let Some(v) = lookup("CPAMM_DEADLINE_MINUTES") {
            config.deadline_minutes = v
                .trim()
                .parse()
                .map_err(|_| ClientError::InvalidAmount(format!("CPAMM_DEADLINE_MINUTES={v}")))?;
        }
        config.default_slippage()?;
        Ok(config)
    }

    /// The default tolerance, validated against the bounds.
    pub fn default_slippage(&self) -> Result<SlippageTolerance, ClientError> {
        self.slippage(self.default_slippage_bps)
    }

    pub fn slippage(&self, bps: u32) -> Result<SlippageTolerance, ClientError> {
        Ok(SlippageTolerance::from_bps(bps, &self.slippage_bounds)?)
    }
}

/// Node endpoint, deployment and local store settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    pub contracts: ContractAddresses,
    /// Custom token file; `None` keeps custom tokens in memory only.
    pub store_path: Option<PathBuf>,
    pub trading: TradingConfig,
}

impl ClientConfig {
    /// Reads `CPAMM_RPC_URL`, `CPAMM_CHAIN_ID`, `CPAMM_STORE` and the contract
    /// and trading overrides.
    pub fn from_env() -> Result<Self, ClientError> {
        let chain_id = match std::env::var("CPAMM_CHAIN_ID") {
            Ok(v) => v
                .trim()
                .parse()
                .map_err(|_| ClientError::InvalidAmount(format!("CPAMM_CHAIN_ID={v}")))?,
            Err(_) => ANVIL_CHAIN_ID,
        };
        Ok(Self {
            rpc_url: std::env::var("CPAMM_RPC_URL").unwrap_or_else(|_| DEFAULT_RPC_URL.to_string()),
            chain_id,
            contracts: ContractAddresses::from_env(chain_id)?,
            store_path: std::env::var("CPAMM_STORE").ok().map(PathBuf::from),
            trading: TradingConfig::from_env()?,
        })
    }
}
