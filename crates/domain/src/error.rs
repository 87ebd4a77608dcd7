use thiserror::Error;

/// Validation failures raised before any ledger call is made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// Input is not a 20-byte hex contract address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    /// Both sides of a pair or path resolve to the same token.
    #[error("identical tokens")]
    IdenticalTokens,
    /// Path is shorter than two hops or repeats a token.
    #[error("invalid trade path: {0}")]
    InvalidPath(String),
    /// Decimal text could not be converted to a raw amount.
    #[error("invalid amount '{input}': {reason}")]
    InvalidAmount { input: String, reason: String },
    /// Slippage tolerance outside the configured bounds.
    #[error("slippage {value}% outside [{min}%, {max}%]")]
    SlippageOutOfRange {
        value: String,
        min: String,
        max: String,
    },
    /// Slippage bounds that are inverted or exceed 100%.
    #[error("invalid slippage bounds [{min_bps}, {max_bps}] bps")]
    InvalidSlippageBounds { min_bps: u32, max_bps: u32 },
    /// Arithmetic overflow on 256-bit amounts.
    #[error("arithmetic overflow")]
    Overflow,
}
