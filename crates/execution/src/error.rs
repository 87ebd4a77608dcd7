//! Client error taxonomy and revert classification.

use cpamm_data::StoreError;
use cpamm_domain::DomainError;
use cpamm_protocols::NodeError;
use thiserror::Error;

/// Errors surfaced by the resolver, registry, quote engine and orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    /// Token metadata could not be read. Never cached.
    #[error("token metadata unavailable for {0}")]
    Unresolved(String),
    #[error("no route: {reason}")]
    NoRoute { reason: String },
    #[error("amount must be greater than zero")]
    ZeroAmount,
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error("insufficient allowance: {0}")]
    InsufficientAllowance(String),
    #[error("insufficient balance: {0}")]
    InsufficientBalance(String),
    #[error("price moved beyond slippage tolerance: {0}")]
    SlippageExceeded(String),
    #[error("transaction deadline expired")]
    DeadlineExpired,
    #[error("identical tokens")]
    IdenticalTokens,
    #[error("invalid trade path: {0}")]
    InvalidPath(String),
    #[error("invalid slippage: {0}")]
    InvalidSlippage(String),
    #[error("{0} already pending")]
    AlreadyPending(String),
    #[error("no account connected")]
    NoAccount,
    #[error("node unavailable: {0}")]
    NodeUnavailable(String),
    /// The transaction was not seen in a block within the monitoring window.
    /// It may still confirm later.
    #[error("transaction {hash} not confirmed in time")]
    Timeout { hash: String },
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("transaction reverted: {reason}")]
    Reverted { reason: String },
    #[error("token {0} is already listed")]
    DuplicateToken(String),
    #[error("local store failed: {0}")]
    Store(String),
}

/// Maps a node-reported revert reason onto the taxonomy. Unknown reasons are
/// preserved verbatim.
pub fn classify_revert(reason: &str) -> ClientError {
    let upper = reason.to_uppercase();
    let lower = reason.to_lowercase();
    if upper.contains("INSUFFICIENT_OUTPUT_AMOUNT")
        || upper.contains("INSUFFICIENT_A_AMOUNT")
        || upper.contains("INSUFFICIENT_B_AMOUNT")
    {
        ClientError::SlippageExceeded(reason.to_string())
    } else if upper.contains("EXPIRED") {
        ClientError::DeadlineExpired
    } else if upper.contains("TRANSFER_FROM_FAILED") || lower.contains("insufficient allowance") {
        ClientError::InsufficientAllowance(reason.to_string())
    } else if lower.contains("insufficient balance")
        || lower.contains("insufficient funds")
        || lower.contains("exceeds balance")
    {
        ClientError::InsufficientBalance(reason.to_string())
    } else if lower.contains("user rejected") || lower.contains("denied") {
        ClientError::Rejected(reason.to_string())
    } else {
        ClientError::Reverted {
            reason: reason.to_string(),
        }
    }
}

impl From<NodeError> for ClientError {
    fn from(err: NodeError) -> Self {
        match err {
            NodeError::Unavailable(msg) => Self::NodeUnavailable(msg),
            NodeError::Reverted(reason) => classify_revert(&reason),
            NodeError::Rejected(msg) => Self::Rejected(msg),
            NodeError::Decode(msg) => Self::Reverted { reason: msg },
        }
    }
}

impl From<DomainError> for ClientError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::InvalidAddress(input) => Self::InvalidAddress(input),
            DomainError::IdenticalTokens => Self::IdenticalTokens,
            DomainError::InvalidPath(msg) => Self::InvalidPath(msg),
            DomainError::SlippageOutOfRange { .. } | DomainError::InvalidSlippageBounds { .. } => {
                Self::InvalidSlippage(err.to_string())
            }
            DomainError::InvalidAmount { .. } | DomainError::Overflow => {
                Self::InvalidAmount(err.to_string())
            }
        }
    }
}

impl From<StoreError> for ClientError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(address) => Self::DuplicateToken(address),
            other => Self::Store(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_router_reverts() {
        assert!(matches!(
            classify_revert("UniswapV2Router: INSUFFICIENT_OUTPUT_AMOUNT"),
            ClientError::SlippageExceeded(_)
        ));
        assert!(matches!(
            classify_revert("UniswapV2Router: INSUFFICIENT_B_AMOUNT"),
            ClientError::SlippageExceeded(_)
        ));
        assert_eq!(
            classify_revert("UniswapV2Router: EXPIRED"),
            ClientError::DeadlineExpired
        );
        assert!(matches!(
            classify_revert("TransferHelper: TRANSFER_FROM_FAILED"),
            ClientError::InsufficientAllowance(_)
        ));
        assert!(matches!(
            classify_revert("ERC20: transfer amount exceeds balance"),
            ClientError::InsufficientBalance(_)
        ));
    }

    #[test]
    fn test_unknown_reason_is_preserved() {
        assert_eq!(
            classify_revert("UniswapV2: K"),
            ClientError::Reverted {
                reason: "UniswapV2: K".to_string()
            }
        );
    }

    #[test]
    fn test_node_and_domain_conversions() {
        assert!(matches!(
            ClientError::from(NodeError::Unavailable("down".to_string())),
            ClientError::NodeUnavailable(_)
        ));
        assert!(matches!(
            ClientError::from(NodeError::Rejected("User rejected".to_string())),
            ClientError::Rejected(_)
        ));
        assert_eq!(
            ClientError::from(DomainError::IdenticalTokens),
            ClientError::IdenticalTokens
        );
        assert!(matches!(
            ClientError::from(DomainError::InvalidAddress("0x1".to_string())),
            ClientError::InvalidAddress(_)
        ));
    }
}
