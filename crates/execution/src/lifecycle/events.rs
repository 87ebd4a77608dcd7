//! Lifecycle states and events for submitted transactions.

use crate::error::ClientError;
use cpamm_domain::{Address, to_hex};
use cpamm_protocols::TxHash;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of state-changing action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxKind {
    Approve,
    Swap,
    AddLiquidity,
    RemoveLiquidity,
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Approve => "approve",
            Self::Swap => "swap",
            Self::AddLiquidity => "add liquidity",
            Self::RemoveLiquidity => "remove liquidity",
        })
    }
}

/// What an action operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Subject {
    Token(Address),
    /// Stored in ascending address order.
    Pair(Address, Address),
}

impl Subject {
    pub fn pair(a: Address, b: Address) -> Self {
        if a < b { Self::Pair(a, b) } else { Self::Pair(b, a) }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token(token) => write!(f, "{}", to_hex(token)),
            Self::Pair(a, b) => write!(f, "{}/{}", to_hex(a), to_hex(b)),
        }
    }
}

/// Identifies one lifecycle slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionKey {
    pub kind: TxKind,
    pub subject: Subject,
}

impl ActionKey {
    pub fn approve(token: Address) -> Self {
        Self {
            kind: TxKind::Approve,
            subject: Subject::Token(token),
        }
    }

    /// Swaps are keyed by the token they spend.
    pub fn swap(token_in: Address) -> Self {
        Self {
            kind: TxKind::Swap,
            subject: Subject::Token(token_in),
        }
    }

    pub fn add_liquidity(token_a: Address, token_b: Address) -> Self {
        Self {
            kind: TxKind::AddLiquidity,
            subject: Subject::pair(token_a, token_b),
        }
    }

    pub fn remove_liquidity(token_a: Address, token_b: Address) -> Self {
        Self {
            kind: TxKind::RemoveLiquidity,
            subject: Subject::pair(token_a, token_b),
        }
    }
}

impl fmt::Display for ActionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.subject)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    Idle,
    /// Checks passed, awaiting the signer and the node.
    Submitting,
    /// Accepted by the node, waiting for inclusion.
    Confirming { hash: TxHash },
    Confirmed { hash: TxHash, block_number: u64 },
    Failed {
        error: ClientError,
        hash: Option<TxHash>,
    },
    /// No receipt within the confirmation timeout. The transaction may
    /// still be mined later.
    Unconfirmed { hash: TxHash },
}

impl TxStatus {
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Submitting | Self::Confirming { .. })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Confirmed { .. } | Self::Failed { .. } | Self::Unconfirmed { .. }
        )
    }

    pub fn hash(&self) -> Option<TxHash> {
        match self {
            Self::Confirming { hash }
            | Self::Confirmed { hash, .. }
            | Self::Unconfirmed { hash } => Some(*hash),
            Self::Failed { hash, .. } => *hash,
            Self::Idle | Self::Submitting => None,
        }
    }

    /// Short label for logs and terminal output.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Submitting => "submitting",
            Self::Confirming { .. } => "confirming",
            Self::Confirmed { .. } => "confirmed",
            Self::Failed { .. } => "failed",
            Self::Unconfirmed { .. } => "unconfirmed",
        }
    }
}

/// A status change, broadcast to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct TxEvent {
    /// Id of the attempt the change belongs to.
    pub id: uuid::Uuid,
    pub key: ActionKey,
    pub status: TxStatus,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl TxEvent {
    pub fn new(id: uuid::Uuid, key: ActionKey, status: TxStatus) -> Self {
        Self {
            id,
            key,
            status,
            timestamp: chrono::Utc::now(),
        }
    }
}
