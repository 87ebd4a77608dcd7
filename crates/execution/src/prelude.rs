//! Prelude module for convenient imports.
//!
//! This module re-exports the most commonly used types from the crate.
//!
//! # Example
//!
//! ```rust
//! use cpamm_execution::prelude::*;
//! ```

// Clock
pub use crate::clock::{Clock, FixedClock, SystemClock};

// Config
pub use crate::config::{ClientConfig, TradingConfig};

// Errors
pub use crate::error::{ClientError, classify_revert};

// Lifecycle
pub use crate::lifecycle::{
    ActionKey, PendingTransaction, Subject, TransactionTracker, TxEvent, TxKind, TxStatus,
};

// Orchestrator
pub use crate::orchestrator::{
    AddLiquidityRequest, ApprovalAmount, ApprovalState, Confirmation, RemovalPreview,
    RemoveAmount, RemoveLiquidityRequest, SwapRequest, TransactionOrchestrator,
};

// Quotes
pub use crate::quote::{QuoteDebouncer, QuoteEngine, QuoteInput, QuoteResult, QuoteState};

// Registry
pub use crate::registry::{PoolListing, PoolRegistry};

// Resolver
pub use crate::resolver::{Resolution, TokenResolver};

// Session
pub use crate::session::{ClientSession, Diagnostics};
