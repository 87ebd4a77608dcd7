//! Client-side services for a constant-product AMM exchange.
//!
//! This crate wires the domain model to a ledger node:
//! - Token metadata resolution with a session cache
//! - Pool enumeration in a fixed number of batched round trips
//! - Router quotes with input debouncing
//! - Approve, swap and liquidity transactions with lifecycle tracking
//! - Session wiring, custom token persistence and node diagnostics

/// Prelude module for convenient imports.
pub mod prelude;

/// Deadline clock.
pub mod clock;
/// Client configuration.
pub mod config;
/// Error taxonomy.
pub mod error;
/// Transaction lifecycle tracking.
pub mod lifecycle;
/// Transaction orchestration.
pub mod orchestrator;
/// Router quotes.
pub mod quote;
/// Pool enumeration.
pub mod registry;
/// Token metadata resolution.
pub mod resolver;
/// Session wiring.
pub mod session;

#[cfg(test)]
pub(crate) mod testing;
