//! Transaction lifecycle tracking.
//!
//! Every submitted action moves through
//! `Idle -> Submitting -> Confirming -> Confirmed | Failed | Unconfirmed`:
//! - one action of a kind may be in flight per token or pool
//! - every failure lands in a terminal state, never back in `Submitting`
//! - terminal states return to `Idle` only when acknowledged

mod events;
mod tracker;

pub use events::*;
pub use tracker::*;
