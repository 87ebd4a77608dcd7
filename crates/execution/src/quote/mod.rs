//! Router quotes and input debouncing.

pub mod debouncer;
pub mod engine;

pub use debouncer::{QuoteDebouncer, QuoteInput, QuoteState};
pub use engine::{QuoteEngine, QuoteResult};
