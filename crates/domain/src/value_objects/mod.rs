pub mod amount;
pub mod deadline;
pub mod percentage;

pub use amount::Amount;
pub use deadline::Deadline;
pub use percentage::{SlippageBounds, SlippageTolerance, SlippageWarning};
