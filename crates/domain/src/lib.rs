//! Core domain model for the constant-product AMM client.
//!
//! Everything in this crate is pure: no I/O and no clocks. It provides:
//! - Addresses, token descriptors and unit conversion
//! - Pool snapshots and the derived pool view
//! - Trade paths and routing through the wrapped native asset
//! - Slippage and deadline value objects
//! - Constant-product math used for local estimates

/// Contract addresses and the native sentinel.
pub mod address;
/// Domain error type.
pub mod error;
/// Constant-product math.
pub mod math;
/// Trade paths.
pub mod path;
/// Pool snapshots.
pub mod pool;
/// Advisory price table.
pub mod pricing;
/// Token descriptors and raw amounts.
pub mod token;
/// Value objects.
pub mod value_objects;
/// Derived pool views.
pub mod view;

pub use address::{Address, NATIVE_TOKEN, is_native, parse_address, to_hex};
pub use error::DomainError;
pub use path::{TradePath, build_path};
pub use pool::PoolSnapshot;
pub use pricing::PriceTable;
pub use token::{TokenAmount, TokenDescriptor};
pub use value_objects::amount::{Amount, format_compact, format_units, parse_units};
pub use value_objects::deadline::Deadline;
pub use value_objects::percentage::{SlippageBounds, SlippageTolerance, SlippageWarning};
pub use view::{DerivedPoolView, PoolStats, build_pool_view, my_pools, pool_stats};

pub use primitive_types::U256;
