//! Local persistence for the AMM client.
//!
//! The only durable state is the list of user-added tokens, kept under one
//! namespaced key of a [`KeyValueStore`]. Values are always replaced whole.

pub mod error;
pub mod repositories;
pub mod store;

pub use error::StoreError;
pub use repositories::{CUSTOM_TOKENS_KEY, CustomTokenRepository};
pub use store::{FileStore, KeyValueStore, MemoryStore};
