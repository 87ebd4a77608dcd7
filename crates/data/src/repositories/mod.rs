//! Repositories over the key-value store.

mod custom_token_repository;

pub use custom_token_repository::{CUSTOM_TOKENS_KEY, CustomTokenRepository};
