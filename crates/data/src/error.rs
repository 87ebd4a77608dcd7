use thiserror::Error;

/// Errors raised by the local store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("stored value is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("token {0} is already in the list")]
    Duplicate(String),
}
