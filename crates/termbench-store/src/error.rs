use termbench_blockstore::BlockStoreError;
use termbench_model::StateError;
use termbench_ptyfile::PtyFileError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// User-visible, non-fatal: missing entities, duplicate names, refused
    /// archive/delete operations, oversized payloads.
    #[error("{0}")]
    Validation(String),
    /// The line's command is still running; retry after it finishes.
    #[error("cannot delete line[{0}], cmd is running")]
    CmdRunning(String),
    /// Referenced content (state base/diff, cache entry) is missing where it
    /// must exist. Fatal for the in-flight call only.
    #[error("corruption: {0}")]
    Corruption(String),
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl StoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        StoreError::Validation(message.into())
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Persistence(err.to_string())
    }
}

impl From<BlockStoreError> for StoreError {
    fn from(err: BlockStoreError) -> Self {
        StoreError::Persistence(err.to_string())
    }
}

impl From<PtyFileError> for StoreError {
    fn from(err: PtyFileError) -> Self {
        StoreError::Persistence(err.to_string())
    }
}

impl From<StateError> for StoreError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::MissingBase(_) | StateError::MissingDiff { .. } => {
                StoreError::Corruption(err.to_string())
            }
            StateError::Decode(message) => StoreError::Corruption(message),
        }
    }
}
