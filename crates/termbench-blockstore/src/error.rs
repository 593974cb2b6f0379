use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlockStoreError {
    /// Sentinel: a write or read hit the file's max size. Absorbed into
    /// wrap-around for circular files; surfaced to the caller otherwise.
    #[error("MaxSizeError")]
    MaxSize,
    #[error("file already exists: {block_id}/{name}")]
    DuplicateFile { block_id: String, name: String },
    #[error("file not found: {block_id}/{name}")]
    FileNotFound { block_id: String, name: String },
    #[error("tried to read past the end of the file")]
    ReadPastEnd,
    /// Programmer error: a single part write crossed the part boundary.
    #[error("writing past end of part: {0}")]
    PartOverflow(String),
    #[error("flush timer already running")]
    FlushTimerRunning,
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl From<rusqlite::Error> for BlockStoreError {
    fn from(err: rusqlite::Error) -> Self {
        BlockStoreError::Persistence(err.to_string())
    }
}
