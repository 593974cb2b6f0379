use thiserror::Error;

#[derive(Debug, Error)]
pub enum PtyFileError {
    #[error("invalid argument: {0}")]
    InvalidArg(String),
    #[error("pty file not found")]
    NotFound,
    #[error("corrupt cirfile: {0}")]
    Corrupt(String),
    #[error("file too large for inline storage: {size} bytes (max {max})")]
    TooLarge { size: i64, max: i64 },
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for PtyFileError {
    fn from(err: rusqlite::Error) -> Self {
        PtyFileError::Persistence(err.to_string())
    }
}
