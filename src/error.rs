use thiserror::Error;

pub type CopseResult<T, E = CopseError> = Result<T, E>;

#[derive(Debug, Error)]
pub enum CopseError {
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Out of memory: {0}")]
    OutOfMemory(String),
}
