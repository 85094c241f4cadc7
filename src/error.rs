//! Crate-wide error type.
//!
//! Format errors (a file that is not, or not yet, a valid index) are
//! separate from I/O errors. Running out of data is not an error anywhere in
//! the crate; readers return `None` for that.

/// Errors returned by index construction, persistence and queries.
#[derive(thiserror::Error, Debug)]
pub enum IndexError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Wrong magic, unfinalized write, truncated or inconsistent payload.
    #[error("invalid index file: {0}")]
    Format(String),

    /// A parameter outside what the encoding or table can represent.
    #[error("out of range: {0}")]
    Range(String),

    #[error("invalid seed: {0}")]
    InvalidSeed(String),

    /// Mutually exclusive build policies were requested together.
    #[error("conflicting build policies: {0}")]
    PolicyConflict(String),

    #[error("build cancelled")]
    Cancelled,

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, IndexError>;

impl IndexError {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        IndexError::Format(msg.into())
    }

    pub(crate) fn range(msg: impl Into<String>) -> Self {
        IndexError::Range(msg.into())
    }
}
