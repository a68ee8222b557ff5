//! Error types for shardmap.

use rankmesh::CommError;

/// Distributed map operation errors.
#[derive(Debug)]
pub enum Error {
    /// The message-passing substrate failed mid-protocol.
    Comm(CommError),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Comm(e) => write!(f, "communication failed: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Comm(e) => Some(e),
        }
    }
}

impl From<CommError> for Error {
    fn from(e: CommError) -> Self {
        Error::Comm(e)
    }
}

/// Result type for shardmap operations.
pub type Result<T> = std::result::Result<T, Error>;
