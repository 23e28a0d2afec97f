//! Error types for spool operations.

use std::io;

use thiserror::Error;

use crate::MessageId;

/// Top-level spool error type.
#[derive(Debug, Error)]
pub enum SpoolError {
    /// I/O operation failed (stat/read/link/unlink).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Message file no longer present in the spool.
    #[error("message not found: {0}")]
    NotFound(MessageId),

    /// Spool root validation failed.
    #[error("spool validation error: {0}")]
    Validation(#[from] ValidationError),
}

/// Spool root validation errors, raised at startup before any scan runs.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Spool path exists but is not a directory.
    #[error("spool path is not a directory: {0}")]
    NotDirectory(String),

    /// Spool path could not be created.
    #[error("spool path could not be created: {path}: {source}")]
    CreateFailed {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Specialized `Result` type for spool operations.
pub type Result<T> = std::result::Result<T, SpoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let spool_err: SpoolError = io_err.into();
        assert!(matches!(spool_err, SpoolError::Io(_)));
        assert!(spool_err.to_string().contains("access denied"));
    }
}
