//! Error types for the SMTP client.

use std::io;

use thiserror::Error;

/// Errors that can occur while talking to an SMTP server.
///
/// These are transport- and protocol-level failures only; an error *reply*
/// (4xx/5xx) is not a `ClientError` but a [`Response`](crate::Response) the
/// caller inspects.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The server closed the connection mid-exchange.
    #[error("connection closed unexpectedly")]
    ConnectionClosed,

    /// The server's reply did not parse as an SMTP response.
    #[error("malformed SMTP response: {0}")]
    Parse(String),

    /// TLS negotiation or configuration failed.
    #[error("TLS error: {0}")]
    Tls(String),

    /// The server's reply was not valid UTF-8.
    #[error("response is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

/// Specialized `Result` type for SMTP client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
