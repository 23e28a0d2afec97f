//! Delivery outcome classification.
//!
//! Every failed attempt is exactly one of three kinds, and the queue
//! processor branches on the kind: permanent failures are set aside and
//! never retried, everything else leaves the message queued for the next
//! scan.

use thiserror::Error;

use outbox_smtp::ClientError;

/// Why a delivery attempt did not succeed.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The server refused the message outright: a 5xx reply, or every
    /// recipient rejected. Retrying the same message will never succeed.
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// A condition expected to clear on its own: connection trouble, a 4xx
    /// reply, a timeout, or TLS that could not be negotiated as required.
    #[error("transient failure: {0}")]
    Transient(String),

    /// A protocol violation or local bug. Treated like a transient failure
    /// by the store (the claim is released) but logged loudly.
    #[error("internal error: {0}")]
    Internal(String),
}

impl DeliveryError {
    /// `true` if the message should be set aside and never retried.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }

    /// `true` if the message should be retried on a later scan.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Transport-level client errors map onto the retry taxonomy: network
/// trouble is worth retrying, while malformed protocol traffic points at a
/// bug somewhere and is surfaced as internal.
impl From<ClientError> for DeliveryError {
    fn from(error: ClientError) -> Self {
        match error {
            ClientError::Io(e) => Self::Transient(format!("I/O error: {e}")),
            ClientError::ConnectionClosed => {
                Self::Transient("connection closed unexpectedly".to_string())
            }
            ClientError::Tls(msg) => Self::Transient(format!("TLS negotiation failed: {msg}")),
            ClientError::Parse(msg) => Self::Internal(format!("protocol parse error: {msg}")),
            ClientError::Utf8(e) => Self::Internal(format!("protocol decode error: {e}")),
        }
    }
}
