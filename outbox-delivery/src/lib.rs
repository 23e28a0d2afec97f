//! Delivery processor for the outbox mail queue.
//!
//! Pulls pending messages from an [`outbox_spool::Maildir`], claims them
//! through the store's hard-link protocol, parses the queued envelope
//! format, and hands each message to a [`Mailer`]. Outcomes drive the store:
//! delivered messages are removed, permanently-refused ones are set aside,
//! and everything else stays queued for the next scan.

pub mod envelope;
pub mod error;
pub mod mailer;
pub mod processor;
pub mod smtp;

pub use envelope::Envelope;
pub use error::DeliveryError;
pub use mailer::Mailer;
pub use processor::{QueueProcessor, RunMode};
pub use smtp::{Credentials, SmtpMailer, TlsPolicy};

/// Control signal broadcast to long-running components.
#[derive(Debug, Clone, Copy)]
pub enum Signal {
    /// Finish the in-flight message attempt, then exit.
    Shutdown,
}
