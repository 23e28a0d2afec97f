//! The transport abstraction the queue processor delivers through.

use async_trait::async_trait;

use crate::{envelope::Envelope, error::DeliveryError};

/// A transport capable of delivering one envelope.
///
/// `send` either completes, meaning the message was accepted for all
/// surviving recipients, or reports exactly one [`DeliveryError`] classifying the
/// failure. Implementations own whatever connection state they need; the
/// processor calls `send` for one message at a time per worker.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, envelope: &Envelope) -> Result<(), DeliveryError>;
}
