//! The queue processor control loop.

use std::{sync::Arc, time::Duration};

use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, error, info, warn};

use outbox_spool::{Maildir, MessageId};

use crate::{envelope::Envelope, error::DeliveryError, mailer::Mailer, Signal};

/// Pause between scans in daemon mode.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(3);

/// Whether the processor drains the current pending set once or keeps
/// scanning until told to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// One full scan of the pending snapshot, then return.
    Once,
    /// Scan, sleep the configured interval, scan again, until shutdown.
    Daemon,
}

/// Drives messages from a [`Maildir`] through a [`Mailer`].
///
/// One processor is one worker: it claims and sends messages strictly one at
/// a time. Any number of processors (in this process or others) may run
/// against the same spool directory; the store's claim protocol keeps them
/// from ever sending the same message twice. For concurrent delivery, run
/// several processors rather than parallelizing a single scan.
pub struct QueueProcessor {
    store: Maildir,
    mailer: Arc<dyn Mailer>,
    interval: Duration,
}

impl QueueProcessor {
    /// A processor over `store` delivering through `mailer`, with the
    /// default scan interval.
    pub fn new(store: Maildir, mailer: Arc<dyn Mailer>) -> Self {
        Self {
            store,
            mailer,
            interval: DEFAULT_INTERVAL,
        }
    }

    /// Override the pause between scans in daemon mode.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run the processor until the pending set is drained (`Once`) or a
    /// shutdown signal arrives (`Daemon`).
    ///
    /// The shutdown receiver is only consulted *between* message attempts
    /// and during the inter-scan sleep: a claimed message is always carried
    /// to an outcome before the loop exits, so a graceful stop never
    /// abandons a claim. No per-message failure of any kind terminates the
    /// loop.
    pub async fn run(&self, mode: RunMode, mut shutdown: broadcast::Receiver<Signal>) {
        loop {
            let pending = match self.store.list_pending() {
                Ok(ids) => ids,
                Err(e) => {
                    error!(error = %e, "failed to scan spool");
                    Vec::new()
                }
            };
            debug!(pending = pending.len(), "scanned spool");

            for id in pending {
                if stop_requested(&mut shutdown) {
                    info!("shutdown requested; stopping between message attempts");
                    return;
                }
                self.attempt(&id).await;
            }

            match mode {
                RunMode::Once => return,
                RunMode::Daemon => {
                    tokio::select! {
                        () = tokio::time::sleep(self.interval) => {}
                        _ = shutdown.recv() => {
                            info!("shutdown requested; stopping");
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Try to claim and deliver one message. All failures are contained
    /// here: logged, the claim released where appropriate, and control
    /// returned so the scan moves on.
    async fn attempt(&self, id: &MessageId) {
        match self.store.try_claim(id) {
            Ok(true) => {}
            Ok(false) => {
                // Claimed by a live worker, or already finished. Not ours.
                debug!(%id, "skipping message claimed elsewhere");
                return;
            }
            Err(e) => {
                error!(%id, error = %e, "failed to claim message");
                return;
            }
        }

        let content = match self.store.read(id) {
            Ok(content) => content,
            Err(e) => {
                // Parsing never happened, so there is no sender/recipient
                // context to log; the filename is all we have.
                error!(%id, error = %e, "failed to read claimed message");
                self.release(id);
                return;
            }
        };
        let envelope = Envelope::parse(&content);

        match self.mailer.send(&envelope).await {
            Ok(()) => {
                if let Err(e) = self.store.mark_delivered(id) {
                    error!(%id, error = %e, "delivered but failed to remove from spool");
                }
                info!(from = %envelope.from, to = %envelope.recipients(), "mail sent");
            }
            Err(outcome @ DeliveryError::Permanent(_)) => {
                error!(
                    %id,
                    from = %envelope.from,
                    to = %envelope.recipients(),
                    error = %outcome,
                    "discarding message after permanent failure"
                );
                if let Err(e) = self.store.mark_rejected(id) {
                    error!(%id, error = %e, "failed to set rejected message aside");
                }
            }
            Err(outcome @ DeliveryError::Transient(_)) => {
                warn!(
                    %id,
                    from = %envelope.from,
                    to = %envelope.recipients(),
                    error = %outcome,
                    "delivery failed; message stays queued for the next scan"
                );
                self.release(id);
            }
            Err(outcome) => {
                error!(
                    %id,
                    from = %envelope.from,
                    to = %envelope.recipients(),
                    error = %outcome,
                    "unexpected error while sending; message stays queued"
                );
                self.release(id);
            }
        }
    }

    fn release(&self, id: &MessageId) {
        if let Err(e) = self.store.release_claim(id) {
            // The claim will still expire through staleness reclamation.
            error!(%id, error = %e, "failed to release claim");
        }
    }
}

/// Non-blocking shutdown check used between message attempts. A closed
/// channel counts as shutdown: if the supervisor is gone there is nobody
/// left to stop us otherwise.
fn stop_requested(shutdown: &mut broadcast::Receiver<Signal>) -> bool {
    !matches!(shutdown.try_recv(), Err(TryRecvError::Empty))
}
