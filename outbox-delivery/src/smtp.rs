//! SMTP transport implementation of [`Mailer`].

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use outbox_smtp::{Response, SmtpClient};

use crate::{envelope::Envelope, error::DeliveryError, mailer::Mailer};

/// Whole-transaction time budget. The spool's staleness reclamation is the
/// backstop for anything slower; this just keeps a wedged server from
/// pinning the worker for hours.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// SMTP credentials, presented via `AUTH PLAIN` after the (possibly
/// TLS-upgraded) handshake.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// How to treat STARTTLS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsPolicy {
    /// Upgrade when the server advertises STARTTLS, carry on in plaintext
    /// when it does not.
    #[default]
    Opportunistic,
    /// Refuse to deliver without TLS. A server that cannot provide it is
    /// reported as a transient failure (the connection could not be
    /// established as required), never silently downgraded.
    Required,
    /// Never attempt STARTTLS, even if advertised.
    Disabled,
}

/// Delivers envelopes through one configured SMTP relay.
#[derive(Debug, Clone)]
pub struct SmtpMailer {
    host: String,
    port: u16,
    credentials: Option<Credentials>,
    tls: TlsPolicy,
    ehlo_name: String,
    timeout: Duration,
}

impl SmtpMailer {
    /// A mailer targeting `host:port` with opportunistic TLS and no
    /// authentication.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            credentials: None,
            tls: TlsPolicy::default(),
            ehlo_name: "outbox".to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    #[must_use]
    pub const fn with_tls_policy(mut self, tls: TlsPolicy) -> Self {
        self.tls = tls;
        self
    }

    /// Hostname to present in `EHLO`.
    #[must_use]
    pub fn with_ehlo_name(mut self, name: impl Into<String>) -> Self {
        self.ehlo_name = name.into();
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn transaction(&self, envelope: &Envelope) -> Result<(), DeliveryError> {
        if envelope.to.is_empty() {
            return Err(DeliveryError::Permanent(
                "message has no recipients".to_string(),
            ));
        }

        let mut client = SmtpClient::connect(&self.host, self.port)
            .await
            .map_err(|e| {
                DeliveryError::Transient(format!(
                    "failed to connect to {}:{}: {e}",
                    self.host, self.port
                ))
            })?;

        let greeting = client.read_greeting().await?;
        if !greeting.is_success() {
            return Err(classify("server rejected connection", &greeting));
        }

        let ehlo = client.ehlo(&self.ehlo_name).await?;
        if !ehlo.is_success() {
            return Err(classify("server rejected EHLO", &ehlo));
        }

        self.negotiate_tls(&mut client, &ehlo).await?;

        if let Some(credentials) = &self.credentials {
            let reply = client
                .auth_plain(&credentials.username, &credentials.password)
                .await?;
            if !reply.is_success() {
                return Err(classify("authentication failed", &reply));
            }
        }

        let reply = client.mail_from(&envelope.from).await?;
        if !reply.is_success() {
            return Err(classify("server rejected MAIL FROM", &reply));
        }

        let mut refused = Vec::new();
        for recipient in &envelope.to {
            let reply = client.rcpt_to(recipient).await?;
            if reply.is_success() {
                continue;
            }
            if reply.is_permanent_error() {
                // The message may still go out to the remaining recipients;
                // only a full refusal fails the whole message.
                refused.push(format!("{recipient} ({})", reply.message()));
            } else {
                return Err(classify(
                    &format!("server deferred recipient {recipient}"),
                    &reply,
                ));
            }
        }
        if refused.len() == envelope.to.len() {
            return Err(DeliveryError::Permanent(format!(
                "all recipients refused: {}",
                refused.join("; ")
            )));
        }
        if !refused.is_empty() {
            warn!(
                from = %envelope.from,
                refused = %refused.join("; "),
                "some recipients refused; delivering to the rest"
            );
        }

        let reply = client.data().await?;
        if reply.code != 354 {
            return Err(classify("server rejected DATA", &reply));
        }

        let reply = client.send_body(&envelope.body).await?;
        if !reply.is_success() {
            return Err(classify("server rejected message data", &reply));
        }

        // The message is delivered at this point; a failed QUIT is not worth
        // more than a debug line.
        if let Err(e) = client.quit().await {
            debug!(error = %e, "QUIT after successful delivery failed");
        }

        Ok(())
    }

    async fn negotiate_tls(
        &self,
        client: &mut SmtpClient,
        ehlo: &Response,
    ) -> Result<(), DeliveryError> {
        if self.tls == TlsPolicy::Disabled {
            return Ok(());
        }

        let advertised = ehlo
            .lines
            .iter()
            .any(|line| line.to_ascii_uppercase().starts_with("STARTTLS"));

        if !advertised {
            return match self.tls {
                TlsPolicy::Required => Err(DeliveryError::Transient(
                    "TLS required but server does not advertise STARTTLS".to_string(),
                )),
                _ => Ok(()),
            };
        }

        let reply = client.starttls().await?;
        if reply.is_success() {
            // RFC 3207: the session state resets; EHLO again.
            let reply = client.ehlo(&self.ehlo_name).await?;
            if !reply.is_success() {
                return Err(classify("server rejected EHLO after STARTTLS", &reply));
            }
            return Ok(());
        }

        match self.tls {
            TlsPolicy::Required => Err(DeliveryError::Transient(format!(
                "TLS required but server refused STARTTLS: {}",
                reply.message()
            ))),
            _ => {
                debug!(reply = %reply.message(), "STARTTLS refused; continuing in plaintext");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, envelope: &Envelope) -> Result<(), DeliveryError> {
        tokio::time::timeout(self.timeout, self.transaction(envelope))
            .await
            .map_err(|_| {
                DeliveryError::Transient(format!(
                    "transaction with {}:{} timed out after {:?}",
                    self.host, self.port, self.timeout
                ))
            })?
    }
}

/// Map an SMTP error reply onto the retry taxonomy: 5xx is final, anything
/// else is worth another attempt.
fn classify(context: &str, reply: &Response) -> DeliveryError {
    let detail = format!("{context}: {} {}", reply.code, reply.message());
    if reply.is_permanent_error() {
        DeliveryError::Permanent(detail)
    } else {
        DeliveryError::Transient(detail)
    }
}
