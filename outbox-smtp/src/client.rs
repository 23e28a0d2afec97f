//! SMTP client connection handling, plain TCP or TLS-wrapped.

use std::sync::Arc;

use base64::Engine as _;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tokio_rustls::{
    rustls::{pki_types::ServerName, ClientConfig, RootCertStore},
    TlsConnector,
};
use tracing::warn;

use crate::{
    error::{ClientError, Result},
    response::Response,
};

/// Initial size of the response read buffer.
const BUFFER_SIZE: usize = 8192;

/// Cap on response buffer growth; a reply larger than this is a protocol
/// violation, not something to keep buffering.
const MAX_BUFFER_SIZE: usize = 1024 * 1024;

enum Connection {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl Connection {
    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        match self {
            Self::Plain(stream) => stream.write_all(data).await?,
            Self::Tls(stream) => stream.write_all(data).await?,
        }
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = match self {
            Self::Plain(stream) => stream.read(buf).await?,
            Self::Tls(stream) => stream.read(buf).await?,
        };
        if n == 0 {
            return Err(ClientError::ConnectionClosed);
        }
        Ok(n)
    }
}

/// One SMTP client session.
///
/// The session starts in plaintext; [`starttls`](Self::starttls) upgrades it
/// in place. Commands are strictly request/response; pipelining is not
/// supported and not needed for a queue worker delivering one message at a
/// time.
pub struct SmtpClient {
    connection: Option<Connection>,
    buffer: Vec<u8>,
    filled: usize,
    server_name: String,
}

impl SmtpClient {
    /// Connect to `host:port` over plain TCP.
    ///
    /// `host` is also used as the TLS server name should the session later
    /// be upgraded via STARTTLS.
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host, port)).await?;
        Ok(Self {
            connection: Some(Connection::Plain(stream)),
            buffer: vec![0u8; BUFFER_SIZE],
            filled: 0,
            server_name: host.to_string(),
        })
    }

    /// Read the server's 220 greeting. Must be called once, first.
    pub async fn read_greeting(&mut self) -> Result<Response> {
        self.read_response().await
    }

    /// Send one command line and read the server's reply.
    pub async fn command(&mut self, command: &str) -> Result<Response> {
        let data = format!("{command}\r\n");
        self.connection_mut()?.write_all(data.as_bytes()).await?;
        self.read_response().await
    }

    /// Send `EHLO` with the given client hostname.
    pub async fn ehlo(&mut self, domain: &str) -> Result<Response> {
        self.command(&format!("EHLO {domain}")).await
    }

    /// Authenticate with `AUTH PLAIN` (RFC 4616 initial response).
    pub async fn auth_plain(&mut self, username: &str, password: &str) -> Result<Response> {
        let credentials = format!("\0{username}\0{password}");
        let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);
        self.command(&format!("AUTH PLAIN {encoded}")).await
    }

    /// Send `MAIL FROM`. An empty sender becomes the null reverse-path `<>`.
    pub async fn mail_from(&mut self, from: &str) -> Result<Response> {
        self.command(&format!("MAIL FROM:<{from}>")).await
    }

    /// Send `RCPT TO` for one recipient.
    pub async fn rcpt_to(&mut self, to: &str) -> Result<Response> {
        self.command(&format!("RCPT TO:<{to}>")).await
    }

    /// Send the `DATA` command. The caller checks for the 354 go-ahead
    /// before sending the body.
    pub async fn data(&mut self) -> Result<Response> {
        self.command("DATA").await
    }

    /// Transmit the message body and the end-of-data marker, then read the
    /// server's verdict.
    ///
    /// The body is dot-stuffed (a leading `.` on any line is doubled) and
    /// normalized to CRLF line endings, since queued payloads are arbitrary
    /// bytes.
    pub async fn send_body(&mut self, body: &[u8]) -> Result<Response> {
        let wire = frame_body(body);
        self.connection_mut()?.write_all(&wire).await?;
        self.read_response().await
    }

    /// Send `QUIT` and read the goodbye.
    pub async fn quit(&mut self) -> Result<Response> {
        self.command("QUIT").await
    }

    /// Send `STARTTLS` and, if the server agrees, upgrade the connection.
    ///
    /// On a non-2xx reply the session stays in plaintext and the reply is
    /// returned for the caller to act on.
    pub async fn starttls(&mut self) -> Result<Response> {
        let response = self.command("STARTTLS").await?;
        if !response.is_success() {
            return Ok(response);
        }

        let connection = self
            .connection
            .take()
            .ok_or(ClientError::ConnectionClosed)?;
        let Connection::Plain(stream) = connection else {
            return Err(ClientError::Tls("connection is already TLS".to_string()));
        };

        let mut roots = RootCertStore::empty();
        let native = rustls_native_certs::load_native_certs();
        for cert in native.certs {
            roots
                .add(cert)
                .map_err(|e| ClientError::Tls(format!("failed to add root certificate: {e}")))?;
        }
        if !native.errors.is_empty() {
            warn!(errors = ?native.errors, "some system certificates could not be loaded");
        }

        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(config));
        let server_name = ServerName::try_from(self.server_name.clone())
            .map_err(|e| ClientError::Tls(format!("invalid server name: {e}")))?;

        let tls_stream = connector
            .connect(server_name, stream)
            .await
            .map_err(|e| ClientError::Tls(e.to_string()))?;

        // Any bytes buffered before the handshake belong to the plaintext
        // session and must not leak into the TLS one.
        self.filled = 0;
        self.connection = Some(Connection::Tls(Box::new(tls_stream)));
        Ok(response)
    }

    fn connection_mut(&mut self) -> Result<&mut Connection> {
        self.connection.as_mut().ok_or(ClientError::ConnectionClosed)
    }

    /// Read until one complete (possibly multi-line) reply is buffered.
    async fn read_response(&mut self) -> Result<Response> {
        loop {
            if let Some((response, consumed)) = Response::parse(&self.buffer[..self.filled])? {
                self.buffer.copy_within(consumed..self.filled, 0);
                self.filled -= consumed;
                return Ok(response);
            }

            if self.filled >= self.buffer.len() {
                let grown = self.buffer.len() * 2;
                if grown > MAX_BUFFER_SIZE {
                    return Err(ClientError::Parse(format!(
                        "reply exceeds {MAX_BUFFER_SIZE} bytes"
                    )));
                }
                self.buffer.resize(grown, 0);
            }

            let connection = self
                .connection
                .as_mut()
                .ok_or(ClientError::ConnectionClosed)?;
            let n = connection.read(&mut self.buffer[self.filled..]).await?;
            self.filled += n;
        }
    }
}

/// Prepare a message body for the wire: normalize line endings to CRLF,
/// dot-stuff lines beginning with `.`, and append the end-of-data marker.
fn frame_body(body: &[u8]) -> Vec<u8> {
    let mut wire = Vec::with_capacity(body.len() + 8);
    for line in body.split_inclusive(|&b| b == b'\n') {
        let line = line
            .strip_suffix(b"\n")
            .map_or(line, |l| l.strip_suffix(b"\r").unwrap_or(l));
        if line.first() == Some(&b'.') {
            wire.push(b'.');
        }
        wire.extend_from_slice(line);
        wire.extend_from_slice(b"\r\n");
    }
    wire.extend_from_slice(b".\r\n");
    wire
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_is_dot_stuffed_and_crlf_normalized() {
        assert_eq!(
            frame_body(b"line one\n.starts with dot\nlast"),
            b"line one\r\n..starts with dot\r\nlast\r\n.\r\n".to_vec()
        );
    }

    #[test]
    fn empty_body_is_just_the_terminator() {
        assert_eq!(frame_body(b""), b".\r\n".to_vec());
    }

    #[test]
    fn crlf_input_is_not_doubled() {
        assert_eq!(frame_body(b"a\r\nb\r\n"), b"a\r\nb\r\n.\r\n".to_vec());
    }
}
