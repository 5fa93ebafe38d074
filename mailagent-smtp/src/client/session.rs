//! An authenticated submission session with the relay.

use std::{future::Future, time::Duration};

use base64::{Engine, engine::general_purpose::STANDARD};
use mailagent_common::{
    config::{ClientTimeouts, RelayConfig, TlsPolicy},
    incoming, outgoing, tracing,
};
use tokio::net::TcpStream;

use super::{
    connection::ClientConnection,
    error::{ClientError, Result},
    response::Response,
};

/// Initial size of the read buffer for replies.
const BUFFER_SIZE: usize = 8192;

/// Maximum size of the read buffer to prevent unbounded growth (1MB).
const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Extensions advertised in the EHLO reply that the session cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub starttls: bool,
    pub auth: Vec<String>,
    pub size: Option<usize>,
}

impl Capabilities {
    /// The first line of an EHLO reply is the greeting; every other line is a keyword
    /// followed by optional parameters.
    #[must_use]
    pub fn from_ehlo(response: &Response) -> Self {
        let mut capabilities = Self::default();

        for line in response.lines.iter().skip(1) {
            let mut parts = line.split_whitespace();
            let Some(keyword) = parts.next() else {
                continue;
            };

            match keyword.to_ascii_uppercase().as_str() {
                "STARTTLS" => capabilities.starttls = true,
                "AUTH" => capabilities
                    .auth
                    .extend(parts.map(str::to_ascii_uppercase)),
                "SIZE" => capabilities.size = parts.next().and_then(|size| size.parse().ok()),
                _ => {}
            }
        }

        capabilities
    }

    #[must_use]
    pub fn supports_auth(&self, mechanism: &str) -> bool {
        self.auth.iter().any(|m| m.eq_ignore_ascii_case(mechanism))
    }

    /// Whether the relay would take a message of `size` bytes. `SIZE 0` means no limit.
    #[must_use]
    pub fn accepts_size(&self, size: usize) -> bool {
        self.size.is_none_or(|limit| limit == 0 || size <= limit)
    }
}

/// Convert a message to its DATA encoding: CRLF line endings, leading dots doubled,
/// terminated by `.<CRLF>`.
#[must_use]
pub fn encode_data(message: &str) -> Vec<u8> {
    let mut encoded = Vec::with_capacity(message.len() + message.len() / 32 + 5);

    for line in message.lines() {
        if line.starts_with('.') {
            encoded.push(b'.');
        }
        encoded.extend_from_slice(line.as_bytes());
        encoded.extend_from_slice(b"\r\n");
    }

    encoded.extend_from_slice(b".\r\n");
    encoded
}

/// One connection to the relay, past greeting, EHLO, STARTTLS and AUTH.
pub struct SmtpSession {
    connection: Option<ClientConnection>,
    buffer: Vec<u8>,
    buffer_pos: usize,
    capabilities: Capabilities,
    timeouts: ClientTimeouts,
}

impl SmtpSession {
    /// Connect to the relay and bring the session to the point where it can accept mail.
    ///
    /// # Errors
    /// Any failure along the way; the partially opened connection is dropped.
    #[tracing::instrument(skip_all, fields(relay = %relay.address()))]
    pub async fn open(relay: &RelayConfig) -> Result<Self> {
        let timeouts = relay.timeouts.clone();
        let stream = tokio::time::timeout(timeouts.connect(), TcpStream::connect(relay.address()))
            .await
            .map_err(|_| ClientError::Timeout("connect"))??;

        let mut session = Self {
            connection: Some(ClientConnection::Plain(stream)),
            buffer: vec![0u8; BUFFER_SIZE],
            buffer_pos: 0,
            capabilities: Capabilities::default(),
            timeouts,
        };

        let command_timeout = session.timeouts.command();
        with_timeout(command_timeout, "greeting", session.read_response())
            .await?
            .expect_class(2)?;

        session.ehlo(&relay.hello_name).await?;

        let upgrade = match relay.tls.policy {
            TlsPolicy::Disabled => false,
            TlsPolicy::Opportunistic => session.capabilities.starttls,
            TlsPolicy::Required if !session.capabilities.starttls => {
                return Err(ClientError::TlsUnavailable);
            }
            TlsPolicy::Required => true,
        };

        if upgrade {
            session
                .starttls(&relay.host, relay.tls.accept_invalid_certs)
                .await?;
            session.ehlo(&relay.hello_name).await?;
        }

        if let Some((username, password)) = relay.credentials() {
            session.authenticate(username, password).await?;
        }

        tracing::debug!(
            tls = session.is_encrypted(),
            "Session established with relay"
        );

        Ok(session)
    }

    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(ClientConnection::is_tls)
    }

    async fn ehlo(&mut self, hello_name: &str) -> Result<()> {
        let response = self
            .command(&format!("EHLO {hello_name}"), "EHLO")
            .await?
            .expect_class(2)?;
        self.capabilities = Capabilities::from_ehlo(&response);
        Ok(())
    }

    async fn starttls(&mut self, domain: &str, accept_invalid_certs: bool) -> Result<()> {
        self.command("STARTTLS", "STARTTLS").await?.expect_class(2)?;

        // Anything buffered before the handshake came from the plaintext channel.
        self.buffer_pos = 0;

        let connection = self.connection.take().ok_or(ClientError::ConnectionClosed)?;
        let upgraded = with_timeout(
            self.timeouts.command(),
            "TLS handshake",
            connection.upgrade_to_tls(domain, accept_invalid_certs),
        )
        .await?;
        self.connection = Some(upgraded);

        Ok(())
    }

    async fn authenticate(&mut self, username: &str, password: &str) -> Result<()> {
        if self.capabilities.supports_auth("PLAIN") {
            let token = STANDARD.encode(format!("\0{username}\0{password}"));
            outgoing!("AUTH PLAIN ****");
            self.exchange(&format!("AUTH PLAIN {token}"), "AUTH")
                .await?
                .expect_class(2)?;
        } else if self.capabilities.supports_auth("LOGIN") {
            self.command("AUTH LOGIN", "AUTH").await?.expect_class(3)?;
            outgoing!("****");
            self.exchange(&STANDARD.encode(username), "AUTH")
                .await?
                .expect_class(3)?;
            outgoing!("****");
            self.exchange(&STANDARD.encode(password), "AUTH")
                .await?
                .expect_class(2)?;
        } else {
            return Err(ClientError::AuthUnavailable);
        }

        Ok(())
    }

    /// Run one mail transaction.
    ///
    /// Recipients the relay refuses are skipped; the message is still sent to the rest.
    /// Returns the refused recipients.
    ///
    /// # Errors
    /// If the message is larger than the relay advertises, the relay rejects the sender,
    /// every recipient or the message itself, or the connection fails.
    pub async fn send_mail(
        &mut self,
        from: &str,
        recipients: &[String],
        message: &str,
    ) -> Result<Vec<String>> {
        let payload = encode_data(message);
        if !self.capabilities.accepts_size(payload.len()) {
            return Err(ClientError::MessageTooLarge {
                size: payload.len(),
                limit: self.capabilities.size.unwrap_or_default(),
            });
        }

        self.command(&format!("MAIL FROM:<{from}>"), "MAIL")
            .await?
            .expect_class(2)?;

        let mut refused = Vec::new();
        for recipient in recipients {
            let response = self
                .command(&format!("RCPT TO:<{recipient}>"), "RCPT")
                .await?;
            if !response.is_success() {
                tracing::warn!(
                    recipient = %recipient,
                    code = response.code,
                    reply = %response.message(),
                    "Recipient refused by relay"
                );
                refused.push(recipient.clone());
            }
        }

        if refused.len() == recipients.len() {
            return Err(ClientError::RecipientsRefused(refused));
        }

        self.command("DATA", "DATA").await?.expect_class(3)?;

        outgoing!("<{} bytes of message data>", payload.len());
        let data_timeout = self.timeouts.data();
        with_timeout(data_timeout, "message transfer", async {
            self.connection_mut()?.send(&payload).await?;
            self.read_response().await
        })
        .await?
        .expect_class(2)?;

        Ok(refused)
    }

    /// Abort the current transaction, keeping the session usable.
    ///
    /// # Errors
    /// If the relay doesn't acknowledge the reset.
    pub async fn reset(&mut self) -> Result<()> {
        self.command("RSET", "RSET").await?.expect_class(2)?;
        Ok(())
    }

    /// Say goodbye and close the socket. The reply is informational only.
    pub async fn quit(&mut self) {
        let quit_timeout = self.timeouts.quit();
        if let Err(err) = with_timeout(quit_timeout, "QUIT", self.exchange("QUIT", "QUIT")).await {
            tracing::debug!(%err, "Relay did not acknowledge QUIT");
        }

        if let Some(mut connection) = self.connection.take() {
            connection.shutdown().await;
        }
    }

    fn connection_mut(&mut self) -> Result<&mut ClientConnection> {
        self.connection.as_mut().ok_or(ClientError::ConnectionClosed)
    }

    /// Log, send and read the reply within the command timeout.
    async fn command(&mut self, command: &str, operation: &'static str) -> Result<Response> {
        outgoing!("{}", command);
        self.exchange(command, operation).await
    }

    async fn exchange(&mut self, command: &str, operation: &'static str) -> Result<Response> {
        let command_timeout = self.timeouts.command();
        with_timeout(command_timeout, operation, async {
            let line = format!("{command}\r\n");
            self.connection_mut()?.send(line.as_bytes()).await?;
            self.read_response().await
        })
        .await
    }

    async fn read_response(&mut self) -> Result<Response> {
        loop {
            if let Some((response, consumed)) =
                Response::parse_response(&self.buffer[..self.buffer_pos])?
            {
                self.buffer.copy_within(consumed..self.buffer_pos, 0);
                self.buffer_pos -= consumed;

                incoming!("{} {}", response.code, response.message());
                return Ok(response);
            }

            if self.buffer_pos >= self.buffer.len() {
                let new_size = self.buffer.len() * 2;
                if new_size > MAX_BUFFER_SIZE {
                    return Err(ClientError::ParseError(format!(
                        "Response too large (exceeds {MAX_BUFFER_SIZE} bytes)"
                    )));
                }
                self.buffer.resize(new_size, 0);
            }

            let pos = self.buffer_pos;
            let connection = self.connection.as_mut().ok_or(ClientError::ConnectionClosed)?;
            let n = connection.read(&mut self.buffer[pos..]).await?;
            self.buffer_pos += n;
        }
    }
}

async fn with_timeout<T>(
    duration: Duration,
    operation: &'static str,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| ClientError::Timeout(operation))?
}
