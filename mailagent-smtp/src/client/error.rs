//! Error types for the submission client.

use std::io;

use thiserror::Error;

/// Errors that can occur while talking to the relay.
#[derive(Error, Debug)]
pub enum ClientError {
    /// IO error occurred during network operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Failed to parse an SMTP response from the server.
    #[error("Failed to parse SMTP response: {0}")]
    ParseError(String),

    /// The server returned an unexpected SMTP status code.
    #[error("Unexpected SMTP status code: {code} - {message}")]
    UnexpectedResponse { code: u16, message: String },

    /// The server rejected a command with a 4xx or 5xx reply.
    #[error("SMTP error: {code} - {message}")]
    SmtpError { code: u16, message: String },

    /// Every recipient of the transaction was refused.
    #[error("All recipients were refused: {}", .0.join(", "))]
    RecipientsRefused(Vec<String>),

    /// TLS/SSL error occurred.
    #[error("TLS error: {0}")]
    TlsError(String),

    /// Encryption is required but the server does not offer STARTTLS.
    #[error("Server does not support STARTTLS")]
    TlsUnavailable,

    /// Credentials are configured but the server offers no usable AUTH mechanism.
    #[error("Server does not support AUTH PLAIN or LOGIN")]
    AuthUnavailable,

    /// The message is larger than the relay's advertised `SIZE`.
    #[error("Message of {size} bytes exceeds the relay limit of {limit} bytes")]
    MessageTooLarge { size: usize, limit: usize },

    /// Connection was closed unexpectedly.
    #[error("Connection closed unexpectedly")]
    ConnectionClosed,

    /// An exchange did not complete in time.
    #[error("Timed out during {0}")]
    Timeout(&'static str),

    /// UTF-8 decoding error.
    #[error("UTF-8 error: {0}")]
    Utf8Error(#[from] std::str::Utf8Error),
}

impl ClientError {
    /// Whether the session this error came from can no longer be trusted.
    ///
    /// A broken session must be closed rather than returned to a pool. Server-level
    /// rejections leave the session usable once the transaction is reset.
    #[must_use]
    pub const fn is_connection_broken(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::ParseError(_)
                | Self::TlsError(_)
                | Self::ConnectionClosed
                | Self::Timeout(_)
                | Self::Utf8Error(_)
        )
    }
}

/// Specialized `Result` type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
