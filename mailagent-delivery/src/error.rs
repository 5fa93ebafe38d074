//! Typed errors for delivery attempts.
//!
//! None of these are retried in-process: the job stays unacknowledged and the
//! broker decides when to redeliver it.

use std::time::Duration;

use mailagent_smtp::ClientError;
use thiserror::Error;

/// Failures of the relay connection pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// No session was released before the acquire timeout.
    #[error("No relay session became available within {0:?}")]
    Exhausted(Duration),

    /// A new session could not be opened.
    #[error("Failed to open relay session: {0}")]
    Connect(#[source] ClientError),

    /// The pool has been shut down.
    #[error("Connection pool is closed")]
    Closed,
}

/// Why a job could not be delivered.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The queue message is not a valid job payload.
    #[error("Invalid job payload: {0}")]
    InvalidJob(#[from] serde_json::Error),

    /// The message headers could not be parsed.
    #[error("Malformed message: {0}")]
    MalformedMessage(#[from] mailparse::MailParseError),

    /// Neither the job nor the message headers name a recipient.
    #[error("Message has no recipients")]
    NoRecipients,

    /// The message has no usable `From` header.
    #[error("Message has no sender")]
    MissingSender,

    #[error(transparent)]
    Pool(#[from] PoolError),

    /// The relay session failed or the relay refused the message.
    #[error("Transport error: {0}")]
    Transport(#[from] ClientError),
}

impl DeliveryError {
    /// Whether redelivering the same job can never succeed.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        match self {
            Self::InvalidJob(_) | Self::MalformedMessage(_) | Self::NoRecipients | Self::MissingSender => {
                true
            }
            Self::Transport(ClientError::SmtpError { code, .. }) => *code >= 500,
            Self::Transport(ClientError::RecipientsRefused(_) | ClientError::MessageTooLarge { .. }) => {
                true
            }
            Self::Pool(_) | Self::Transport(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permanent_classification() {
        assert!(DeliveryError::NoRecipients.is_permanent());
        assert!(DeliveryError::MissingSender.is_permanent());
        assert!(
            DeliveryError::Transport(ClientError::SmtpError {
                code: 550,
                message: "Mailbox unavailable".to_string(),
            })
            .is_permanent()
        );

        assert!(
            !DeliveryError::Transport(ClientError::SmtpError {
                code: 421,
                message: "Service not available".to_string(),
            })
            .is_permanent()
        );
        assert!(!DeliveryError::Pool(PoolError::Exhausted(Duration::from_secs(5))).is_permanent());
        assert!(!DeliveryError::Transport(ClientError::ConnectionClosed).is_permanent());
        assert!(
            DeliveryError::Transport(ClientError::MessageTooLarge { size: 20, limit: 10 })
                .is_permanent()
        );
    }

    #[test]
    fn test_pool_error_is_transparent() {
        let err = DeliveryError::from(PoolError::Exhausted(Duration::from_secs(5)));
        assert_eq!(err.to_string(), "No relay session became available within 5s");
    }
}
