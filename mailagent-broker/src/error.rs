//! Error types for the mailagent-broker crate.

use thiserror::Error;

/// Failures talking to the message broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The AMQP client reported an error (connect, declare, publish, consume, ack).
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),

    /// The queue has not been declared.
    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    /// A redeclaration disagrees with the existing queue.
    #[error("Queue '{queue}' already declared with different parameters: {reason}")]
    PreconditionFailed { queue: String, reason: String },

    /// An acknowledgement named a delivery that isn't outstanding.
    #[error("Unknown delivery tag: {0}")]
    UnknownDeliveryTag(u64),

    /// The broker negatively acknowledged a published message.
    #[error("Broker did not accept the message published to {0}")]
    NotConfirmed(String),

    /// The connection or subscription has been closed.
    #[error("Broker connection closed")]
    Closed,
}

impl BrokerError {
    /// Whether the failure concerns the connection itself rather than one request.
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Closed
                | Self::Amqp(
                    lapin::Error::IOError(_)
                        | lapin::Error::InvalidConnectionState(_)
                        | lapin::Error::InvalidChannelState(_)
                )
        )
    }
}

/// Specialized `Result` type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            BrokerError::QueueNotFound("mail::outgoing".to_string()).to_string(),
            "Queue not found: mail::outgoing"
        );
        assert_eq!(
            BrokerError::PreconditionFailed {
                queue: "mail::outgoing".to_string(),
                reason: "durable differs".to_string(),
            }
            .to_string(),
            "Queue 'mail::outgoing' already declared with different parameters: durable differs"
        );
    }

    #[test]
    fn test_connection_classification() {
        assert!(BrokerError::Closed.is_connection_error());
        assert!(!BrokerError::UnknownDeliveryTag(7).is_connection_error());
        assert!(!BrokerError::QueueNotFound(String::new()).is_connection_error());
    }
}
