use mailagent_broker::BrokerError;
use mailagent_common::ConfigError;
use mailagent_delivery::DeliveryError;
use thiserror::Error;

/// Errors that stop a worker, or the agent before any worker starts.
///
/// Individual delivery failures are not in here; they leave the message
/// unacknowledged and the worker carries on.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Connecting, declaring or consuming failed.
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    /// A job could not be built for publishing.
    #[error("Invalid job: {0}")]
    Job(#[from] DeliveryError),

    /// No consumer is configured for the queue.
    #[error("No consumer configured for queue '{0}'")]
    UnknownQueue(String),

    /// Worker numbers start at one and stop at the configured count.
    #[error("Queue '{queue}' has {workers} workers, there is no worker {index}")]
    UnknownWorker {
        queue: String,
        index: usize,
        workers: usize,
    },
}

impl WorkerError {
    /// Whether the broker connection itself has gone away.
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Broker(e) if e.is_connection_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_classification() {
        assert!(WorkerError::from(BrokerError::Closed).is_connection_error());
        assert!(!WorkerError::from(BrokerError::UnknownDeliveryTag(3)).is_connection_error());
        assert!(!WorkerError::UnknownQueue("mail::outgoing".to_string()).is_connection_error());
    }
}
