use async_trait::async_trait;

use crate::{
    error::Result,
    types::{ConsumeOptions, Delivery, Publication, QueueDeclaration},
};

/// One open connection to a message broker.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Declare a queue. Redeclaring with identical parameters is a no-op.
    ///
    /// # Errors
    /// If the declaration conflicts with an existing queue or the broker is unreachable.
    async fn declare_queue(&self, queue: &QueueDeclaration) -> Result<()>;

    /// # Errors
    /// If the broker refuses the message.
    async fn publish(&self, publication: Publication) -> Result<()>;

    /// Start consuming `queue`. Dropping the subscription returns any unacknowledged
    /// deliveries to the queue.
    ///
    /// # Errors
    /// If the queue doesn't exist or the consumer can't be registered.
    async fn subscribe(&self, queue: &str, options: &ConsumeOptions)
    -> Result<Box<dyn Subscription>>;

    /// Close the connection.
    ///
    /// # Errors
    /// If the broker doesn't confirm the close.
    async fn close(&self) -> Result<()>;
}

/// A stream of deliveries from one queue.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next delivery. `None` once the consumer has been cancelled.
    async fn next(&mut self) -> Option<Result<Delivery>>;
}

/// Opens broker connections; each worker owns the one it opens.
#[async_trait]
pub trait BrokerConnector: Send + Sync + 'static {
    /// # Errors
    /// If the broker can't be reached or refuses the credentials.
    async fn connect(&self) -> Result<Box<dyn Broker>>;
}
