use std::fmt;

use async_trait::async_trait;
use mailagent_common::config::QueueConfig;

use crate::error::Result;

/// Parameters a queue is declared with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDeclaration {
    pub name: String,
    pub durable: bool,
    /// `0` declares the queue without priority support.
    pub max_priority: u8,
}

impl QueueDeclaration {
    #[must_use]
    pub fn new(name: impl Into<String>, config: &QueueConfig) -> Self {
        Self {
            name: name.into(),
            durable: config.durable,
            max_priority: config.max_priority,
        }
    }
}

/// A message to publish through the default exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub routing_key: String,
    pub body: Vec<u8>,
    pub priority: u8,
    /// Ask the broker to write the message to disk (delivery mode 2).
    pub persistent: bool,
}

impl Publication {
    /// A persistent, priority 0 message for `queue`.
    #[must_use]
    pub fn new(queue: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            routing_key: queue.into(),
            body: body.into(),
            priority: 0,
            persistent: true,
        }
    }

    #[must_use]
    pub const fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }
}

/// How a subscription consumes its queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumeOptions {
    /// Identifies the consumer to the broker.
    pub consumer_tag: String,
    /// Maximum number of unacknowledged deliveries held at once.
    pub prefetch: u16,
    /// Deliveries count as handled as soon as they are sent.
    pub auto_ack: bool,
}

/// Settles a delivery with the broker that sent it.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// # Errors
    /// If the broker no longer knows the delivery or the channel is gone.
    async fn ack(&self, tag: u64) -> Result<()>;
}

/// One message handed to a consumer.
pub struct Delivery {
    pub tag: u64,
    pub body: Vec<u8>,
    /// The broker delivered this message before without it being acknowledged.
    pub redelivered: bool,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    #[must_use]
    pub fn new(
        tag: u64,
        body: Vec<u8>,
        redelivered: bool,
        acker: Box<dyn Acknowledger>,
    ) -> Self {
        Self {
            tag,
            body,
            redelivered,
            acker,
        }
    }

    /// Acknowledge the delivery, removing it from the queue.
    ///
    /// # Errors
    /// See [`Acknowledger::ack`].
    pub async fn ack(&self) -> Result<()> {
        self.acker.ack(self.tag).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("tag", &self.tag)
            .field("len", &self.body.len())
            .field("redelivered", &self.redelivered)
            .finish_non_exhaustive()
    }
}
