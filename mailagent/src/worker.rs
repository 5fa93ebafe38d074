//! A single queue consumer.
//!
//! A worker owns one broker connection, one relay pool and one rate limiter.
//! It processes deliveries strictly one at a time, in the order the broker
//! hands them out, and acknowledges a delivery only after its handler succeeds.

use mailagent_broker::{BrokerConnector, ConsumeOptions, Delivery, Subscription};
use mailagent_common::{Signal, config::ConsumerConfig, incoming, internal};
use mailagent_delivery::DeliveryProcessor;
use mailagent_smtp::Connector;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{error, warn};

use crate::{error::WorkerError, handler::Handler};

/// Name of the `index`th worker on `queue`, also used as its consumer tag.
#[must_use]
pub fn worker_name(queue: &str, index: usize) -> String {
    format!("consumer-{queue}-{index}")
}

/// Counts of what a worker did before it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    /// Deliveries whose handler succeeded.
    pub handled: usize,
    /// Deliveries left unacknowledged.
    pub failed: usize,
}

pub struct Worker<C: Connector> {
    name: String,
    queue: String,
    handler: Handler,
    options: ConsumeOptions,
    processor: DeliveryProcessor<C>,
}

impl<C: Connector> Worker<C> {
    pub fn new(
        queue: &str,
        index: usize,
        consumer: &ConsumerConfig,
        handler: Handler,
        processor: DeliveryProcessor<C>,
    ) -> Self {
        let name = worker_name(queue, index);

        Self {
            options: ConsumeOptions {
                consumer_tag: name.clone(),
                prefetch: consumer.prefetch,
                auto_ack: consumer.auto_ack,
            },
            name,
            queue: queue.to_string(),
            handler,
            processor,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub const fn handler(&self) -> Handler {
        self.handler
    }

    /// Consume until shutdown is signalled or the broker cancels the subscription.
    ///
    /// The relay pool and the broker connection are closed on the way out, which
    /// also returns anything still unacknowledged to the queue.
    #[tracing::instrument(level = "info", skip_all, fields(worker = %self.name))]
    pub async fn run<B: BrokerConnector + ?Sized>(
        self,
        broker: &B,
        mut shutdown: broadcast::Receiver<Signal>,
    ) -> Result<WorkerReport, WorkerError> {
        let connection = broker.connect().await?;

        let result = match connection.subscribe(&self.queue, &self.options).await {
            Ok(subscription) => self.consume(subscription, &mut shutdown).await,
            Err(e) => Err(e.into()),
        };

        self.processor.shutdown().await;
        if let Err(e) = connection.close().await {
            warn!(error = %e, "Failed to close broker connection");
        }

        internal!(level = INFO, "{} stopped", self.name);
        result
    }

    async fn consume(
        &self,
        mut subscription: Box<dyn Subscription>,
        shutdown: &mut broadcast::Receiver<Signal>,
    ) -> Result<WorkerReport, WorkerError> {
        internal!(
            level = INFO,
            "{} consuming {} with handler {} (prefetch {})",
            self.name,
            self.queue,
            self.handler.name(),
            self.options.prefetch
        );

        let mut report = WorkerReport::default();

        loop {
            let next = tokio::select! {
                biased;

                signal = shutdown.recv() => match signal {
                    Ok(Signal::Shutdown) | Err(RecvError::Closed) => break,
                    Err(RecvError::Lagged(_)) => continue,
                },
                next = subscription.next() => next,
            };

            let Some(delivery) = next else {
                internal!(level = INFO, "{} subscription cancelled by broker", self.name);
                break;
            };

            if self.dispatch(&delivery?).await {
                report.handled += 1;
            } else {
                report.failed += 1;
            }
        }

        Ok(report)
    }

    /// Run the handler for one delivery. Returns whether it succeeded.
    async fn dispatch(&self, delivery: &Delivery) -> bool {
        incoming!(
            level = DEBUG,
            "{} received delivery {} ({} bytes, redelivered: {})",
            self.name,
            delivery.tag,
            delivery.body.len(),
            delivery.redelivered
        );

        match self.handler.handle(&self.processor, &delivery.body).await {
            Ok(()) => {
                if !self.options.auto_ack
                    && let Err(e) = delivery.ack().await
                {
                    error!(tag = delivery.tag, error = %e, "Failed to acknowledge delivery");
                }
                true
            }
            Err(e) => {
                warn!(
                    tag = delivery.tag,
                    permanent = e.is_permanent(),
                    error = %e,
                    "Delivery left unacknowledged for redelivery"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_name() {
        assert_eq!(worker_name("mail::outgoing", 1), "consumer-mail::outgoing-1");
    }
}
