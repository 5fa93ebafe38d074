use std::{
    cmp::Ordering,
    collections::{BinaryHeap, HashMap},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering as AtomicOrdering},
    },
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::{
    broker::{Broker, BrokerConnector, Subscription},
    error::{BrokerError, Result},
    types::{Acknowledger, ConsumeOptions, Delivery, Publication, QueueDeclaration},
};

/// In-process broker with AMQP-like queue semantics.
///
/// Intended for tests and single-process runs. It honours:
/// - priority ordering (highest first, FIFO within a priority), clamped to the queue's
///   `max_priority`
/// - the prefetch window of each subscription
/// - redelivery of unacknowledged messages when a subscription is dropped
///
/// Every clone, and every connection opened from it, shares the same queues.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<State>,
    changed: Notify,
    consumers: AtomicU64,
}

#[derive(Debug, Default)]
struct State {
    queues: HashMap<String, MemoryQueue>,
    next_tag: u64,
    next_sequence: u64,
}

#[derive(Debug)]
struct MemoryQueue {
    declaration: QueueDeclaration,
    ready: BinaryHeap<Queued>,
    unacked: HashMap<u64, Outstanding>,
}

#[derive(Debug)]
struct Outstanding {
    consumer: u64,
    message: Queued,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Queued {
    priority: u8,
    sequence: u64,
    body: Vec<u8>,
    redelivered: bool,
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl MemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages waiting to be delivered.
    #[must_use]
    pub fn ready(&self, queue: &str) -> usize {
        self.inner
            .state
            .lock()
            .queues
            .get(queue)
            .map_or(0, |q| q.ready.len())
    }

    /// Messages delivered but not yet acknowledged.
    #[must_use]
    pub fn unacked(&self, queue: &str) -> usize {
        self.inner
            .state
            .lock()
            .queues
            .get(queue)
            .map_or(0, |q| q.unacked.len())
    }

    #[must_use]
    pub fn declaration(&self, queue: &str) -> Option<QueueDeclaration> {
        self.inner
            .state
            .lock()
            .queues
            .get(queue)
            .map(|q| q.declaration.clone())
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn declare_queue(&self, queue: &QueueDeclaration) -> Result<()> {
        let mut state = self.inner.state.lock();

        if let Some(existing) = state.queues.get(&queue.name) {
            if existing.declaration != *queue {
                return Err(BrokerError::PreconditionFailed {
                    queue: queue.name.clone(),
                    reason: format!("existing {:?}, requested {queue:?}", existing.declaration),
                });
            }
            return Ok(());
        }

        state.queues.insert(
            queue.name.clone(),
            MemoryQueue {
                declaration: queue.clone(),
                ready: BinaryHeap::new(),
                unacked: HashMap::new(),
            },
        );

        Ok(())
    }

    async fn publish(&self, publication: Publication) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            let sequence = state.next_sequence;
            state.next_sequence += 1;

            let queue = state
                .queues
                .get_mut(&publication.routing_key)
                .ok_or_else(|| BrokerError::QueueNotFound(publication.routing_key.clone()))?;

            let priority = publication.priority.min(queue.declaration.max_priority);
            queue.ready.push(Queued {
                priority,
                sequence,
                body: publication.body,
                redelivered: false,
            });
        }

        self.inner.changed.notify_waiters();
        Ok(())
    }

    async fn subscribe(
        &self,
        queue: &str,
        options: &ConsumeOptions,
    ) -> Result<Box<dyn Subscription>> {
        if !self.inner.state.lock().queues.contains_key(queue) {
            return Err(BrokerError::QueueNotFound(queue.to_string()));
        }

        let consumer = self.inner.consumers.fetch_add(1, AtomicOrdering::Relaxed);
        tracing::debug!(queue, consumer = %options.consumer_tag, "Memory subscription started");

        Ok(Box::new(MemorySubscription {
            inner: Arc::clone(&self.inner),
            queue: queue.to_string(),
            consumer,
            prefetch: usize::from(options.prefetch.max(1)),
            auto_ack: options.auto_ack,
        }))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl BrokerConnector for MemoryBroker {
    async fn connect(&self) -> Result<Box<dyn Broker>> {
        Ok(Box::new(self.clone()))
    }
}

struct MemorySubscription {
    inner: Arc<Inner>,
    queue: String,
    consumer: u64,
    prefetch: usize,
    auto_ack: bool,
}

impl MemorySubscription {
    fn try_take(&self) -> Result<Option<Delivery>> {
        let mut state = self.inner.state.lock();
        let tag = state.next_tag + 1;

        let queue = state
            .queues
            .get_mut(&self.queue)
            .ok_or_else(|| BrokerError::QueueNotFound(self.queue.clone()))?;

        if !self.auto_ack {
            let outstanding = queue
                .unacked
                .values()
                .filter(|o| o.consumer == self.consumer)
                .count();
            if outstanding >= self.prefetch {
                return Ok(None);
            }
        }

        let Some(message) = queue.ready.pop() else {
            return Ok(None);
        };

        let delivery = Delivery::new(
            tag,
            message.body.clone(),
            message.redelivered,
            Box::new(MemoryAcker {
                inner: Arc::clone(&self.inner),
                queue: self.queue.clone(),
            }),
        );

        if !self.auto_ack {
            queue.unacked.insert(
                tag,
                Outstanding {
                    consumer: self.consumer,
                    message,
                },
            );
        }

        state.next_tag = tag;
        Ok(Some(delivery))
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self) -> Option<Result<Delivery>> {
        loop {
            let mut changed = std::pin::pin!(self.inner.changed.notified());
            changed.as_mut().enable();

            match self.try_take() {
                Ok(Some(delivery)) => return Some(Ok(delivery)),
                Ok(None) => {}
                Err(err) => return Some(Err(err)),
            }

            changed.await;
        }
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        {
            let mut state = self.inner.state.lock();
            let Some(queue) = state.queues.get_mut(&self.queue) else {
                return;
            };

            let tags: Vec<u64> = queue
                .unacked
                .iter()
                .filter(|(_, o)| o.consumer == self.consumer)
                .map(|(tag, _)| *tag)
                .collect();

            for tag in tags {
                if let Some(Outstanding { mut message, .. }) = queue.unacked.remove(&tag) {
                    message.redelivered = true;
                    queue.ready.push(message);
                }
            }
        }

        self.inner.changed.notify_waiters();
    }
}

struct MemoryAcker {
    inner: Arc<Inner>,
    queue: String,
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self, tag: u64) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            let queue = state
                .queues
                .get_mut(&self.queue)
                .ok_or_else(|| BrokerError::QueueNotFound(self.queue.clone()))?;

            queue
                .unacked
                .remove(&tag)
                .ok_or(BrokerError::UnknownDeliveryTag(tag))?;
        }

        self.inner.changed.notify_waiters();
        Ok(())
    }
}
