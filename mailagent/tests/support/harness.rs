//! Runs an [`Agent`] against the in-memory broker and the recording relay.
//!
//! ```no_run
//! let harness = AgentHarness::new(AgentHarness::config(1, 1));
//! harness.publish(&job(1, &["a@x"]), 0).await;
//! let worker = harness.spawn_worker(1);
//! assert!(harness.connector.wait_for_sent(1, Duration::from_secs(5)).await);
//! harness.stop(worker).await;
//! ```

use std::{sync::Arc, time::Duration};

use mailagent::{Agent, WorkerError, WorkerReport};
use mailagent_broker::MemoryBroker;
use mailagent_common::{
    Signal,
    config::{AgentConfig, ConsumerConfig, DEFAULT_QUEUE, QueueConfig},
};
use mailagent_delivery::{JobId, MailJob};
use mailagent_smtp::testing::TestConnector;
use tokio::{sync::broadcast, task::JoinHandle};

pub struct AgentHarness {
    pub broker: MemoryBroker,
    pub connector: TestConnector,
    pub agent: Arc<Agent<MemoryBroker, TestConnector>>,
    shutdown: broadcast::Sender<Signal>,
}

impl AgentHarness {
    /// One queue, `mail::outgoing`, with priorities up to 10 and a `send_mail` consumer.
    pub fn config(workers: usize, prefetch: u16) -> AgentConfig {
        let mut config = AgentConfig::default();
        config.queues.insert(
            DEFAULT_QUEUE.to_string(),
            QueueConfig {
                durable: true,
                max_priority: 10,
            },
        );
        config.consumers.insert(
            DEFAULT_QUEUE.to_string(),
            ConsumerConfig {
                workers,
                prefetch,
                ..ConsumerConfig::default()
            },
        );
        config
    }

    pub fn new(config: AgentConfig) -> Self {
        let broker = MemoryBroker::new();
        let connector = TestConnector::new();
        let agent = Agent::new(config, broker.clone(), connector.clone())
            .expect("valid agent configuration");
        let shutdown = agent.shutdown_handle();

        Self {
            broker,
            connector,
            agent: Arc::new(agent),
            shutdown,
        }
    }

    pub async fn publish(&self, job: &MailJob, priority: u8) {
        self.agent
            .publish(DEFAULT_QUEUE, job, priority)
            .await
            .expect("publish job");
    }

    /// Run every configured worker in the background.
    pub fn spawn_agent(&self) -> JoinHandle<Result<(), WorkerError>> {
        let agent = Arc::clone(&self.agent);
        tokio::spawn(async move { agent.run().await })
    }

    /// Run worker `index` of the default queue in the background.
    pub fn spawn_worker(&self, index: usize) -> JoinHandle<Result<WorkerReport, WorkerError>> {
        let agent = Arc::clone(&self.agent);
        tokio::spawn(async move { agent.run_worker(DEFAULT_QUEUE, index).await })
    }

    /// Signal shutdown and wait for `handle` to finish.
    pub async fn stop<T>(&self, handle: JoinHandle<T>) -> T {
        let _ = self.shutdown.send(Signal::Shutdown);

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("worker stops after shutdown")
            .expect("worker task completes")
    }

    pub fn ready(&self) -> usize {
        self.broker.ready(DEFAULT_QUEUE)
    }

    pub fn unacked(&self) -> usize {
        self.broker.unacked(DEFAULT_QUEUE)
    }
}

/// A job addressed to `recipients` through its `To` header.
pub fn job(id: u64, recipients: &[&str]) -> MailJob {
    MailJob {
        outgoing_mail: JobId::Number(id),
        message: format!(
            "From: Sender <sender@example.org>\r\nTo: {}\r\nSubject: Job {id}\r\n\r\nHello\r\n",
            recipients.join(", ")
        ),
        recipients: Vec::new(),
    }
}

/// Poll `condition` until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    tokio::time::timeout(timeout, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}
