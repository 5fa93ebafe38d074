use std::{collections::BTreeMap, sync::Arc};

use mailagent_broker::{Broker, BrokerConnector, Publication, QueueDeclaration};
use mailagent_common::{Signal, config::AgentConfig, internal};
use mailagent_delivery::{DeliveryProcessor, MailJob};
use mailagent_smtp::Connector;
use tokio::{sync::broadcast, task::JoinSet};

use crate::{
    error::WorkerError,
    handler::Handler,
    worker::{Worker, WorkerReport},
};

/// Runs the configured consumers.
///
/// The broker connector and relay connector are shared by every worker, but
/// each worker opens its own broker connection and builds its own pool from
/// the relay connector.
pub struct Agent<B, C> {
    config: AgentConfig,
    handlers: BTreeMap<String, Handler>,
    broker: Arc<B>,
    connector: C,
    shutdown: broadcast::Sender<Signal>,
}

impl<B: BrokerConnector, C: Connector + Clone> Agent<B, C> {
    /// Validate `config` and resolve every consumer's handler.
    pub fn new(config: AgentConfig, broker: B, connector: C) -> Result<Self, WorkerError> {
        config.validate()?;

        let handlers = config
            .consumers
            .iter()
            .map(|(queue, consumer)| {
                Handler::resolve(queue, &consumer.handler).map(|handler| (queue.clone(), handler))
            })
            .collect::<Result<BTreeMap<_, _>, _>>()?;

        let (shutdown, _) = broadcast::channel(16);

        Ok(Self {
            config,
            handlers,
            broker: Arc::new(broker),
            connector,
            shutdown,
        })
    }

    pub const fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Sender that stops every running worker when [`Signal::Shutdown`] is sent.
    pub fn shutdown_handle(&self) -> broadcast::Sender<Signal> {
        self.shutdown.clone()
    }

    /// Declare every configured queue on a connection opened just for that.
    pub async fn declare_queues(&self) -> Result<(), WorkerError> {
        let connection = self.broker.connect().await?;
        let result = declare(connection.as_ref(), &self.config).await;

        if let Err(e) = connection.close().await {
            tracing::warn!(error = %e, "Failed to close bookkeeping connection");
        }

        result
    }

    /// Build the `index`th worker for `queue`, numbered from one.
    pub fn worker(&self, queue: &str, index: usize) -> Result<Worker<C>, WorkerError> {
        let consumer = self
            .config
            .consumers
            .get(queue)
            .ok_or_else(|| WorkerError::UnknownQueue(queue.to_string()))?;

        if index == 0 || index > consumer.workers {
            return Err(WorkerError::UnknownWorker {
                queue: queue.to_string(),
                index,
                workers: consumer.workers,
            });
        }

        let handler = self
            .handlers
            .get(queue)
            .copied()
            .ok_or_else(|| WorkerError::UnknownQueue(queue.to_string()))?;

        Ok(Worker::new(
            queue,
            index,
            consumer,
            handler,
            DeliveryProcessor::from_config(self.connector.clone(), &self.config.relay),
        ))
    }

    /// Every worker the configuration asks for, in queue order.
    pub fn workers(&self) -> Result<Vec<Worker<C>>, WorkerError> {
        let mut workers = Vec::new();

        for (queue, consumer) in &self.config.consumers {
            for index in 1..=consumer.workers {
                workers.push(self.worker(queue, index)?);
            }
        }

        Ok(workers)
    }

    /// Declare the queues, start every worker and wait for all of them to stop.
    ///
    /// A worker that stops with an error is logged and not restarted.
    pub async fn run(&self) -> Result<(), WorkerError> {
        internal!(
            level = INFO,
            "Starting mailagent v{} with relay {}",
            env!("CARGO_PKG_VERSION"),
            self.config.relay.address()
        );

        self.declare_queues().await?;

        let mut tasks = JoinSet::new();
        for worker in self.workers()? {
            let broker = Arc::clone(&self.broker);
            let shutdown = self.shutdown.subscribe();

            tasks.spawn(async move {
                let name = worker.name().to_string();
                (name, worker.run(broker.as_ref(), shutdown).await)
            });
        }

        internal!(level = INFO, "Started {} workers", tasks.len());

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, Ok(report))) => {
                    tracing::info!(
                        worker = %name,
                        handled = report.handled,
                        failed = report.failed,
                        "Worker finished"
                    );
                }
                Ok((name, Err(e))) => {
                    tracing::error!(
                        worker = %name,
                        error = %e,
                        connection_lost = e.is_connection_error(),
                        "Worker exited with an error"
                    );
                }
                Err(e) => tracing::error!(error = %e, "Worker task failed"),
            }
        }

        internal!(level = INFO, "All workers stopped");
        Ok(())
    }

    /// Declare the queues and run a single worker in the current task.
    pub async fn run_worker(&self, queue: &str, index: usize) -> Result<WorkerReport, WorkerError> {
        let worker = self.worker(queue, index)?;
        self.declare_queues().await?;

        worker
            .run(self.broker.as_ref(), self.shutdown.subscribe())
            .await
    }

    /// Publish `job` persistently to `queue`.
    pub async fn publish(&self, queue: &str, job: &MailJob, priority: u8) -> Result<(), WorkerError> {
        if !self.config.queues.contains_key(queue) {
            return Err(WorkerError::UnknownQueue(queue.to_string()));
        }

        let connection = self.broker.connect().await?;
        let result = async {
            declare(connection.as_ref(), &self.config).await?;
            connection
                .publish(Publication::new(queue, job.to_vec()?).with_priority(priority))
                .await?;
            Ok::<_, WorkerError>(())
        }
        .await;

        if let Err(e) = connection.close().await {
            tracing::warn!(error = %e, "Failed to close publishing connection");
        }

        if result.is_ok() {
            internal!(level = INFO, "Published job {} to {}", job.outgoing_mail, queue);
        }
        result
    }
}

async fn declare(connection: &dyn Broker, config: &AgentConfig) -> Result<(), WorkerError> {
    for (name, queue) in &config.queues {
        connection
            .declare_queue(&QueueDeclaration::new(name.as_str(), queue))
            .await?;
        internal!(
            level = INFO,
            "Declared queue {} (durable: {}, max priority: {})",
            name,
            queue.durable,
            queue.max_priority
        );
    }

    Ok(())
}

/// A Procfile with one process per configured worker.
#[must_use]
pub fn procfile(config: &AgentConfig) -> String {
    let mut procfile = String::new();

    for (queue, consumer) in &config.consumers {
        let process = queue.replace("::", "-").replace(['/', '_'], "-");
        for index in 1..=consumer.workers {
            procfile.push_str(&format!(
                "consumer-{process}-{index}: mailagent worker {queue} {index}\n"
            ));
        }
    }

    procfile
}

/// Wait for Ctrl-C or SIGTERM, then tell every worker to stop.
pub async fn wait_for_signal(shutdown: broadcast::Sender<Signal>) -> std::io::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            internal!(level = INFO, "CTRL+C entered, shutting down");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate signal received, shutting down");
        }
    };

    // No receivers just means every worker has already stopped.
    let _ = shutdown.send(Signal::Shutdown);

    Ok(())
}

#[cfg(test)]
mod tests {
    use mailagent_broker::MemoryBroker;
    use mailagent_common::config::{ConsumerConfig, DEFAULT_QUEUE, QueueConfig};
    use mailagent_smtp::testing::TestConnector;
    use pretty_assertions::assert_eq;

    use super::*;

    fn config() -> AgentConfig {
        let mut config = AgentConfig::default();
        config.queues.insert(
            "mail::bulk".to_string(),
            QueueConfig {
                durable: true,
                max_priority: 5,
            },
        );
        config.consumers.insert(
            "mail::bulk".to_string(),
            ConsumerConfig {
                handler: "print_message".to_string(),
                workers: 2,
                ..ConsumerConfig::default()
            },
        );
        config
    }

    #[test]
    fn test_unknown_handler_is_rejected() {
        let mut config = config();
        config
            .consumers
            .get_mut(DEFAULT_QUEUE)
            .unwrap()
            .handler = "send_fax".to_string();

        let result = Agent::new(config, MemoryBroker::new(), TestConnector::new());
        assert!(matches!(result, Err(WorkerError::Config(_))));
    }

    #[test]
    fn test_workers_follow_configuration() {
        let agent = Agent::new(config(), MemoryBroker::new(), TestConnector::new()).unwrap();
        let workers = agent.workers().unwrap();
        let names: Vec<_> = workers.iter().map(Worker::name).collect();

        assert_eq!(
            names,
            vec![
                "consumer-mail::bulk-1",
                "consumer-mail::bulk-2",
                "consumer-mail::outgoing-1",
            ]
        );
        assert_eq!(workers[0].handler(), Handler::PrintMessage);
        assert_eq!(workers[2].handler(), Handler::SendMail);
    }

    #[test]
    fn test_worker_index_is_checked() {
        let agent = Agent::new(config(), MemoryBroker::new(), TestConnector::new()).unwrap();

        assert!(matches!(
            agent.worker("mail::bulk", 3),
            Err(WorkerError::UnknownWorker { workers: 2, .. })
        ));
        assert!(matches!(
            agent.worker("mail::bulk", 0),
            Err(WorkerError::UnknownWorker { .. })
        ));
        assert!(matches!(
            agent.worker("mail::missing", 1),
            Err(WorkerError::UnknownQueue(_))
        ));
    }

    #[tokio::test]
    async fn test_declare_queues() {
        let broker = MemoryBroker::new();
        let agent = Agent::new(config(), broker.clone(), TestConnector::new()).unwrap();

        agent.declare_queues().await.unwrap();

        assert_eq!(broker.declaration("mail::bulk").unwrap().max_priority, 5);
        assert!(broker.declaration(DEFAULT_QUEUE).is_some());
    }

    #[test]
    fn test_procfile() {
        assert_eq!(
            procfile(&config()),
            "consumer-mail-bulk-1: mailagent worker mail::bulk 1\n\
             consumer-mail-bulk-2: mailagent worker mail::bulk 2\n\
             consumer-mail-outgoing-1: mailagent worker mail::outgoing 1\n"
        );
    }
}
