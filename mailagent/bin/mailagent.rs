//! Command-line entry point for the mail agent
//!
//! - `start` runs every configured worker in this process
//! - `worker` runs a single worker, for external process supervisors
//! - `procfile` prints one process line per configured worker
//! - `publish` wraps a raw message into a job and queues it

#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use mailagent::{Agent, procfile, wait_for_signal};
use mailagent_broker::AmqpConnector;
use mailagent_common::{config::AgentConfig, logging};
use mailagent_delivery::{JobId, MailJob};
use mailagent_smtp::SubmissionConnector;

/// Relay mail jobs from AMQP queues to an SMTP server
#[derive(Parser, Debug)]
#[command(name = "mailagent")]
#[command(version)]
struct Cli {
    /// Configuration file (RON). Defaults to `MAILAGENT_CONFIG`, then ./mailagent.ron
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Declare the queues and run every configured worker
    Start,
    /// Run a single worker
    Worker {
        /// Queue the worker consumes
        queue: String,
        /// Worker number, starting at 1
        index: usize,
    },
    /// Print a Procfile with one line per worker
    Procfile,
    /// Publish a raw RFC 5322 message as a mail job
    Publish {
        /// Queue to publish to
        queue: String,
        /// File holding the message
        file: PathBuf,
        /// Job identifier, defaults to the file name
        #[arg(long)]
        id: Option<String>,
        /// Message priority
        #[arg(long, default_value_t = 0)]
        priority: u8,
        /// Envelope recipient; when omitted they are taken from the headers
        #[arg(long = "recipient")]
        recipients: Vec<String>,
    },
}

type MailAgent = Agent<AmqpConnector, SubmissionConnector>;

fn agent(config: AgentConfig, name: &str) -> anyhow::Result<MailAgent> {
    let broker = AmqpConnector::new(&config.broker).with_connection_name(name);
    let relay = SubmissionConnector::new(config.relay.clone());

    Ok(Agent::new(config, broker, relay)?)
}

fn job_id(file: &Path, id: Option<String>) -> JobId {
    JobId::Text(id.unwrap_or_else(|| {
        file.file_name()
            .map_or_else(|| file.display().to_string(), |name| name.to_string_lossy().into_owned())
    }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let cli = Cli::parse();
    let config = AgentConfig::from_environment(cli.config.as_deref())?;

    match cli.command {
        Commands::Start => {
            let agent = agent(config, "mailagent")?;
            let signals = tokio::spawn(wait_for_signal(agent.shutdown_handle()));

            let result = agent.run().await;
            signals.abort();
            result?;
        }
        Commands::Worker { queue, index } => {
            let agent = agent(config, &mailagent::worker_name(&queue, index))?;
            let signals = tokio::spawn(wait_for_signal(agent.shutdown_handle()));

            let result = agent.run_worker(&queue, index).await;
            signals.abort();
            result?;
        }
        Commands::Procfile => {
            let agent = agent(config, "mailagent")?;
            print!("{}", procfile(agent.config()));
        }
        Commands::Publish {
            queue,
            file,
            id,
            priority,
            recipients,
        } => {
            let message = tokio::fs::read_to_string(&file).await.map_err(|e| {
                anyhow::anyhow!("Failed to read message from {}: {}", file.display(), e)
            })?;

            let job = MailJob {
                outgoing_mail: job_id(&file, id),
                message,
                recipients,
            };
            // Reject jobs that could never be delivered before they reach the queue.
            job.prepare()?;

            agent(config, "mailagent-publish")?
                .publish(&queue, &job, priority)
                .await?;
        }
    }

    Ok(())
}
