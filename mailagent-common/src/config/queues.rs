use serde::{Deserialize, Serialize};

const fn default_durable() -> bool {
    true
}

const fn default_workers() -> usize {
    1
}

const fn default_prefetch() -> u16 {
    1
}

fn default_handler() -> String {
    String::from("send_mail")
}

/// Declaration parameters for one queue.
///
/// Redeclaring with identical parameters is a no-op at the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Default: `true`
    #[serde(default = "default_durable")]
    pub durable: bool,

    /// Highest message priority the queue honours. `0` disables priorities.
    #[serde(default)]
    pub max_priority: u8,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            durable: default_durable(),
            max_priority: 0,
        }
    }
}

/// How a queue is consumed. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Registered handler invoked per message.
    ///
    /// Default: `send_mail`
    #[serde(default = "default_handler", alias = "callback")]
    pub handler: String,

    /// Number of independent workers started for the queue.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Maximum unacknowledged deliveries per worker.
    #[serde(default = "default_prefetch")]
    pub prefetch: u16,

    /// When set the broker treats a message as handled once delivered.
    #[serde(default)]
    pub auto_ack: bool,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            handler: default_handler(),
            workers: default_workers(),
            prefetch: default_prefetch(),
            auto_ack: false,
        }
    }
}
