//! Configuration for the mail agent.
//!
//! The static layout (queues and their consumers) lives in a RON file. Connection
//! settings may be overridden from the environment, which is read once at startup.
//!
//! - [`relay`]: the SMTP relay, pool and rate settings
//! - [`broker`]: the message broker connection
//! - [`queues`]: queue declarations and consumer specs
//! - [`tls`]: transport encryption policy for the relay session

pub mod broker;
pub mod queues;
pub mod relay;
pub mod tls;

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    str::FromStr,
};

pub use broker::BrokerConfig;
pub use queues::{ConsumerConfig, QueueConfig};
pub use relay::{ClientTimeouts, RelayConfig};
use serde::{Deserialize, Serialize};
pub use tls::{TlsConfig, TlsPolicy};

use crate::error::ConfigError;

/// Queue used when the configuration file declares none.
pub const DEFAULT_QUEUE: &str = "mail::outgoing";

/// File read when no path is given explicitly.
pub const DEFAULT_CONFIG_FILE: &str = "mailagent.ron";

/// Environment variable naming an alternative configuration file.
pub const CONFIG_FILE_ENV: &str = "MAILAGENT_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub relay: RelayConfig,

    #[serde(default)]
    pub broker: BrokerConfig,

    /// Queues declared at startup, keyed by name.
    #[serde(default = "default_queues")]
    pub queues: BTreeMap<String, QueueConfig>,

    /// Consumers started by the orchestrator, keyed by queue name.
    #[serde(default = "default_consumers")]
    pub consumers: BTreeMap<String, ConsumerConfig>,
}

fn default_queues() -> BTreeMap<String, QueueConfig> {
    BTreeMap::from([(DEFAULT_QUEUE.to_string(), QueueConfig::default())])
}

fn default_consumers() -> BTreeMap<String, ConsumerConfig> {
    BTreeMap::from([(DEFAULT_QUEUE.to_string(), ConsumerConfig::default())])
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            relay: RelayConfig::default(),
            broker: BrokerConfig::default(),
            queues: default_queues(),
            consumers: default_consumers(),
        }
    }
}

impl AgentConfig {
    /// Parse a configuration from RON text.
    ///
    /// # Errors
    /// If the text is not a valid configuration.
    pub fn from_ron(path: &Path, content: &str) -> Result<Self, ConfigError> {
        ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .from_str(content)
            .map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Read the configuration file.
    ///
    /// An explicit `path` must exist. Without one, `MAILAGENT_CONFIG` is consulted,
    /// then `mailagent.ron` in the working directory; if neither exists the
    /// built-in defaults are used.
    ///
    /// # Errors
    /// If the file can't be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => std::env::var(CONFIG_FILE_ENV).map_or_else(
                |_| (PathBuf::from(DEFAULT_CONFIG_FILE), false),
                |path| (PathBuf::from(path), true),
            ),
        };

        if !required && !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;

        Self::from_ron(&path, &content)
    }

    /// Load `.env` (if present), read the file, apply the process environment and validate.
    ///
    /// # Errors
    /// Any [`ConfigError`]; these are fatal at startup. A missing `.env` is not an error,
    /// a malformed one is.
    pub fn from_environment(path: Option<&Path>) -> Result<Self, ConfigError> {
        env_file_loaded(dotenvy::dotenv())?;

        let mut config = Self::load(path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;

        Ok(config)
    }

    /// Override connection settings from environment-style variables.
    ///
    /// Empty values are treated as unset.
    ///
    /// # Errors
    /// If a numeric variable can't be parsed.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(host) = var("MAILAGENT_RELAY_HOST") {
            self.relay.host = host;
        }
        if let Some(port) = var("MAILAGENT_RELAY_PORT") {
            self.relay.port = parse("MAILAGENT_RELAY_PORT", &port)?;
        }
        if let Some(username) = var("MAILAGENT_RELAY_USERNAME") {
            self.relay.username = Some(username);
        }
        if let Some(password) = var("MAILAGENT_RELAY_PASSWORD") {
            self.relay.password = Some(password);
        }
        if let Some(size) = var("MAILAGENT_RELAY_POOL_SIZE") {
            self.relay.pool_size = parse("MAILAGENT_RELAY_POOL_SIZE", &size)?;
        }
        if let Some(rate) = var("MAILAGENT_MAX_SENDS_PER_SECOND") {
            self.relay.max_sends_per_second = parse("MAILAGENT_MAX_SENDS_PER_SECOND", &rate)?;
        }

        if let Some(host) = var("MAILAGENT_BROKER_HOST") {
            self.broker.host = host;
        }
        if let Some(port) = var("MAILAGENT_BROKER_PORT") {
            self.broker.port = parse("MAILAGENT_BROKER_PORT", &port)?;
        }
        if let Some(vhost) = var("MAILAGENT_BROKER_VHOST") {
            self.broker.virtual_host = vhost;
        }
        if let Some(username) = var("MAILAGENT_BROKER_USERNAME") {
            self.broker.username = Some(username);
        }
        if let Some(password) = var("MAILAGENT_BROKER_PASSWORD") {
            self.broker.password = Some(password);
        }

        Ok(())
    }

    /// Check the structural rules the rest of the agent relies on.
    ///
    /// Handler names are resolved by the agent itself, against its registry.
    ///
    /// # Errors
    /// The first rule that is violated.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.relay.host.trim().is_empty() {
            return Err(ConfigError::MissingField("relay.host"));
        }
        if self.relay.pool_size == 0 {
            return Err(ConfigError::invalid("relay.pool_size", "must be at least 1"));
        }
        if !self.relay.max_sends_per_second.is_finite() || self.relay.max_sends_per_second < 0.0 {
            return Err(ConfigError::invalid(
                "relay.max_sends_per_second",
                "must be a non-negative number",
            ));
        }
        if self.broker.host.trim().is_empty() {
            return Err(ConfigError::MissingField("broker.host"));
        }

        for (queue, consumer) in &self.consumers {
            if !self.queues.contains_key(queue) {
                return Err(ConfigError::UndeclaredQueue(queue.clone()));
            }
            if consumer.workers == 0 {
                return Err(ConfigError::invalid(
                    format!("consumers.{queue}.workers"),
                    "must be at least 1",
                ));
            }
            if consumer.prefetch == 0 {
                return Err(ConfigError::invalid(
                    format!("consumers.{queue}.prefetch"),
                    "must be at least 1",
                ));
            }
        }

        Ok(())
    }
}

fn env_file_loaded<T>(result: Result<T, dotenvy::Error>) -> Result<(), ConfigError> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.not_found() => Ok(()),
        Err(e) => Err(ConfigError::EnvFile(e)),
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|err: T::Err| ConfigError::invalid(key, err.to_string()))
}
