//! Error types for the mailagent-common crate.

use std::{io, path::PathBuf};

use thiserror::Error;

/// Errors raised while loading or validating the agent configuration.
///
/// These are never recovered from: startup aborts with a non-zero exit status.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read configuration file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The configuration file is not valid RON for the expected layout.
    #[error("Failed to parse configuration file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: ron::error::SpannedError,
    },

    /// A `.env` file exists but could not be loaded.
    #[error("Failed to load .env file: {0}")]
    EnvFile(#[source] dotenvy::Error),

    /// A required setting is missing or empty.
    #[error("Missing required setting: {0}")]
    MissingField(&'static str),

    /// A setting is present but its value is unusable.
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    /// A consumer refers to a queue that has no declaration.
    #[error("Consumer refers to undeclared queue '{0}'")]
    UndeclaredQueue(String),

    /// A consumer names a handler that isn't registered.
    #[error("Unknown handler '{handler}' for queue '{queue}'")]
    UnknownHandler { queue: String, handler: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
