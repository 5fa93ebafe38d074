pub mod config;
pub mod error;
pub mod logging;

pub use error::ConfigError;
pub use tracing;

/// Process-wide lifecycle signal broadcast to every worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
}
