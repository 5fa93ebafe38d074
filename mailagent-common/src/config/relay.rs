use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::tls::TlsConfig;

const fn default_port() -> u16 {
    25
}

fn default_host() -> String {
    String::from("localhost")
}

fn default_hello_name() -> String {
    String::from("localhost")
}

const fn default_pool_size() -> usize {
    5
}

const fn default_acquire_timeout() -> u64 {
    5
}

/// The SMTP relay every worker submits to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Default: `localhost`
    #[serde(default = "default_host")]
    pub host: String,

    /// Default: 25
    #[serde(default = "default_port")]
    pub port: u16,

    /// AUTH is only attempted when both a username and a password are set.
    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Identity sent with EHLO.
    #[serde(default = "default_hello_name")]
    pub hello_name: String,

    /// Maximum number of live sessions per worker.
    ///
    /// Default: 5
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// How long `acquire` waits for a session to be returned.
    ///
    /// Default: 5 seconds
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,

    /// Per-worker send ceiling. `0` disables throttling.
    #[serde(default)]
    pub max_sends_per_second: f64,

    #[serde(default)]
    pub tls: TlsConfig,

    #[serde(default)]
    pub timeouts: ClientTimeouts,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            username: None,
            password: None,
            hello_name: default_hello_name(),
            pool_size: default_pool_size(),
            acquire_timeout_secs: default_acquire_timeout(),
            max_sends_per_second: 0.0,
            tls: TlsConfig::default(),
            timeouts: ClientTimeouts::default(),
        }
    }
}

impl RelayConfig {
    /// `host:port` as accepted by `TcpStream::connect`.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Username and password, if both are configured and non-empty.
    #[must_use]
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => Some((user, pass)),
            _ => None,
        }
    }

    #[must_use]
    pub const fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

/// Client-side SMTP timeouts for the relay session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientTimeouts {
    /// Timeout for establishing the TCP connection.
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::connect_secs")]
    pub connect_secs: u64,

    /// Timeout for each command/reply exchange (EHLO, STARTTLS, AUTH, MAIL, RCPT).
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::command_secs")]
    pub command_secs: u64,

    /// Timeout for message transfer after DATA.
    ///
    /// Default: 120 seconds (2 minutes)
    #[serde(default = "defaults::data_secs")]
    pub data_secs: u64,

    /// Timeout for QUIT; never fails a delivery.
    ///
    /// Default: 10 seconds
    #[serde(default = "defaults::quit_secs")]
    pub quit_secs: u64,
}

impl Default for ClientTimeouts {
    fn default() -> Self {
        Self {
            connect_secs: defaults::connect_secs(),
            command_secs: defaults::command_secs(),
            data_secs: defaults::data_secs(),
            quit_secs: defaults::quit_secs(),
        }
    }
}

impl ClientTimeouts {
    #[must_use]
    pub const fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    #[must_use]
    pub const fn command(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }

    #[must_use]
    pub const fn data(&self) -> Duration {
        Duration::from_secs(self.data_secs)
    }

    #[must_use]
    pub const fn quit(&self) -> Duration {
        Duration::from_secs(self.quit_secs)
    }
}

mod defaults {
    pub const fn connect_secs() -> u64 {
        30
    }
    pub const fn command_secs() -> u64 {
        30
    }
    pub const fn data_secs() -> u64 {
        120 // 2 minutes
    }
    pub const fn quit_secs() -> u64 {
        10
    }
}
