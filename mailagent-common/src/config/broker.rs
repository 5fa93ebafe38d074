use serde::{Deserialize, Serialize};

const fn default_port() -> u16 {
    5672
}

fn default_host() -> String {
    String::from("localhost")
}

fn default_virtual_host() -> String {
    String::from("/")
}

/// Connection settings for the message broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_virtual_host")]
    pub virtual_host: String,

    /// The broker's default credentials are used unless both halves are set.
    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            virtual_host: default_virtual_host(),
            username: None,
            password: None,
        }
    }
}

impl BrokerConfig {
    #[must_use]
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => Some((user, pass)),
            _ => None,
        }
    }
}
