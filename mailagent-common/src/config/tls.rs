//! TLS settings for the relay submission session.

use serde::{Deserialize, Serialize};

/// How STARTTLS is negotiated with the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TlsPolicy {
    /// Upgrade via STARTTLS, fail the session if the relay can't.
    #[default]
    Required,

    /// Upgrade when the relay advertises STARTTLS, otherwise stay in plaintext.
    Opportunistic,

    /// Never upgrade.
    ///
    /// **WARNING**: Only use for testing against a local relay.
    Disabled,
}

/// Complete TLS configuration for the relay session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TlsConfig {
    /// TLS negotiation policy.
    ///
    /// Default: `Required`
    #[serde(default)]
    pub policy: TlsPolicy,

    /// Whether to accept invalid TLS certificates (self-signed, expired, etc.).
    ///
    /// **SECURITY WARNING**: disables certificate validation.
    ///
    /// Default: `false`
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl TlsConfig {
    /// TLS required, certificates validated.
    #[must_use]
    pub const fn required() -> Self {
        Self {
            policy: TlsPolicy::Required,
            accept_invalid_certs: false,
        }
    }

    /// No TLS at all.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            policy: TlsPolicy::Disabled,
            accept_invalid_certs: false,
        }
    }

    #[must_use]
    pub const fn is_required(&self) -> bool {
        matches!(self.policy, TlsPolicy::Required)
    }

    #[must_use]
    pub const fn is_disabled(&self) -> bool {
        matches!(self.policy, TlsPolicy::Disabled)
    }
}
