//! The handlers a consumer can be configured with.
//!
//! Consumers name their handler in the configuration; the name is resolved
//! against [`REGISTRY`] once at startup.

use mailagent_common::ConfigError;
use mailagent_delivery::{DeliveryError, DeliveryProcessor};
use mailagent_smtp::Connector;

/// Every handler, by configured name.
pub const REGISTRY: [(&str, Handler); 2] = [
    ("send_mail", Handler::SendMail),
    ("print_message", Handler::PrintMessage),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
    /// Deliver the job through the relay.
    SendMail,
    /// Log the job payload and acknowledge it.
    PrintMessage,
}

impl Handler {
    #[must_use]
    pub fn lookup(name: &str) -> Option<Self> {
        REGISTRY
            .iter()
            .find(|(registered, _)| *registered == name)
            .map(|(_, handler)| *handler)
    }

    /// Resolve the handler configured for `queue`.
    pub fn resolve(queue: &str, name: &str) -> Result<Self, ConfigError> {
        Self::lookup(name).ok_or_else(|| ConfigError::UnknownHandler {
            queue: queue.to_string(),
            handler: name.to_string(),
        })
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::SendMail => "send_mail",
            Self::PrintMessage => "print_message",
        }
    }

    /// Handle one queue message. `Ok` means the message may be acknowledged.
    pub async fn handle<C: Connector>(
        self,
        processor: &DeliveryProcessor<C>,
        body: &[u8],
    ) -> Result<(), DeliveryError> {
        match self {
            Self::SendMail => processor.process_body(body).await,
            Self::PrintMessage => print_message(body),
        }
    }
}

fn print_message(body: &[u8]) -> Result<(), DeliveryError> {
    let payload: serde_json::Value = serde_json::from_slice(body)?;
    let rendered = serde_json::to_string_pretty(&payload)?;

    tracing::info!("Received message:\n{rendered}");

    Ok(())
}
