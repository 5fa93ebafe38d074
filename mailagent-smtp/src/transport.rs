//! The seam between the connection pool and the relay.

use std::sync::Arc;

use async_trait::async_trait;
use mailagent_common::config::RelayConfig;

use crate::client::{ClientError, SmtpSession};

/// A live session that can carry mail transactions.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Submit one message. Returns the recipients the relay refused.
    ///
    /// # Errors
    /// If the transaction fails as a whole.
    async fn send_mail(
        &mut self,
        from: &str,
        recipients: &[String],
        message: &str,
    ) -> Result<Vec<String>, ClientError>;

    /// Abandon whatever transaction is in progress.
    ///
    /// # Errors
    /// If the session can't be brought back to a clean state.
    async fn reset(&mut self) -> Result<(), ClientError>;

    /// End the session. Never fails; errors are only logged.
    async fn quit(&mut self);
}

/// Opens new [`Transport`]s on demand.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Transport: Transport;

    /// Open a session that is ready to accept mail.
    ///
    /// # Errors
    /// If connecting, encryption or authentication fails.
    async fn connect(&self) -> Result<Self::Transport, ClientError>;
}

#[async_trait]
impl Transport for SmtpSession {
    async fn send_mail(
        &mut self,
        from: &str,
        recipients: &[String],
        message: &str,
    ) -> Result<Vec<String>, ClientError> {
        Self::send_mail(self, from, recipients, message).await
    }

    async fn reset(&mut self) -> Result<(), ClientError> {
        Self::reset(self).await
    }

    async fn quit(&mut self) {
        Self::quit(self).await;
    }
}

/// Opens [`SmtpSession`]s to the configured relay.
#[derive(Debug, Clone)]
pub struct SubmissionConnector {
    relay: Arc<RelayConfig>,
}

impl SubmissionConnector {
    #[must_use]
    pub fn new(relay: RelayConfig) -> Self {
        Self {
            relay: Arc::new(relay),
        }
    }

    #[must_use]
    pub fn relay(&self) -> &RelayConfig {
        &self.relay
    }
}

#[async_trait]
impl Connector for SubmissionConnector {
    type Transport = SmtpSession;

    async fn connect(&self) -> Result<SmtpSession, ClientError> {
        SmtpSession::open(&self.relay).await
    }
}
