//! In-process stand-in for the relay.
//!
//! [`TestConnector`] hands out [`TestTransport`]s that record every message instead of
//! sending it, and can be scripted to fail connects or sends.

use std::{collections::VecDeque, sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::{
    client::ClientError,
    transport::{Connector, Transport},
};

/// A message accepted by a [`TestTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMail {
    pub from: String,
    pub recipients: Vec<String>,
    pub message: String,
}

/// A scripted failure for the next send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// The relay answers with this reply code; the session stays usable.
    Rejected(u16),
    /// The connection drops mid-transaction.
    ConnectionLost,
}

impl Failure {
    fn into_error(self) -> ClientError {
        match self {
            Self::Rejected(code) => ClientError::SmtpError {
                code,
                message: "Rejected by test relay".to_string(),
            },
            Self::ConnectionLost => ClientError::ConnectionClosed,
        }
    }
}

#[derive(Debug, Default)]
struct TestState {
    sent: Vec<SentMail>,
    connects: usize,
    live: usize,
    peak_live: usize,
    quits: usize,
    resets: usize,
    failing_connects: usize,
    failing_sends: VecDeque<Failure>,
    send_delay: Option<Duration>,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<TestState>,
    sent: Notify,
}

/// Recording [`Connector`]. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct TestConnector {
    shared: Arc<Shared>,
}

impl TestConnector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Each send takes this long before it is recorded.
    #[must_use]
    pub fn with_send_delay(self, delay: Duration) -> Self {
        self.shared.state.lock().send_delay = Some(delay);
        self
    }

    /// Fail the next `count` connection attempts.
    pub fn fail_connects(&self, count: usize) {
        self.shared.state.lock().failing_connects += count;
    }

    /// Fail the next send, on whichever session performs it.
    pub fn fail_next_send(&self, failure: Failure) {
        self.shared.state.lock().failing_sends.push_back(failure);
    }

    #[must_use]
    pub fn sent(&self) -> Vec<SentMail> {
        self.shared.state.lock().sent.clone()
    }

    /// Sessions opened so far.
    #[must_use]
    pub fn connects(&self) -> usize {
        self.shared.state.lock().connects
    }

    /// Sessions currently open.
    #[must_use]
    pub fn live(&self) -> usize {
        self.shared.state.lock().live
    }

    /// Highest number of sessions that were open at the same time.
    #[must_use]
    pub fn peak_live(&self) -> usize {
        self.shared.state.lock().peak_live
    }

    #[must_use]
    pub fn quits(&self) -> usize {
        self.shared.state.lock().quits
    }

    #[must_use]
    pub fn resets(&self) -> usize {
        self.shared.state.lock().resets
    }

    /// Wait until at least `expected` messages have been recorded.
    ///
    /// Returns `false` if `timeout` passes first.
    pub async fn wait_for_sent(&self, expected: usize, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                let mut notified = std::pin::pin!(self.shared.sent.notified());
                notified.as_mut().enable();

                if self.shared.state.lock().sent.len() >= expected {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }
}

#[async_trait]
impl Connector for TestConnector {
    type Transport = TestTransport;

    async fn connect(&self) -> Result<TestTransport, ClientError> {
        let mut state = self.shared.state.lock();
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(ClientError::ConnectionClosed);
        }

        state.connects += 1;
        state.live += 1;
        state.peak_live = state.peak_live.max(state.live);

        Ok(TestTransport {
            shared: Arc::clone(&self.shared),
            open: true,
        })
    }
}

/// Session handed out by [`TestConnector`].
#[derive(Debug)]
pub struct TestTransport {
    shared: Arc<Shared>,
    open: bool,
}

impl TestTransport {
    fn close(&mut self) {
        if std::mem::take(&mut self.open) {
            self.shared.state.lock().live -= 1;
        }
    }
}

#[async_trait]
impl Transport for TestTransport {
    async fn send_mail(
        &mut self,
        from: &str,
        recipients: &[String],
        message: &str,
    ) -> Result<Vec<String>, ClientError> {
        if !self.open {
            return Err(ClientError::ConnectionClosed);
        }

        let delay = self.shared.state.lock().send_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failure = self.shared.state.lock().failing_sends.pop_front();
        if let Some(failure) = failure {
            return Err(failure.into_error());
        }

        self.shared.state.lock().sent.push(SentMail {
            from: from.to_string(),
            recipients: recipients.to_vec(),
            message: message.to_string(),
        });
        self.shared.sent.notify_waiters();

        Ok(Vec::new())
    }

    async fn reset(&mut self) -> Result<(), ClientError> {
        if !self.open {
            return Err(ClientError::ConnectionClosed);
        }
        self.shared.state.lock().resets += 1;
        Ok(())
    }

    async fn quit(&mut self) {
        if self.open {
            self.shared.state.lock().quits += 1;
        }
        self.close();
    }
}

impl Drop for TestTransport {
    fn drop(&mut self) {
        self.close();
    }
}
