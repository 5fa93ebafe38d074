use mailagent_common::config::RelayConfig;
use mailagent_smtp::{Connector, Transport};
use tracing::{error, info, warn};

use crate::{
    error::DeliveryError,
    job::MailJob,
    pool::{Lease, Pool},
    rate_limiter::RateLimiter,
};

/// Sends jobs through a worker's relay pool.
///
/// Each worker owns one processor; nothing in here is shared between workers.
pub struct DeliveryProcessor<C: Connector> {
    pool: Pool<C>,
    limiter: RateLimiter,
}

impl<C: Connector> DeliveryProcessor<C> {
    pub const fn new(pool: Pool<C>, limiter: RateLimiter) -> Self {
        Self { pool, limiter }
    }

    /// Build the pool and limiter from the relay settings.
    pub fn from_config(connector: C, relay: &RelayConfig) -> Self {
        Self::new(
            Pool::new(connector, relay.pool_size, relay.acquire_timeout()),
            RateLimiter::new(relay.max_sends_per_second),
        )
    }

    pub const fn pool(&self) -> &Pool<C> {
        &self.pool
    }

    /// Decode a queue message and deliver it.
    pub async fn process_body(&self, body: &[u8]) -> Result<(), DeliveryError> {
        let job = MailJob::from_slice(body).inspect_err(|e| {
            error!(error = %e, "Discarding undecodable job payload");
        })?;

        self.process(&job).await
    }

    /// Deliver one job.
    ///
    /// On success the send is counted against the rate limit before the session
    /// goes back to the pool. Nothing is retried here.
    #[tracing::instrument(level = "debug", skip_all, fields(outgoing_mail = %job.outgoing_mail))]
    pub async fn process(&self, job: &MailJob) -> Result<(), DeliveryError> {
        let prepared = job.prepare().inspect_err(|e| {
            error!(outgoing_mail = %job.outgoing_mail, error = %e, "Unable to build envelope");
        })?;

        let mut lease = self.pool.acquire().await.inspect_err(|e| {
            error!(outgoing_mail = %job.outgoing_mail, error = %e, "Unable to obtain relay session");
        })?;

        match lease
            .send_mail(&prepared.sender, &prepared.recipients, &prepared.message)
            .await
        {
            Ok(refused) => {
                info!(
                    outgoing_mail = %job.outgoing_mail,
                    sender = %prepared.sender,
                    recipients = ?prepared.recipients,
                    "Delivered message"
                );

                if !refused.is_empty() {
                    warn!(
                        outgoing_mail = %job.outgoing_mail,
                        refused = ?refused,
                        "Relay refused some recipients"
                    );
                }

                self.limiter.throttle().await;
                self.pool.release(lease).await;

                Ok(())
            }
            Err(e) => {
                error!(
                    outgoing_mail = %job.outgoing_mail,
                    sender = %prepared.sender,
                    recipients = ?prepared.recipients,
                    error = %e,
                    "Delivery failed"
                );

                if e.is_connection_broken() {
                    self.pool.discard(lease).await;
                } else {
                    self.recycle(lease).await;
                }

                Err(DeliveryError::Transport(e))
            }
        }
    }

    /// Reset a session after a rejected transaction so it can be reused.
    async fn recycle(&self, mut lease: Lease<'_, C>) {
        match lease.reset().await {
            Ok(()) => self.pool.release(lease).await,
            Err(e) => {
                warn!(error = %e, "Relay session failed to reset, discarding");
                self.pool.discard(lease).await;
            }
        }
    }

    /// Close the pool, quitting every idle session.
    pub async fn shutdown(&self) {
        self.pool.close_all().await;
    }
}
