//! Bounded pool of relay sessions.
//!
//! At most `max_size` sessions exist at once, counting idle ones, leased ones
//! and ones still being opened. Callers that find the pool full wait for a
//! session to come back, up to the acquire timeout.
//!
//! A [`Lease`] should be handed back through [`Pool::release`] when the session
//! is still good or [`Pool::discard`] when it is not. A lease that is simply
//! dropped closes its session without `QUIT` and frees the slot.

use std::{ops::Deref, ops::DerefMut, time::Duration};

use mailagent_common::internal;
use mailagent_smtp::{Connector, Transport};
use parking_lot::Mutex;
use tokio::{sync::Notify, time::Instant};

use crate::error::PoolError;

#[derive(Debug)]
struct PoolState<T> {
    idle: Vec<T>,
    open: usize,
    closed: bool,
}

enum Checkout<T> {
    Idle(T),
    Reserved,
    Full,
}

pub struct Pool<C: Connector> {
    connector: C,
    max_size: usize,
    acquire_timeout: Duration,
    state: Mutex<PoolState<C::Transport>>,
    available: Notify,
}

impl<C: Connector> Pool<C> {
    /// `max_size` is raised to one if zero is given.
    pub fn new(connector: C, max_size: usize, acquire_timeout: Duration) -> Self {
        Self {
            connector,
            max_size: max_size.max(1),
            acquire_timeout,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                open: 0,
                closed: false,
            }),
            available: Notify::new(),
        }
    }

    /// Sessions currently in existence, leased or idle.
    pub fn open(&self) -> usize {
        self.state.lock().open
    }

    pub fn idle(&self) -> usize {
        self.state.lock().idle.len()
    }

    /// Take an idle session, open a new one if there is room, or wait for one.
    pub async fn acquire(&self) -> Result<Lease<'_, C>, PoolError> {
        let deadline = Instant::now() + self.acquire_timeout;

        loop {
            // Registered before looking at the state so a release or close that
            // lands in between still wakes this caller.
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.checkout()? {
                Checkout::Idle(transport) => {
                    return Ok(Lease {
                        transport,
                        slot: Slot::new(self),
                    });
                }
                Checkout::Reserved => return self.open_session().await,
                Checkout::Full => {}
            }

            if tokio::time::timeout_at(deadline, notified)
                .await
                .is_err()
            {
                internal!(
                    level = WARN,
                    "No relay session available after {:?}",
                    self.acquire_timeout
                );
                return Err(PoolError::Exhausted(self.acquire_timeout));
            }
        }
    }

    fn checkout(&self) -> Result<Checkout<C::Transport>, PoolError> {
        let mut state = self.state.lock();

        if state.closed {
            return Err(PoolError::Closed);
        }

        if let Some(transport) = state.idle.pop() {
            return Ok(Checkout::Idle(transport));
        }

        if state.open < self.max_size {
            state.open += 1;
            return Ok(Checkout::Reserved);
        }

        Ok(Checkout::Full)
    }

    /// Open a session for a slot already counted in `open`.
    async fn open_session(&self) -> Result<Lease<'_, C>, PoolError> {
        // Dropping the slot on failure (or cancellation) gives the reservation back.
        let slot = Slot::new(self);
        let transport = self
            .connector
            .connect()
            .await
            .map_err(PoolError::Connect)?;

        internal!(
            level = DEBUG,
            "Opened relay session ({}/{})",
            self.open(),
            self.max_size
        );

        Ok(Lease { transport, slot })
    }

    /// Return a healthy session to the idle set.
    ///
    /// If the idle set is already full, or the pool has been closed, the session is quit instead.
    pub async fn release(&self, lease: Lease<'_, C>) {
        let Lease { transport, slot } = lease;

        let surplus = {
            let mut state = self.state.lock();
            if state.closed || state.idle.len() >= self.max_size {
                Some(transport)
            } else {
                state.idle.push(transport);
                None
            }
        };

        match surplus {
            Some(mut transport) => {
                transport.quit().await;
                drop(slot);
            }
            None => {
                slot.disarm();
                self.available.notify_one();
            }
        }
    }

    /// Quit a session that must not be reused and free its slot.
    pub async fn discard(&self, lease: Lease<'_, C>) {
        let Lease {
            mut transport,
            slot,
        } = lease;

        transport.quit().await;
        drop(slot);
    }

    /// Quit every idle session and refuse further acquisitions.
    ///
    /// Sessions still leased are quit when they come back.
    pub async fn close_all(&self) {
        let idle = {
            let mut state = self.state.lock();
            state.closed = true;
            std::mem::take(&mut state.idle)
        };

        self.available.notify_waiters();

        let count = idle.len();
        for mut transport in idle {
            transport.quit().await;
            self.state.lock().open -= 1;
        }

        internal!(level = DEBUG, "Closed {} idle relay sessions", count);
    }
}

/// Accounts for one counted session until it is handed back.
struct Slot<'a, C: Connector> {
    pool: &'a Pool<C>,
    armed: bool,
}

impl<'a, C: Connector> Slot<'a, C> {
    const fn new(pool: &'a Pool<C>) -> Self {
        Self { pool, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<C: Connector> Drop for Slot<'_, C> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.state.lock().open -= 1;
            self.pool.available.notify_one();
        }
    }
}

/// A session checked out of a [`Pool`].
pub struct Lease<'a, C: Connector> {
    transport: C::Transport,
    slot: Slot<'a, C>,
}

impl<C: Connector> Deref for Lease<'_, C> {
    type Target = C::Transport;

    fn deref(&self) -> &Self::Target {
        &self.transport
    }
}

impl<C: Connector> DerefMut for Lease<'_, C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.transport
    }
}
