//! Connection pool lifecycle.
//!
//! Wraps a bounded `deadpool` pool in a four-state machine. Sessions handed
//! out by [`ConnectionPool::acquire`] are RAII objects that return to the pool
//! when dropped, whichever way the holder exits.

use deadpool::managed::{Manager, Object, Pool, PoolError};
use deadpool::Runtime;
use serde::Serialize;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{info, warn};

use super::connection::PoolSettings;
use super::error::{Error, Result};

pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl ConnectionState {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub state: ConnectionState,
    pub max_size: usize,
    pub size: usize,
    pub available: usize,
    pub waiting: usize,
}

enum Slot<M: Manager> {
    Disconnected,
    Connecting,
    Connected(Pool<M>),
    Disconnecting,
}

impl<M: Manager> Slot<M> {
    fn state(&self) -> ConnectionState {
        match self {
            Slot::Disconnected => ConnectionState::Disconnected,
            Slot::Connecting => ConnectionState::Connecting,
            Slot::Connected(_) => ConnectionState::Connected,
            Slot::Disconnecting => ConnectionState::Disconnecting,
        }
    }
}

pub struct ConnectionPool<M: Manager> {
    slot: Mutex<Slot<M>>,
    drain_timeout: Duration,
}

impl<M: Manager> Default for ConnectionPool<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Puts the slot back to `Disconnected` if a `connect` future is dropped midway.
struct ConnectingGuard<'a, M: Manager> {
    pool: &'a ConnectionPool<M>,
    armed: bool,
}

impl<M: Manager> Drop for ConnectingGuard<'_, M> {
    fn drop(&mut self) {
        if self.armed {
            *self.pool.lock() = Slot::Disconnected;
        }
    }
}

impl<M: Manager<Error = Error>> ConnectionPool<M> {
    /// Open the pool and pre-open `settings.min` sessions.
    ///
    /// Only legal while disconnected. A failure leaves the pool disconnected.
    pub async fn connect(&self, manager: M, settings: &PoolSettings) -> Result<()> {
        settings.validate()?;
        {
            let mut slot = self.lock();
            if !matches!(*slot, Slot::Disconnected) {
                return Err(Error::InvalidState {
                    expected: ConnectionState::Disconnected.name(),
                    found: slot.state().name(),
                });
            }
            *slot = Slot::Connecting;
        }
        let mut guard = ConnectingGuard {
            pool: self,
            armed: true,
        };

        let pool = Pool::builder(manager)
            .max_size(settings.max)
            .wait_timeout(settings.acquire_timeout())
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| Error::Pool(e.to_string()))?;

        let mut warm = Vec::with_capacity(settings.min);
        for _ in 0..settings.min {
            warm.push(pool.get().await.map_err(pool_error)?);
        }
        drop(warm);

        guard.armed = false;
        *self.lock() = Slot::Connected(pool);
        info!(max = settings.max, min = settings.min, "pool connected");
        Ok(())
    }
}

impl<M: Manager> ConnectionPool<M> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Disconnected),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Slot<M>> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state()
    }

    pub fn status(&self) -> PoolStatus {
        let slot = self.lock();
        let state = slot.state();
        match &*slot {
            Slot::Connected(pool) => {
                let status = pool.status();
                PoolStatus {
                    state,
                    max_size: status.max_size,
                    size: status.size,
                    available: status.available,
                    waiting: status.waiting,
                }
            }
            _ => PoolStatus {
                state,
                max_size: 0,
                size: 0,
                available: 0,
                waiting: 0,
            },
        }
    }

    fn connected_pool(&self) -> Result<Pool<M>> {
        match &*self.lock() {
            Slot::Connected(pool) => Ok(pool.clone()),
            other => Err(Error::InvalidState {
                expected: ConnectionState::Connected.name(),
                found: other.state().name(),
            }),
        }
    }

    /// Close the pool and wait for in-flight sessions to come back.
    ///
    /// Ends `Disconnected` even when the drain times out. Calling it while
    /// already disconnected does nothing.
    pub async fn disconnect(&self) -> Result<()> {
        let pool = {
            let mut slot = self.lock();
            match std::mem::replace(&mut *slot, Slot::Disconnecting) {
                Slot::Connected(pool) => pool,
                Slot::Disconnected => {
                    *slot = Slot::Disconnected;
                    return Ok(());
                }
                other => {
                    let found = other.state().name();
                    *slot = other;
                    return Err(Error::InvalidState {
                        expected: ConnectionState::Connected.name(),
                        found,
                    });
                }
            }
        };

        pool.close();
        let drained = tokio::time::timeout(self.drain_timeout, async {
            while pool.status().size > 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                in_flight = pool.status().size,
                timeout_ms = self.drain_timeout.as_millis() as u64,
                "pool drain timed out; abandoning in-flight sessions"
            );
        }

        *self.lock() = Slot::Disconnected;
        info!("pool disconnected");
        Ok(())
    }
}

impl<M: Manager<Error = Error>> ConnectionPool<M> {
    /// Wait for a free session, bounded by the configured acquire timeout.
    pub async fn acquire(&self) -> Result<Object<M>> {
        let pool = self.connected_pool()?;
        pool.get().await.map_err(pool_error)
    }
}

fn pool_error(err: PoolError<Error>) -> Error {
    match err {
        PoolError::Backend(e) => e,
        PoolError::Timeout(kind) => {
            Error::Pool(format!("timed out waiting for a session ({:?})", kind))
        }
        PoolError::Closed => Error::Pool("pool is closed".to_string()),
        other => Error::Pool(other.to_string()),
    }
}
