//! Elastic connection pool
//!
//! [`ElasticPool`] is an unbounded LIFO stack of idle connections:
//! - `acquire()` pops the most recently released connection, or opens a new
//!   one through the factory when the stack is empty. It never waits on
//!   other callers and never refuses for lack of capacity.
//! - Dropping a [`PooledConnection`] pushes the connection back.
//! - `shutdown()` drains the stack and closes every idle connection.
//!
//! The stack lock is a `parking_lot::Mutex` and is never held across an
//! `.await`; connection creation and closing happen outside it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::connection::{Connection, ConnectionConfig, ConnectionFactory};
use crate::error::{Error, Result};

/// A connection borrowed from the pool, returned on drop
pub struct PooledConnection {
    conn: Option<Box<dyn Connection>>,
    pool: Arc<ElasticPool>,
}

impl PooledConnection {
    fn new(conn: Box<dyn Connection>, pool: Arc<ElasticPool>) -> Self {
        Self {
            conn: Some(conn),
            pool,
        }
    }

    /// Get the underlying connection
    pub fn connection(&self) -> &(dyn Connection + 'static) {
        self.conn
            .as_ref()
            .expect("connection already returned")
            .as_ref()
    }

    /// Take the connection out of the pool's custody
    ///
    /// The connection is not returned on drop; the caller owns closing it.
    pub fn detach(mut self) -> Box<dyn Connection> {
        self.conn.take().expect("connection already returned")
    }
}

impl std::ops::Deref for PooledConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.connection()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

/// Pool statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections opened through the factory
    pub connections_created: u64,
    /// Acquisitions served from the idle stack
    pub connections_reused: u64,
    /// Connections pushed back onto the stack
    pub connections_released: u64,
    /// Connections closed by the pool
    pub connections_closed: u64,
    /// Close calls that returned an error
    pub close_failures: u64,
    /// Connections created by the pre-warm task
    pub prewarmed: u64,
}

/// Atomic pool stats for concurrent updates
#[derive(Debug, Default)]
#[allow(missing_docs)]
pub struct AtomicPoolStats {
    pub connections_created: AtomicU64,
    pub connections_reused: AtomicU64,
    pub connections_released: AtomicU64,
    pub connections_closed: AtomicU64,
    pub close_failures: AtomicU64,
    pub prewarmed: AtomicU64,
}

impl AtomicPoolStats {
    /// Create new atomic stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a connection creation
    pub fn record_created(&self) {
        self.connections_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an acquisition served from the idle stack
    pub fn record_reused(&self) {
        self.connections_reused.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a release back to the stack
    pub fn record_released(&self) {
        self.connections_released.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a close, successful or not
    pub fn record_closed(&self, ok: bool) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.close_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a pre-warmed connection
    pub fn record_prewarmed(&self) {
        self.prewarmed.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot current stats
    pub fn snapshot(&self) -> PoolStats {
        PoolStats {
            connections_created: self.connections_created.load(Ordering::Relaxed),
            connections_reused: self.connections_reused.load(Ordering::Relaxed),
            connections_released: self.connections_released.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            close_failures: self.close_failures.load(Ordering::Relaxed),
            prewarmed: self.prewarmed.load(Ordering::Relaxed),
        }
    }
}

/// Unbounded LIFO connection pool
pub struct ElasticPool {
    factory: Arc<dyn ConnectionFactory>,
    config: ConnectionConfig,
    idle: Mutex<Vec<Box<dyn Connection>>>,
    shutdown: AtomicBool,
    stats: Arc<AtomicPoolStats>,
}

impl ElasticPool {
    /// Create an empty pool; connections are opened on demand
    pub fn new(factory: Arc<dyn ConnectionFactory>, config: ConnectionConfig) -> Arc<Self> {
        Arc::new(Self {
            factory,
            config,
            idle: Mutex::new(Vec::new()),
            shutdown: AtomicBool::new(false),
            stats: Arc::new(AtomicPoolStats::new()),
        })
    }

    /// Take an idle connection or open a new one
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledConnection> {
        if self.is_shutdown() {
            return Err(Error::pool_closed("pool is shut down"));
        }

        let reused = self.idle.lock().pop();
        let conn = match reused {
            Some(conn) => {
                self.stats.record_reused();
                conn
            }
            None => self.create().await?,
        };

        Ok(PooledConnection::new(conn, Arc::clone(self)))
    }

    /// Return a connection to the stack
    ///
    /// After shutdown the connection is closed instead of pooled.
    pub fn release(&self, conn: Box<dyn Connection>) {
        if self.is_shutdown() {
            self.close_detached(conn);
            return;
        }
        self.idle.lock().push(conn);
        self.stats.record_released();
    }

    /// Add a freshly opened connection to the stack
    pub fn push(&self, conn: Box<dyn Connection>) {
        self.release(conn);
    }

    /// Open a new connection through the factory
    async fn create(&self) -> Result<Box<dyn Connection>> {
        let conn = self.factory.connect(&self.config).await?;
        self.stats.record_created();
        debug!(url = %conn.url(), "Opened pooled connection");
        Ok(conn)
    }

    fn close_detached(&self, conn: Box<dyn Connection>) {
        // Without a runtime, dropping the connection is all that is left
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            self.stats.record_closed(true);
            return;
        };
        debug!(url = %conn.url(), "Closing connection released after shutdown");
        let stats = Arc::clone(&self.stats);
        handle.spawn(async move {
            match conn.close().await {
                Ok(()) => stats.record_closed(true),
                Err(e) => {
                    stats.record_closed(false);
                    warn!(error = %e, "Failed to close connection released after shutdown");
                }
            }
        });
    }

    /// Drain the stack and close every idle connection
    ///
    /// All connections are closed even if some fail; the first failure is
    /// returned. Subsequent `acquire()` calls fail.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown.store(true, Ordering::Release);
        let drained = std::mem::take(&mut *self.idle.lock());
        let count = drained.len();

        let mut first_error = None;
        for conn in drained {
            match conn.close().await {
                Ok(()) => self.stats.record_closed(true),
                Err(e) => {
                    self.stats.record_closed(false);
                    warn!(url = %conn.url(), error = %e, "Failed to close pooled connection");
                    first_error.get_or_insert(e);
                }
            }
        }

        info!(closed = count, "Connection pool shut down");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Open `count` connections after `delay` and push them onto the stack
    ///
    /// Runs as a detached one-shot task. A failure is logged and ends the
    /// warm-up; the pool keeps working lazily. The task resolves to the
    /// number of connections added.
    pub fn spawn_prewarm(self: &Arc<Self>, delay: Duration, count: usize) -> JoinHandle<usize> {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut added = 0;
            for _ in 0..count {
                if pool.is_shutdown() {
                    break;
                }
                match pool.create().await {
                    Ok(conn) => {
                        pool.push(conn);
                        pool.stats.record_prewarmed();
                        added += 1;
                    }
                    Err(e) => {
                        warn!(error = %e, added, "Pool pre-warm failed");
                        break;
                    }
                }
            }
            debug!(added, "Pool pre-warm finished");
            added
        })
    }

    /// Number of idle connections on the stack
    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }

    /// Whether `shutdown()` has been called
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Get pool statistics
    pub fn stats(&self) -> PoolStats {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_pool_stats() {
        let stats = AtomicPoolStats::new();

        stats.record_created();
        stats.record_created();
        stats.record_reused();
        stats.record_released();
        stats.record_closed(true);
        stats.record_closed(false);
        stats.record_prewarmed();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.connections_created, 2);
        assert_eq!(snapshot.connections_reused, 1);
        assert_eq!(snapshot.connections_released, 1);
        assert_eq!(snapshot.connections_closed, 2);
        assert_eq!(snapshot.close_failures, 1);
        assert_eq!(snapshot.prewarmed, 1);
    }
}
