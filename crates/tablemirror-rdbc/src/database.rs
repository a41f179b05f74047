//! Database handles
//!
//! A [`Database`] is what the cache talks to. Two flavours exist:
//!
//! - [`SharedDatabase`]: one physical connection shared by every caller and
//!   reference-counted by caller-supplied ids. The first `connect(id)` opens
//!   it, the last `disconnect(id)` closes it, and listeners observe both.
//! - [`ClusterDatabase`]: every query borrows its own connection from an
//!   [`ElasticPool`] whose factory rotates across the cluster hosts. Explicit
//!   connect/disconnect bracketing is meaningless here and is a no-op.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cluster::{ClusterConfig, ClusterConnectionFactory, HostRotation};
use crate::connection::{Connection, ConnectionConfig, ConnectionFactory};
use crate::error::{Error, Result};
use crate::pool::{ElasticPool, PoolStats};
use crate::types::Row;

/// Rows returned by a query together with the URL of the connection that served it
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSet {
    /// URL of the physical connection
    pub url: String,
    /// Result rows in server order
    pub rows: Vec<Row>,
}

/// Query surface consumed by the cache
#[async_trait]
pub trait Database: Send + Sync {
    /// Database (schema) name
    fn database_name(&self) -> &str;

    /// Whether every query pulls its own pooled connection
    fn is_cluster(&self) -> bool;

    /// Register `id` as a user of the connection, opening it if needed
    async fn connect(&self, id: &str) -> Result<()>;

    /// Unregister `id`, closing the connection when no users remain
    async fn disconnect(&self, id: &str) -> Result<()>;

    /// Run a query
    async fn query(&self, sql: &str) -> Result<ResultSet>;
}

/// Observer of shared-connection open/close events
pub trait ConnectionListener: Send + Sync {
    /// Called after `connect(id)`; `newly_opened` is true when a physical connection was created
    fn connected(&self, newly_opened: bool, id: &str, open_ids: &[String]);

    /// Called after `disconnect(id)`; `closed` is true when the physical connection was closed
    fn disconnected(&self, closed: bool, id: &str, open_ids: &[String]);
}

#[derive(Default)]
struct SharedState {
    conn: Option<Arc<dyn Connection>>,
    open_ids: Vec<String>,
}

/// One physical connection shared by reference-counted users
pub struct SharedDatabase {
    name: String,
    factory: Arc<dyn ConnectionFactory>,
    config: ConnectionConfig,
    state: Mutex<SharedState>,
    listeners: RwLock<Vec<Arc<dyn ConnectionListener>>>,
}

impl SharedDatabase {
    /// Create a handle; nothing is opened until the first `connect`
    pub fn new(
        name: impl Into<String>,
        factory: Arc<dyn ConnectionFactory>,
        config: ConnectionConfig,
    ) -> Self {
        Self {
            name: name.into(),
            factory,
            config,
            state: Mutex::new(SharedState::default()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Register a listener
    pub fn add_listener(&self, listener: Arc<dyn ConnectionListener>) {
        self.listeners.write().push(listener);
    }

    /// Remove a previously registered listener
    pub fn remove_listener(&self, listener: &Arc<dyn ConnectionListener>) {
        self.listeners
            .write()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    /// Whether a physical connection is open
    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.conn.is_some()
    }

    /// Ids currently holding the connection open
    pub async fn open_ids(&self) -> Vec<String> {
        self.state.lock().await.open_ids.clone()
    }

    fn listeners(&self) -> Vec<Arc<dyn ConnectionListener>> {
        self.listeners.read().clone()
    }
}

#[async_trait]
impl Database for SharedDatabase {
    fn database_name(&self) -> &str {
        &self.name
    }

    fn is_cluster(&self) -> bool {
        false
    }

    async fn connect(&self, id: &str) -> Result<()> {
        let (newly_opened, open_ids) = {
            let mut state = self.state.lock().await;
            let newly_opened = if state.conn.is_none() {
                let conn = self.factory.connect(&self.config).await?;
                state.conn = Some(Arc::from(conn));
                true
            } else {
                false
            };
            if !state.open_ids.iter().any(|open| open == id) {
                state.open_ids.push(id.to_string());
            }
            (newly_opened, state.open_ids.clone())
        };

        debug!(database = %self.name, id, open = open_ids.len(), newly_opened, "Connected");
        for listener in self.listeners() {
            listener.connected(newly_opened, id, &open_ids);
        }
        Ok(())
    }

    async fn disconnect(&self, id: &str) -> Result<()> {
        let (to_close, open_ids) = {
            let mut state = self.state.lock().await;
            if state.conn.is_none() {
                warn!(database = %self.name, id, "Disconnect on a closed connection");
                return Ok(());
            }
            state.open_ids.retain(|open| open != id);
            let to_close = if state.open_ids.is_empty() {
                state.conn.take()
            } else {
                None
            };
            (to_close, state.open_ids.clone())
        };

        let closed = to_close.is_some();
        let result = match to_close {
            Some(conn) => conn.close().await,
            None => Ok(()),
        };

        if closed {
            debug!(database = %self.name, id, "Last user disconnected, connection closed");
        } else {
            debug!(database = %self.name, id, still_open = ?open_ids, "Disconnected");
        }
        for listener in self.listeners() {
            listener.disconnected(closed, id, &open_ids);
        }
        result
    }

    async fn query(&self, sql: &str) -> Result<ResultSet> {
        let conn = self
            .state
            .lock()
            .await
            .conn
            .clone()
            .ok_or_else(|| Error::not_connected(&self.name))?;
        let rows = conn.query(sql).await?;
        Ok(ResultSet {
            url: conn.url().to_string(),
            rows,
        })
    }
}

/// Cluster handle backed by a rotating elastic pool
pub struct ClusterDatabase {
    config: ClusterConfig,
    factory: Arc<ClusterConnectionFactory>,
    pool: Arc<ElasticPool>,
    prewarm: parking_lot::Mutex<Option<JoinHandle<usize>>>,
}

impl ClusterDatabase {
    /// Build the pool and schedule the pre-warm task
    ///
    /// Pre-warming needs a Tokio runtime; outside of one it is skipped.
    pub fn new(config: ClusterConfig, driver: Arc<dyn ConnectionFactory>) -> Result<Self> {
        let factory = Arc::new(ClusterConnectionFactory::new(&config, driver)?);
        let pool = ElasticPool::new(
            Arc::clone(&factory) as Arc<dyn ConnectionFactory>,
            config.connection_config(),
        );

        let prewarm = match (config.prewarm_delay(), tokio::runtime::Handle::try_current()) {
            (Some(delay), Ok(_)) if config.prewarm_count() > 0 => {
                Some(pool.spawn_prewarm(delay, config.prewarm_count()))
            }
            (Some(_), Err(_)) => {
                debug!(database = %config.database, "No runtime, skipping pool pre-warm");
                None
            }
            _ => None,
        };

        Ok(Self {
            config,
            factory,
            pool,
            prewarm: parking_lot::Mutex::new(prewarm),
        })
    }

    /// Cluster configuration
    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Host rotation used for new connections
    pub fn rotation(&self) -> &HostRotation {
        self.factory.rotation()
    }

    /// The underlying pool
    pub fn pool(&self) -> &Arc<ElasticPool> {
        &self.pool
    }

    /// Pool statistics
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Wait for the pre-warm task, returning how many connections it added
    ///
    /// Returns `None` when no pre-warm was scheduled or it was already awaited.
    pub async fn wait_prewarm(&self) -> Option<usize> {
        let handle = self.prewarm.lock().take()?;
        match handle.await {
            Ok(added) => Some(added),
            Err(e) => {
                warn!(error = %e, "Pool pre-warm task did not complete");
                None
            }
        }
    }

    /// Close every pooled connection
    pub async fn shutdown(&self) -> Result<()> {
        if let Some(handle) = self.prewarm.lock().take() {
            handle.abort();
        }
        self.pool.shutdown().await
    }
}

#[async_trait]
impl Database for ClusterDatabase {
    fn database_name(&self) -> &str {
        &self.config.database
    }

    fn is_cluster(&self) -> bool {
        true
    }

    async fn connect(&self, _id: &str) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&self, _id: &str) -> Result<()> {
        Ok(())
    }

    async fn query(&self, sql: &str) -> Result<ResultSet> {
        let conn = self.pool.acquire().await?;
        let url = conn.url().to_string();
        match conn.query(sql).await {
            Ok(rows) => Ok(ResultSet { url, rows }),
            Err(e) => {
                if !conn.is_valid().await {
                    warn!(url = %url, error = %e, "Dropping broken cluster connection");
                    let broken = conn.detach();
                    if let Err(close_err) = broken.close().await {
                        debug!(error = %close_err, "Close of broken connection failed");
                    }
                }
                Err(e)
            }
        }
    }
}
