//! Connection traits for tablemirror-rdbc
//!
//! A [`Connection`] is one physical link to a database server. Drivers
//! plug in through [`ConnectionFactory`]; everything above this module
//! (pool, cluster rotation, database handles) only speaks these traits.

use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::error::Result;
use crate::types::Row;

static URL_CREDENTIALS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"://([^:/@]+):([^@/]*)@").unwrap());

/// Physical database connection
#[async_trait]
pub trait Connection: Send + Sync {
    /// Execute a query and collect all rows
    async fn query(&self, sql: &str) -> Result<Vec<Row>>;

    /// The URL this connection was opened against
    fn url(&self) -> &str;

    /// Execute a query returning at most one row
    async fn query_one(&self, sql: &str) -> Result<Option<Row>> {
        let rows = self.query(sql).await?;
        Ok(rows.into_iter().next())
    }

    /// Check if connection is still usable
    async fn is_valid(&self) -> bool;

    /// Close the connection
    async fn close(&self) -> Result<()>;
}

/// Configuration for creating connections
#[derive(Clone)]
pub struct ConnectionConfig {
    /// Connection URL (e.g., mysql://host:3306,host2:3306/db)
    pub url: String,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Additional connection properties (user, password, ...)
    pub properties: HashMap<String, String>,
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redacted_url = URL_CREDENTIALS.replace(&self.url, "://$1:***@");
        let properties: HashMap<&str, &str> = self
            .properties
            .iter()
            .map(|(k, v)| {
                if k.to_ascii_lowercase().contains("password") {
                    (k.as_str(), "***")
                } else {
                    (k.as_str(), v.as_str())
                }
            })
            .collect();

        f.debug_struct("ConnectionConfig")
            .field("url", &redacted_url)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("properties", &properties)
            .finish()
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            connect_timeout_ms: 10_000,
            properties: HashMap::new(),
        }
    }
}

impl ConnectionConfig {
    /// Create configuration with just a URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Replace the URL, keeping timeouts and properties
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Set connection timeout
    pub fn with_connect_timeout(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = ms;
        self
    }

    /// Add a connection property
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Add user/password properties
    pub fn with_credentials(self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.with_property("user", user).with_property("password", password)
    }
}

/// Factory for creating connections
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Create a new connection
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>>;

    /// Get the database type
    fn database_type(&self) -> DatabaseType;
}

/// Database type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseType {
    /// MySQL
    MySQL,
    /// MariaDB (Galera cluster)
    MariaDB,
    /// SQLite
    SQLite,
    /// Unknown/custom
    Unknown,
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MySQL => write!(f, "MySQL"),
            Self::MariaDB => write!(f, "MariaDB"),
            Self::SQLite => write!(f, "SQLite"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}
