//! Multi-host cluster support
//!
//! A cluster is an ordered, immutable list of [`Host`]s. Every new physical
//! connection is opened against a URL listing *all* hosts, but starting at a
//! different one each time, so the driver's primary choice is spread across
//! the cluster while the remaining hosts stay available for failover.
//!
//! ```text
//! hosts = [A, B, C], cursor starts at 1
//!
//! 1st connect:  proto://B,C,A/db
//! 2nd connect:  proto://C,A,B/db
//! 3rd connect:  proto://A,B,C/db
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::debug;

use crate::connection::{Connection, ConnectionConfig, ConnectionFactory, DatabaseType};
use crate::error::{Error, Result};

static FIRST_HOST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"://([^/,:@]+:\d+)").unwrap());

/// A single cluster member
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Host {
    /// Hostname or IP address
    pub address: String,
    /// TCP port
    pub port: u16,
}

impl Host {
    /// Create a host entry
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

impl FromStr for Host {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (address, port) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::config(format!("host '{s}' must be address:port")))?;
        if address.is_empty() {
            return Err(Error::config(format!("host '{s}' has an empty address")));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| Error::config(format!("host '{s}' has an invalid port: {e}")))?;
        Ok(Self::new(address, port))
    }
}

/// Rotating view over an ordered host list
///
/// The cursor starts at index 1 and advances by one (mod N) on every
/// [`next_url`](Self::next_url) call.
#[derive(Debug)]
pub struct HostRotation {
    hosts: Vec<Host>,
    cursor: Mutex<usize>,
}

impl HostRotation {
    /// Create a rotation over a non-empty host list
    pub fn new(hosts: Vec<Host>) -> Result<Self> {
        if hosts.is_empty() {
            return Err(Error::config("cluster host list is empty"));
        }
        let cursor = 1 % hosts.len();
        Ok(Self {
            hosts,
            cursor: Mutex::new(cursor),
        })
    }

    /// Configured hosts in their original order
    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    /// Number of hosts
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    /// Always false; construction rejects an empty list
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Index of the host that leads the next URL
    pub fn cursor(&self) -> usize {
        *self.cursor.lock()
    }

    /// Build the next rotated URL and advance the cursor
    pub fn next_url(&self, protocol: &str, database: &str) -> String {
        let n = self.hosts.len();
        let start = {
            let mut cursor = self.cursor.lock();
            let start = *cursor;
            *cursor = (start + 1) % n;
            start
        };

        let hosts = (0..n)
            .map(|i| self.hosts[(start + i) % n].to_string())
            .collect::<Vec<_>>()
            .join(",");
        format!("{protocol}://{hosts}/{database}")
    }
}

/// Summarize a connection URL for diagnostics
///
/// Returns `host:port` for a single-host URL and `CLUSTER host:port,...`
/// when further hosts follow the first one.
pub fn connection_info(url: &str) -> String {
    match FIRST_HOST.captures(url).and_then(|c| c.get(1)) {
        Some(first) => {
            let rest = &url[first.end()..];
            let path_start = rest.find('/').unwrap_or(rest.len());
            if rest[..path_start].contains(',') {
                format!("CLUSTER {},...", first.as_str())
            } else {
                first.as_str().to_string()
            }
        }
        None => format!("unrecognized url: {url}"),
    }
}

fn default_protocol() -> String {
    "mysql".to_string()
}

fn default_prewarm_delay_ms() -> u64 {
    200
}

fn default_prewarm_per_host() -> usize {
    3
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_properties() -> HashMap<String, String> {
    HashMap::from([
        ("useUnicode".to_string(), "true".to_string()),
        ("characterEncoding".to_string(), "utf-8".to_string()),
        ("MaxPooledStatements".to_string(), "250".to_string()),
    ])
}

/// Cluster connection settings
#[derive(Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// URL scheme placed before `://`
    #[serde(default = "default_protocol")]
    pub protocol: String,

    /// Database (schema) name appended to every URL
    pub database: String,

    /// Ordered cluster members
    pub hosts: Vec<Host>,

    /// Delay before the one-shot pool pre-warm runs; 0 disables it
    #[serde(default = "default_prewarm_delay_ms")]
    pub prewarm_delay_ms: u64,

    /// Connections created per host during pre-warm
    #[serde(default = "default_prewarm_per_host")]
    pub prewarm_per_host: usize,

    /// Connect timeout handed to the driver
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Driver properties (user, password, encoding, ...)
    #[serde(default = "default_properties")]
    pub properties: HashMap<String, String>,
}

impl fmt::Debug for ClusterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterConfig")
            .field("protocol", &self.protocol)
            .field("database", &self.database)
            .field("hosts", &self.hosts)
            .field("prewarm_delay_ms", &self.prewarm_delay_ms)
            .field("prewarm_per_host", &self.prewarm_per_host)
            .field("connection", &self.connection_config())
            .finish()
    }
}

impl ClusterConfig {
    /// Create a config for `database` spread over `hosts`
    pub fn new(database: impl Into<String>, hosts: Vec<Host>) -> Self {
        Self {
            protocol: default_protocol(),
            database: database.into(),
            hosts,
            prewarm_delay_ms: default_prewarm_delay_ms(),
            prewarm_per_host: default_prewarm_per_host(),
            connect_timeout_ms: default_connect_timeout_ms(),
            properties: default_properties(),
        }
    }

    /// Set the URL scheme
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    /// Set the pre-warm delay; zero disables pre-warming
    pub fn with_prewarm_delay(mut self, delay: Duration) -> Self {
        self.prewarm_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set the number of pre-warmed connections per host
    pub fn with_prewarm_per_host(mut self, n: usize) -> Self {
        self.prewarm_per_host = n;
        self
    }

    /// Add user/password properties
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.properties.insert("user".into(), user.into());
        self.properties.insert("password".into(), password.into());
        self
    }

    /// Add a driver property
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Pre-warm delay, `None` when disabled
    pub fn prewarm_delay(&self) -> Option<Duration> {
        (self.prewarm_delay_ms > 0).then(|| Duration::from_millis(self.prewarm_delay_ms))
    }

    /// Total connections the pre-warm task creates
    pub fn prewarm_count(&self) -> usize {
        self.prewarm_per_host * self.hosts.len()
    }

    /// Template handed to the driver; the URL is filled in per connection
    pub fn connection_config(&self) -> ConnectionConfig {
        self.properties.iter().fold(
            ConnectionConfig::default().with_connect_timeout(self.connect_timeout_ms),
            |cfg, (k, v)| cfg.with_property(k.clone(), v.clone()),
        )
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.database.trim().is_empty() {
            return Err(Error::config("cluster database name must not be empty"));
        }
        if self.protocol.trim().is_empty() {
            return Err(Error::config("cluster protocol must not be empty"));
        }
        if self.hosts.is_empty() {
            return Err(Error::config("cluster needs at least one host"));
        }
        Ok(())
    }
}

/// Connection factory that opens every connection against the next rotated URL
pub struct ClusterConnectionFactory {
    inner: Arc<dyn ConnectionFactory>,
    rotation: HostRotation,
    protocol: String,
    database: String,
}

impl ClusterConnectionFactory {
    /// Wrap a driver factory with host rotation
    pub fn new(config: &ClusterConfig, inner: Arc<dyn ConnectionFactory>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner,
            rotation: HostRotation::new(config.hosts.clone())?,
            protocol: config.protocol.clone(),
            database: config.database.clone(),
        })
    }

    /// The rotation backing this factory
    pub fn rotation(&self) -> &HostRotation {
        &self.rotation
    }
}

#[async_trait]
impl ConnectionFactory for ClusterConnectionFactory {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        let url = self.rotation.next_url(&self.protocol, &self.database);
        debug!(url = %url, "Opening cluster connection");
        self.inner.connect(&config.clone().with_url(url)).await
    }

    fn database_type(&self) -> DatabaseType {
        self.inner.database_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_hosts() -> Vec<Host> {
        vec![
            Host::new("localhost", 13306),
            Host::new("localhost", 23306),
            Host::new("localhost", 33306),
        ]
    }

    #[test]
    fn test_rotation_starts_at_second_host_and_wraps() {
        let rotation = HostRotation::new(three_hosts()).unwrap();
        assert_eq!(rotation.cursor(), 1);

        assert_eq!(
            rotation.next_url("jdbc:mysql", "ClusterTestDB"),
            "jdbc:mysql://localhost:23306,localhost:33306,localhost:13306/ClusterTestDB"
        );
        assert_eq!(
            rotation.next_url("jdbc:mysql", "ClusterTestDB"),
            "jdbc:mysql://localhost:33306,localhost:13306,localhost:23306/ClusterTestDB"
        );
        assert_eq!(
            rotation.next_url("jdbc:mysql", "ClusterTestDB"),
            "jdbc:mysql://localhost:13306,localhost:23306,localhost:33306/ClusterTestDB"
        );
        assert_eq!(rotation.cursor(), 1);
    }

    #[test]
    fn test_single_host_rotation() {
        let rotation = HostRotation::new(vec![Host::new("db", 3306)]).unwrap();
        assert_eq!(rotation.cursor(), 0);
        assert_eq!(rotation.next_url("mysql", "app"), "mysql://db:3306/app");
        assert_eq!(rotation.next_url("mysql", "app"), "mysql://db:3306/app");
    }

    #[test]
    fn test_empty_host_list_rejected() {
        assert!(HostRotation::new(Vec::new()).is_err());
    }

    #[test]
    fn test_host_parse() {
        let host: Host = "db1.internal:3306".parse().unwrap();
        assert_eq!(host, Host::new("db1.internal", 3306));
        assert!("db1".parse::<Host>().is_err());
        assert!(":3306".parse::<Host>().is_err());
        assert!("db1:notaport".parse::<Host>().is_err());
    }

    #[test]
    fn test_connection_info() {
        assert_eq!(
            connection_info("jdbc:mysql://localhost:23306,localhost:33306/ClusterTestDB"),
            "CLUSTER localhost:23306,..."
        );
        assert_eq!(connection_info("mysql://db:3306/app"), "db:3306");
        assert!(connection_info("sqlite::memory:").starts_with("unrecognized"));
    }

    #[test]
    fn test_cluster_config_defaults_and_validation() {
        let config = ClusterConfig::new("app", three_hosts());
        assert_eq!(config.protocol, "mysql");
        assert_eq!(config.prewarm_delay(), Some(Duration::from_millis(200)));
        assert_eq!(config.prewarm_count(), 9);
        assert!(config.validate().is_ok());

        let disabled = config.clone().with_prewarm_delay(Duration::ZERO);
        assert_eq!(disabled.prewarm_delay(), None);

        assert!(ClusterConfig::new("", three_hosts()).validate().is_err());
        assert!(ClusterConfig::new("app", Vec::new()).validate().is_err());
    }

    #[test]
    fn test_cluster_config_debug_redacts_password() {
        let config = ClusterConfig::new("app", three_hosts()).with_credentials("svc", "topsecret");
        let debug = format!("{config:?}");
        assert!(!debug.contains("topsecret"));
        assert!(debug.contains("svc"));
    }
}
