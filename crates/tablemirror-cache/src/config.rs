//! Configuration
//!
//! ```yaml
//! cache:
//!   cache_dir: ./CACHE
//!   worker_count: 12
//! cluster:
//!   database: ClusterTestDB
//!   hosts:
//!     - { address: db1, port: 3306 }
//!     - { address: db2, port: 3306 }
//!   properties:
//!     user: app
//!     password: ${DB_PASSWORD}
//! ```
//!
//! `${VAR}` and `${VAR:-default}` are expanded from the environment before
//! parsing.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tablemirror_rdbc::cluster::ClusterConfig;

use crate::error::{CacheError, Result};

/// Pattern: ${VAR} or ${VAR:-default}
static ENV_VAR_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)(?::-([^}]*))?\}")
        .expect("env var regex pattern is invalid - this is a bug")
});

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./CACHE")
}

fn default_worker_count() -> usize {
    12
}

fn default_last_modified_table() -> String {
    "last_modified".to_string()
}

/// Cache engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Directory holding the manifest and table files
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Table units loaded concurrently
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Server table holding per-table timestamps
    #[serde(default = "default_last_modified_table")]
    pub last_modified_table: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            worker_count: default_worker_count(),
            last_modified_table: default_last_modified_table(),
        }
    }
}

impl CacheConfig {
    /// Defaults; same as [`CacheConfig::default`]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cache directory
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    /// Set how many table units run at once
    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    /// Set the server table holding timestamps
    pub fn with_last_modified_table(mut self, table: impl Into<String>) -> Self {
        self.last_modified_table = table.into();
        self
    }

    /// Check worker count, directory and table name
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(CacheError::config("worker_count must be at least 1"));
        }
        if self.cache_dir.as_os_str().is_empty() {
            return Err(CacheError::config("cache_dir must not be empty"));
        }
        let table = &self.last_modified_table;
        if table.is_empty() || !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(CacheError::config(format!(
                "invalid last_modified_table '{table}'"
            )));
        }
        Ok(())
    }
}

/// Top-level configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Cache engine settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Cluster to mirror from; absent when the application supplies its own handle
    #[serde(default)]
    pub cluster: Option<ClusterConfig>,
}

impl MirrorConfig {
    /// Load from a YAML file, expanding environment variables
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            CacheError::config(format!("Failed to read config file {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&content)
    }

    /// Parse YAML, expanding environment variables
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        let config: Self = serde_yaml::from_str(&expanded)
            .map_err(|e| CacheError::config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the cache section and the cluster section when present
    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        if let Some(cluster) = &self.cluster {
            cluster.validate()?;
        }
        Ok(())
    }
}

fn expand_env_vars(content: &str) -> String {
    ENV_VAR_REGEX
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map(|m| m.as_str());

            std::env::var(var_name).unwrap_or_else(|_| default.unwrap_or("").to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.cache_dir, PathBuf::from("./CACHE"));
        assert_eq!(config.worker_count, 12);
        assert_eq!(config.last_modified_table, "last_modified");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        assert!(CacheConfig::new().with_worker_count(0).validate().is_err());
        assert!(CacheConfig::new().with_cache_dir("").validate().is_err());
        assert!(CacheConfig::new()
            .with_last_modified_table("x; DROP TABLE y")
            .validate()
            .is_err());
    }

    #[test]
    fn test_parse_yaml_with_env_default() {
        let yaml = r#"
cache:
  cache_dir: /tmp/mirror
  worker_count: 4
cluster:
  database: ClusterTestDB
  hosts:
    - { address: db1, port: 13306 }
    - { address: db2, port: 23306 }
  prewarm_delay_ms: 0
  properties:
    user: app
    password: ${TABLEMIRROR_TEST_UNSET_PASSWORD:-fallback}
"#;
        let config = MirrorConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.cache.worker_count, 4);
        assert_eq!(config.cache.last_modified_table, "last_modified");

        let cluster = config.cluster.unwrap();
        assert_eq!(cluster.protocol, "mysql");
        assert_eq!(cluster.hosts.len(), 2);
        assert_eq!(cluster.prewarm_per_host, 3);
        assert_eq!(cluster.prewarm_delay(), None);
        assert_eq!(
            cluster.properties.get("password").map(String::as_str),
            Some("fallback")
        );
    }

    #[test]
    fn test_parse_rejects_invalid() {
        assert!(MirrorConfig::from_yaml_str("cache:\n  worker_count: 0\n").is_err());
        assert!(MirrorConfig::from_yaml_str("cluster:\n  database: x\n  hosts: []\n").is_err());
        assert!(MirrorConfig::from_yaml_str("cache: [").is_err());
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = MirrorConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config.cache, CacheConfig::default());
        assert!(config.cluster.is_none());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mirror.yaml");
        std::fs::write(&path, "cache:\n  worker_count: 2\n").unwrap();
        assert_eq!(MirrorConfig::from_file(&path).unwrap().cache.worker_count, 2);
        assert!(MirrorConfig::from_file(dir.path().join("missing.yaml")).is_err());
    }
}
