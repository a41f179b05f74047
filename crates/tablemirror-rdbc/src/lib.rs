//! # tablemirror-rdbc
//!
//! Database connectivity for tablemirror.
//!
//! ## Features
//!
//! - **Connection Abstraction**: async [`Connection`](connection::Connection) and
//!   [`ConnectionFactory`](connection::ConnectionFactory) traits drivers implement
//! - **Cluster Rotation**: every new connection lists all cluster hosts, starting
//!   at a different one each time
//! - **Elastic Pooling**: an unbounded LIFO pool that never blocks
//! - **Database Handles**: a reference-counted shared connection and a pooled
//!   cluster handle behind one [`Database`](database::Database) trait
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tablemirror_rdbc::prelude::*;
//!
//! let config = ClusterConfig::new(
//!     "ClusterTestDB",
//!     vec![Host::new("db1", 3306), Host::new("db2", 3306), Host::new("db3", 3306)],
//! )
//! .with_credentials("app", "secret");
//!
//! let db = ClusterDatabase::new(config, Arc::new(MyDriverFactory))?;
//! let result = db.query("SELECT * FROM last_modified").await?;
//! println!("served by {}", result.url);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod cluster;
pub mod connection;
pub mod database;
pub mod error;
pub mod mock;
pub mod pool;
pub mod types;

/// Prelude module for convenient imports
pub mod prelude {
    // Error types
    pub use crate::error::{Error, ErrorCategory, Result};

    // Value and row types
    pub use crate::types::{Row, Value};

    // Connection traits and config
    pub use crate::connection::{Connection, ConnectionConfig, ConnectionFactory, DatabaseType};

    // Cluster rotation
    pub use crate::cluster::{
        connection_info, ClusterConfig, ClusterConnectionFactory, Host, HostRotation,
    };

    // Pool types
    pub use crate::pool::{AtomicPoolStats, ElasticPool, PoolStats, PooledConnection};

    // Database handles
    pub use crate::database::{
        ClusterDatabase, ConnectionListener, Database, ResultSet, SharedDatabase,
    };
}

// Re-export commonly used items at crate root
pub use error::{Error, Result};
pub use types::{Row, Value};

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn test_prelude_imports() {
        let _value = Value::Int32(42);
        let _config = ConnectionConfig::new("mysql://localhost:3306/test");
        let _host = Host::new("localhost", 3306);
    }

    #[test]
    fn test_error_types() {
        let err = Error::connection("test error");
        assert!(err.is_retriable());
        assert_eq!(err.category(), ErrorCategory::Connection);
    }
}
