//! # tablemirror-cache
//!
//! Local, typed, binary-persisted mirror of database tables.
//!
//! ## Features
//!
//! - **Typed Rows**: tables declare a [`Schema`](column::Schema); every cell is
//!   type-checked on write and tracks whether it changed
//! - **Binary Snapshot**: one file per table plus a manifest of the
//!   last-modified timestamp each file was loaded at
//! - **Timestamp-Driven Refresh**: a table is refetched only when the
//!   server's `last_modified` entry is newer than the manifest
//! - **Parallel Loading**: tables load concurrently on a bounded worker pool;
//!   every unit failure is reported, not just the first
//! - **Self-Healing**: unreadable files are deleted and reloaded from the database
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tablemirror_cache::prelude::*;
//!
//! let users = Schema::builder().integer("id").string("name").datetime("seen").build()?;
//! let cache = TableCache::new(
//!     CacheConfig::default().with_cache_dir("/var/cache/app"),
//!     vec![TableDef::new("users", users)],
//! )?;
//!
//! let db: Arc<dyn Database> = Arc::new(ClusterDatabase::new(cluster_config, driver)?);
//! cache.load_cache(&db).await?;
//!
//! for row in cache.table("users")?.rows() {
//!     println!("{row}");
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod cache;
pub mod cell;
pub mod codec;
pub mod column;
pub mod config;
pub mod error;
pub mod last_modified;
pub mod manifest;
pub mod row;
pub mod summary;
pub mod table;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{CacheError, Result, TableFailure};

    pub use crate::cell::{Cell, CellValue};
    pub use crate::column::{Column, ColumnType, Schema, SchemaBuilder};
    pub use crate::row::Row;
    pub use crate::table::{Provenance, RowFactory, Table, TableDef, TableSource};

    pub use crate::cache::{CycleReport, TableCache, TableOutcome};
    pub use crate::config::{CacheConfig, MirrorConfig};
    pub use crate::last_modified::LastModifiedMap;
    pub use crate::manifest::{Manifest, ManifestEntry};
    pub use crate::summary::{CacheSummary, TableSummary};

    pub use tablemirror_rdbc::database::{ClusterDatabase, Database, SharedDatabase};
}

pub use cache::TableCache;
pub use error::{CacheError, Result};

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn test_prelude_imports() {
        let schema = Schema::builder().integer("id").build().unwrap();
        let _def = TableDef::new("users", schema);
        let _config = CacheConfig::default();
    }

    #[test]
    fn test_unknown_table_error() {
        let cache = TableCache::new(CacheConfig::default(), vec![]).unwrap();
        let err = cache.table("missing").unwrap_err();
        assert_eq!(err.to_string(), "Table missing not found");
    }
}
