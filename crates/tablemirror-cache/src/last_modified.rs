//! Server-side last-modified timestamps
//!
//! The server keeps one row per cached table in a `last_modified` table
//! with columns `tableName` and `localDateTime` (`yyyy-MM-dd HH:mm:ss`).
//! A [`LastModifiedMap`] is fetched once per cycle and then only read.

use chrono::NaiveDateTime;
use std::collections::HashMap;
use tablemirror_rdbc::database::Database;
use tablemirror_rdbc::Value;
use tracing::{debug, warn};

use crate::codec::parse_sql_datetime;
use crate::error::Result;

/// Column holding the table name
pub const TABLE_NAME_COLUMN: &str = "tableName";
/// Column holding the timestamp
pub const TIMESTAMP_COLUMN: &str = "localDateTime";

/// Immutable snapshot of server timestamps keyed by table name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LastModifiedMap {
    entries: HashMap<String, Option<NaiveDateTime>>,
}

impl LastModifiedMap {
    /// Build a map from already-fetched entries
    pub fn new(entries: HashMap<String, Option<NaiveDateTime>>) -> Self {
        Self { entries }
    }

    /// Query `table_name` and build a fresh map
    ///
    /// Rows without a table name are skipped; an unparsable timestamp is
    /// kept as null so the table is refetched.
    pub async fn fetch(db: &dyn Database, table_name: &str) -> Result<Self> {
        let sql = format!("SELECT * FROM {table_name} ");
        let result = db.query(&sql).await?;

        let mut entries = HashMap::with_capacity(result.rows.len());
        for row in &result.rows {
            let Some(name) = row.get_by_name(TABLE_NAME_COLUMN).and_then(Value::as_string) else {
                warn!(table = table_name, "Skipping last-modified row without a table name");
                continue;
            };
            let timestamp = match row.get_by_name(TIMESTAMP_COLUMN) {
                Some(Value::DateTime(dt)) => Some(*dt),
                Some(Value::String(s)) => parse_sql_datetime(s).unwrap_or_else(|e| {
                    warn!(table = %name, error = %e, "Unparsable last-modified timestamp");
                    None
                }),
                _ => None,
            };
            entries.insert(name, timestamp);
        }

        debug!(tables = entries.len(), url = %result.url, "Fetched last-modified map");
        Ok(Self { entries })
    }

    /// Server timestamp for `name`; `None` when absent or null
    pub fn get(&self, name: &str) -> Option<NaiveDateTime> {
        self.entries.get(name).copied().flatten()
    }

    /// Whether the server lists `name` at all
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Number of tables listed
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the server listed no tables
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the disk copy recorded at `disk` must be refetched
    ///
    /// Stale when the server has no timestamp, when nothing was recorded
    /// on disk, or when the server timestamp is strictly later. Equal
    /// timestamps are fresh.
    pub fn is_stale(&self, name: &str, disk: Option<NaiveDateTime>) -> bool {
        match (self.get(name), disk) {
            (None, _) | (_, None) => true,
            (Some(server), Some(disk)) => server > disk,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn t(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn map() -> LastModifiedMap {
        LastModifiedMap::new(HashMap::from([
            ("a".to_string(), Some(t(2))),
            ("nulled".to_string(), None),
        ]))
    }

    #[test]
    fn test_staleness_rule() {
        let map = map();
        assert!(map.is_stale("a", Some(t(1))));
        assert!(!map.is_stale("a", Some(t(2))));
        assert!(!map.is_stale("a", Some(t(3))));
        assert!(map.is_stale("a", None));
        assert!(map.is_stale("nulled", Some(t(1))));
        assert!(map.is_stale("missing", Some(t(1))));
    }

    #[test]
    fn test_max_sentinel_on_disk_is_fresh() {
        assert!(!map().is_stale("a", Some(NaiveDateTime::MAX)));
    }

    #[test]
    fn test_get_and_contains() {
        let map = map();
        assert_eq!(map.get("a"), Some(t(2)));
        assert_eq!(map.get("nulled"), None);
        assert!(map.contains("nulled"));
        assert!(!map.contains("missing"));
        assert_eq!(map.len(), 2);
    }
}
