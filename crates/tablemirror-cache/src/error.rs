//! Error types for the table cache

use thiserror::Error;

/// Failure of one table unit during a load cycle
#[derive(Debug)]
pub struct TableFailure {
    /// Table the unit was loading
    pub table: String,
    /// What went wrong
    pub error: CacheError,
}

impl std::fmt::Display for TableFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.table, self.error)
    }
}

fn join_failures(failures: &[TableFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors raised by the table cache
#[derive(Error, Debug)]
pub enum CacheError {
    /// Query or connection failure
    #[error("Database error: {0}")]
    Database(#[from] tablemirror_rdbc::Error),

    /// Cache file read or write failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Bytes that do not follow the cache file format
    #[error("Codec error: {0}")]
    Codec(String),

    /// Stored row layout disagrees with the declared schema
    #[error("Schema mismatch in {table}: {message}")]
    SchemaMismatch {
        /// Table being decoded
        table: String,
        /// What disagreed
        message: String,
    },

    /// A value of the wrong type for its column
    #[error("Type mismatch for column {column}: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Column written to
        column: String,
        /// Declared type
        expected: String,
        /// Type actually supplied
        actual: String,
    },

    /// No table with this name is declared
    #[error("Table {0} not found")]
    UnknownTable(String),

    /// Column lookup by name failed
    #[error("Column {column} not found in {table}")]
    UnknownColumn {
        /// Table searched
        table: String,
        /// Name that was not found
        column: String,
    },

    /// Name unusable as a SQL identifier or file name
    #[error("Invalid table name: {0}")]
    InvalidTableName(String),

    /// Rejected configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A table unit's task panicked or was cancelled
    #[error("Table worker panicked: {0}")]
    WorkerPanic(String),

    /// One or more table units failed during a cycle
    #[error("{} table(s) failed to load: {}", failures.len(), join_failures(failures))]
    TableLoad {
        /// Every unit failure, in declaration order
        failures: Vec<TableFailure>,
    },
}

impl CacheError {
    /// Shorthand for [`CacheError::Codec`]
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec(message.into())
    }

    /// Shorthand for [`CacheError::SchemaMismatch`]
    pub fn schema(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Shorthand for [`CacheError::InvalidConfig`]
    pub fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Whether the error comes from unreadable cache bytes
    ///
    /// Such files are deleted and reloaded from the database.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Codec(_) | Self::SchemaMismatch { .. })
    }

    /// Failures of individual table units, empty for other errors
    pub fn table_failures(&self) -> &[TableFailure] {
        match self {
            Self::TableLoad { failures } => failures,
            _ => &[],
        }
    }
}

/// Result alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_load_lists_every_failure() {
        let err = CacheError::TableLoad {
            failures: vec![
                TableFailure {
                    table: "a".into(),
                    error: CacheError::codec("truncated"),
                },
                TableFailure {
                    table: "b".into(),
                    error: CacheError::UnknownTable("b".into()),
                },
            ],
        };
        let text = err.to_string();
        assert!(text.starts_with("2 table(s) failed to load"));
        assert!(text.contains("a: Codec error: truncated"));
        assert!(text.contains("b: Table b not found"));
        assert_eq!(err.table_failures().len(), 2);
    }

    #[test]
    fn test_corruption_classification() {
        assert!(CacheError::codec("x").is_corruption());
        assert!(CacheError::schema("t", "bad tag").is_corruption());
        assert!(!CacheError::UnknownTable("t".into()).is_corruption());
    }
}
