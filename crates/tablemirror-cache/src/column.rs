//! Column types and table schemas

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::cell::CellValue;
use crate::error::{CacheError, Result};

/// Declared type of a column
///
/// The discriminant is the type tag written to cache files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    /// True or false
    Bool,
    /// 32-bit signed integer
    Integer,
    /// UTF-8 text
    String,
    /// Timestamp with second precision
    DateTime,
    /// 64-bit float
    Double,
}

impl ColumnType {
    /// On-disk type tag
    pub const fn id(self) -> i32 {
        match self {
            Self::Bool => 0,
            Self::Integer => 1,
            Self::String => 2,
            Self::DateTime => 3,
            Self::Double => 4,
        }
    }

    /// Resolve an on-disk type tag
    pub fn from_id(id: i32) -> Result<Self> {
        match id {
            0 => Ok(Self::Bool),
            1 => Ok(Self::Integer),
            2 => Ok(Self::String),
            3 => Ok(Self::DateTime),
            4 => Ok(Self::Double),
            other => Err(CacheError::codec(format!("unknown column type tag {other}"))),
        }
    }

    /// Value a freshly created cell of this type holds
    pub fn default_value(self) -> CellValue {
        match self {
            Self::Bool => CellValue::Bool(false),
            Self::Integer => CellValue::Integer(0),
            Self::String => CellValue::String(String::new()),
            Self::DateTime => CellValue::DateTime(None),
            Self::Double => CellValue::Double(0.0),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => write!(f, "Bool"),
            Self::Integer => write!(f, "Integer"),
            Self::String => write!(f, "String"),
            Self::DateTime => write!(f, "DateTime"),
            Self::Double => write!(f, "Double"),
        }
    }
}

/// A named, typed column
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Column {
    /// Column name, unique within its schema
    pub name: String,
    /// Declared value type
    pub column_type: ColumnType,
}

impl Column {
    /// Column called `name` of type `column_type`
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// Ordered list of uniquely named columns
///
/// Cheap to clone; rows share it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    columns: Arc<[Column]>,
}

impl Schema {
    /// Build a schema; empty and duplicate column names are rejected
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(columns.len());
        for column in &columns {
            if column.name.is_empty() {
                return Err(CacheError::config("column name must not be empty"));
            }
            if !seen.insert(column.name.as_str()) {
                return Err(CacheError::config(format!(
                    "duplicate column name '{}'",
                    column.name
                )));
            }
        }
        Ok(Self {
            columns: columns.into(),
        })
    }

    /// Start a [`SchemaBuilder`]
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// Columns in declaration order
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Number of columns
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether the schema has no columns
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Position of the column called `name`
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Column called `name`
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Fluent [`Schema`] construction
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    columns: Vec<Column>,
}

impl SchemaBuilder {
    /// Append a column of any type
    pub fn column(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
        self.columns.push(Column::new(name, column_type));
        self
    }

    /// Append a Bool column
    pub fn bool(self, name: impl Into<String>) -> Self {
        self.column(name, ColumnType::Bool)
    }

    /// Append an Integer column
    pub fn integer(self, name: impl Into<String>) -> Self {
        self.column(name, ColumnType::Integer)
    }

    /// Append a String column
    pub fn string(self, name: impl Into<String>) -> Self {
        self.column(name, ColumnType::String)
    }

    /// Append a DateTime column
    pub fn datetime(self, name: impl Into<String>) -> Self {
        self.column(name, ColumnType::DateTime)
    }

    /// Append a Double column
    pub fn double(self, name: impl Into<String>) -> Self {
        self.column(name, ColumnType::Double)
    }

    /// Validate and build the schema
    pub fn build(self) -> Result<Schema> {
        Schema::new(self.columns)
    }
}
