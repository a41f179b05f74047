//! Typed, dirty-tracking cells
//!
//! A [`Cell`] owns one value of its column's declared type and a `changed`
//! flag. Both sit behind one per-cell mutex so workers filling rows and
//! readers inspecting them never observe a value without its flag.

use chrono::{NaiveDateTime, Timelike};
use parking_lot::Mutex;
use std::fmt;
use tablemirror_rdbc::Value;

use crate::codec::{self, Decoder, Encoder};
use crate::column::{Column, ColumnType};
use crate::error::{CacheError, Result};

/// Value held by a cell
#[derive(Debug, Clone)]
pub enum CellValue {
    /// Bool column value
    Bool(bool),
    /// Integer column value
    Integer(i32),
    /// String column value
    String(String),
    /// Double column value
    Double(f64),
    /// Timestamp; `None` is the null sentinel
    DateTime(Option<NaiveDateTime>),
}

fn truncate_to_seconds(dt: NaiveDateTime) -> NaiveDateTime {
    dt.with_nanosecond(0).unwrap_or(dt)
}

impl CellValue {
    /// Column type this value belongs to
    pub fn column_type(&self) -> ColumnType {
        match self {
            Self::Bool(_) => ColumnType::Bool,
            Self::Integer(_) => ColumnType::Integer,
            Self::String(_) => ColumnType::String,
            Self::Double(_) => ColumnType::Double,
            Self::DateTime(_) => ColumnType::DateTime,
        }
    }

    /// Convert a driver value to the declared column type
    ///
    /// SQL NULL becomes the type's default; for DateTime that is null.
    pub fn from_sql(column: &Column, value: &Value) -> Result<Self> {
        let ty = column.column_type;
        if value.is_null() {
            return Ok(ty.default_value());
        }
        let mismatch = || CacheError::TypeMismatch {
            column: column.name.clone(),
            expected: ty.to_string(),
            actual: value.sql_type().to_string(),
        };
        match ty {
            ColumnType::Bool => value.as_bool().map(Self::Bool).ok_or_else(mismatch),
            ColumnType::Integer => value.as_i32().map(Self::Integer).ok_or_else(mismatch),
            ColumnType::Double => value.as_f64().map(Self::Double).ok_or_else(mismatch),
            ColumnType::String => value.as_string().map(Self::String).ok_or_else(mismatch),
            ColumnType::DateTime => match value {
                Value::DateTime(dt) => Ok(Self::DateTime(Some(*dt))),
                Value::String(s) => codec::parse_sql_datetime(s)
                    .map(Self::DateTime)
                    .map_err(|_| mismatch()),
                _ => Err(mismatch()),
            },
        }
    }

    /// Write the value in its column type's encoding
    pub fn encode(&self, enc: &mut Encoder) -> Result<()> {
        match self {
            Self::Bool(v) => enc.put_bool(*v),
            Self::Integer(v) => enc.put_int(*v),
            Self::String(v) => return enc.put_string(v),
            Self::Double(v) => return enc.put_double(*v),
            Self::DateTime(v) => return enc.put_datetime(*v),
        }
        Ok(())
    }

    /// Read a value of type `ty`
    pub fn decode(ty: ColumnType, dec: &mut Decoder<'_>) -> Result<Self> {
        Ok(match ty {
            ColumnType::Bool => Self::Bool(dec.get_bool()?),
            ColumnType::Integer => Self::Integer(dec.get_int()?),
            ColumnType::String => Self::String(dec.get_string()?),
            ColumnType::Double => Self::Double(dec.get_double()?),
            ColumnType::DateTime => Self::DateTime(dec.get_datetime()?),
        })
    }
}

impl PartialEq for CellValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Double(a), Self::Double(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Self::DateTime(a), Self::DateTime(b)) => {
                a.map(truncate_to_seconds) == b.map(truncate_to_seconds)
            }
            _ => false,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::DateTime(v) => write!(f, "{}", codec::format_datetime(*v)),
        }
    }
}

impl From<bool> for CellValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for CellValue {
    fn from(v: i32) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for CellValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<String> for CellValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for CellValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<NaiveDateTime> for CellValue {
    fn from(v: NaiveDateTime) -> Self {
        Self::DateTime(Some(v))
    }
}

impl From<Option<NaiveDateTime>> for CellValue {
    fn from(v: Option<NaiveDateTime>) -> Self {
        Self::DateTime(v)
    }
}

#[derive(Debug, Clone)]
struct CellState {
    value: CellValue,
    changed: bool,
}

/// A named, typed, dirty-tracked value inside a row
#[derive(Debug)]
pub struct Cell {
    column: Column,
    state: Mutex<CellState>,
}

impl Cell {
    /// Create a default-valued cell for `column`
    pub fn new(column: &Column) -> Self {
        Self {
            column: column.clone(),
            state: Mutex::new(CellState {
                value: column.column_type.default_value(),
                changed: false,
            }),
        }
    }

    /// Column name
    pub fn name(&self) -> &str {
        &self.column.name
    }

    /// Declared column type
    pub fn column_type(&self) -> ColumnType {
        self.column.column_type
    }

    /// Snapshot of the current value
    pub fn value(&self) -> CellValue {
        self.state.lock().value.clone()
    }

    /// Store `value`, marking the cell changed if it differs from the current one
    ///
    /// Returns whether the value changed. A value of another type is rejected.
    pub fn set_value(&self, value: impl Into<CellValue>) -> Result<bool> {
        let value = value.into();
        if value.column_type() != self.column.column_type {
            return Err(CacheError::TypeMismatch {
                column: self.column.name.clone(),
                expected: self.column.column_type.to_string(),
                actual: value.column_type().to_string(),
            });
        }
        let mut state = self.state.lock();
        if state.value == value {
            return Ok(false);
        }
        state.value = value;
        state.changed = true;
        Ok(true)
    }

    /// Whether a differing value was stored since creation
    pub fn is_changed(&self) -> bool {
        self.state.lock().changed
    }

    /// Bool value, `None` for other types
    pub fn as_bool(&self) -> Option<bool> {
        match self.value() {
            CellValue::Bool(v) => Some(v),
            _ => None,
        }
    }

    /// Integer value, `None` for other types
    pub fn as_int(&self) -> Option<i32> {
        match self.value() {
            CellValue::Integer(v) => Some(v),
            _ => None,
        }
    }

    /// Double value, `None` for other types
    pub fn as_double(&self) -> Option<f64> {
        match self.value() {
            CellValue::Double(v) => Some(v),
            _ => None,
        }
    }

    /// String value, `None` for other types
    pub fn as_string(&self) -> Option<String> {
        match self.value() {
            CellValue::String(v) => Some(v),
            _ => None,
        }
    }

    /// Timestamp value; `None` both for null and for non-DateTime cells
    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self.value() {
            CellValue::DateTime(v) => v,
            _ => None,
        }
    }
}

impl Clone for Cell {
    fn clone(&self) -> Self {
        Self {
            column: self.column.clone(),
            state: Mutex::new(self.state.lock().clone()),
        }
    }
}

impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        self.column == other.column && self.value() == other.value()
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}
