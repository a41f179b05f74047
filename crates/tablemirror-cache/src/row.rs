//! Rows of typed cells
//!
//! Row encoding:
//!
//! ```text
//! cellCount:Int
//! cellCount x { typeTag:Int, name:String, value:<type-specific> }
//! ```
//!
//! Each encoded cell names itself, and decoding verifies the stored tag
//! against the declared schema instead of trusting the file.

use std::fmt;
use tablemirror_rdbc::Row as DbRow;

use crate::cell::{Cell, CellValue};
use crate::codec::{Decoder, Encoder};
use crate::column::{ColumnType, Schema};
use crate::error::{CacheError, Result};

/// One row of a mirrored table, cells in schema order
#[derive(Debug, Clone)]
pub struct Row {
    schema: Schema,
    cells: Vec<Cell>,
    is_new: bool,
}

impl Row {
    /// Create an empty row with default-valued cells
    pub fn new(schema: &Schema) -> Self {
        Self {
            schema: schema.clone(),
            cells: schema.columns().iter().map(Cell::new).collect(),
            is_new: true,
        }
    }

    /// Create an empty row, carrying over same-named, same-typed values from `prior`
    ///
    /// Used when a row kind gains or drops columns.
    pub fn with_values_from(schema: &Schema, prior: &Row) -> Self {
        let row = Self::new(schema);
        for cell in &row.cells {
            if let Some(old) = prior.get(cell.name()) {
                if old.column_type() == cell.column_type() {
                    // Types match, so this cannot fail
                    let _ = cell.set_value(old.value());
                }
            }
        }
        row
    }

    /// Build a row from a query result row, reading every column by name
    pub fn from_result(table: &str, schema: &Schema, db_row: &DbRow) -> Result<Self> {
        let mut row = Self::new(schema);
        for (cell, column) in row.cells.iter().zip(schema.columns()) {
            let raw = db_row
                .get_by_name(&column.name)
                .ok_or_else(|| CacheError::UnknownColumn {
                    table: table.to_string(),
                    column: column.name.clone(),
                })?;
            cell.set_value(CellValue::from_sql(column, raw)?)?;
        }
        row.is_new = false;
        Ok(row)
    }

    /// Decode one row written by [`encode`](Self::encode)
    pub fn decode(table: &str, schema: &Schema, dec: &mut Decoder<'_>) -> Result<Self> {
        let mut row = Self::new(schema);
        let count = dec.get_len()?;
        for _ in 0..count {
            let tag = dec.get_int()?;
            let stored_type = ColumnType::from_id(tag)?;
            let name = dec.get_string()?;
            let index = schema.index_of(&name).ok_or_else(|| {
                CacheError::schema(table, format!("stored column '{name}' is not declared"))
            })?;
            let cell = &row.cells[index];
            if cell.column_type() != stored_type {
                return Err(CacheError::schema(
                    table,
                    format!(
                        "stored column '{name}' has type {stored_type}, declared {}",
                        cell.column_type()
                    ),
                ));
            }
            cell.set_value(CellValue::decode(stored_type, dec)?)?;
        }
        row.is_new = false;
        Ok(row)
    }

    /// Write the row as a cell count followed by tag, name and value per cell
    pub fn encode(&self, enc: &mut Encoder) -> Result<()> {
        enc.put_len(self.cells.len())?;
        for cell in &self.cells {
            enc.put_int(cell.column_type().id());
            enc.put_string(cell.name())?;
            cell.value().encode(enc)?;
        }
        Ok(())
    }

    /// Schema the row was built for
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Cells in schema order
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// Cell for column `name`
    pub fn get(&self, name: &str) -> Option<&Cell> {
        self.schema.index_of(name).map(|i| &self.cells[i])
    }

    /// Set a cell by column name
    pub fn set(&self, name: &str, value: impl Into<CellValue>) -> Result<bool> {
        self.get(name)
            .ok_or_else(|| CacheError::config(format!("row has no column '{name}'")))?
            .set_value(value)
    }

    /// True until the row has been populated from a query or a file
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// Whether any cell changed since construction
    pub fn is_changed(&self) -> bool {
        self.cells.iter().any(Cell::is_changed)
    }
}

impl PartialEq for Row {
    fn eq(&self, other: &Self) -> bool {
        self.cells == other.cells
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, cell) in self.cells.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{cell}")?;
        }
        Ok(())
    }
}
