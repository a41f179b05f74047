//! Table store
//!
//! A [`Table`] is a fixed definition ([`TableDef`]) plus replaceable
//! contents: the rows, where they came from, and the last-modified
//! timestamp believed current. Contents are swapped in one write-locked
//! step, so readers never see a half-loaded table.
//!
//! Table file (`<name>_cache.bin`):
//!
//! ```text
//! rowCount:Int
//! rowCount x Row
//! ```

use bytes::Bytes;
use chrono::NaiveDateTime;
use parking_lot::RwLock;
use std::fmt;
use std::path::{Path, PathBuf};
use tablemirror_rdbc::Row as DbRow;
use tokio::fs;
use tracing::{debug, warn};

use crate::codec::{Decoder, Encoder};
use crate::column::Schema;
use crate::error::{CacheError, Result};
use crate::row::Row;

/// Suffix of per-table cache files
pub const TABLE_FILE_SUFFIX: &str = "_cache.bin";

/// Builds an empty row
pub type EmptyRowFn = fn(&Schema) -> Row;
/// Builds a row from a query result row; the first argument is the table name
pub type ResultRowFn = fn(&str, &Schema, &DbRow) -> Result<Row>;
/// Decodes a row from a table file; the first argument is the table name
pub type DecodeRowFn = fn(&str, &Schema, &mut Decoder<'_>) -> Result<Row>;

/// Row constructors registered with a table definition
#[derive(Clone, Copy)]
pub struct RowFactory {
    /// Fresh row with default values
    pub empty: EmptyRowFn,
    /// Row from a query result
    pub from_result: ResultRowFn,
    /// Row from a table file
    pub from_bytes: DecodeRowFn,
}

impl Default for RowFactory {
    fn default() -> Self {
        Self {
            empty: Row::new,
            from_result: Row::from_result,
            from_bytes: Row::decode,
        }
    }
}

impl fmt::Debug for RowFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowFactory").finish_non_exhaustive()
    }
}

/// Static description of a cached table
#[derive(Debug, Clone)]
pub struct TableDef {
    /// Table name, also the SQL table queried
    pub name: String,
    /// Declared columns
    pub schema: Schema,
    /// Appended to the SELECT; empty fetches every row
    pub where_clause: String,
    /// Row constructors
    pub factory: RowFactory,
}

impl TableDef {
    /// Definition with no filter and the default row factory
    pub fn new(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            name: name.into(),
            schema,
            where_clause: String::new(),
            factory: RowFactory::default(),
        }
    }

    /// Restrict the rows fetched, e.g. `WHERE deleted = 0`
    pub fn with_where(mut self, clause: impl Into<String>) -> Self {
        self.where_clause = clause.into();
        self
    }

    /// Use custom row constructors
    pub fn with_factory(mut self, factory: RowFactory) -> Self {
        self.factory = factory;
        self
    }
}

/// Where a table's current rows came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TableSource {
    /// Loaded from the database
    Db,
    /// Loaded from the table file
    Disk,
    /// Not loaded yet
    #[default]
    Unknown,
}

impl fmt::Display for TableSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Db => write!(f, "DB"),
            Self::Disk => write!(f, "Disk"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Diagnostic record of who loaded a table and over which connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    /// Where the rows came from
    pub source: TableSource,
    /// Worker that loaded the table
    pub worker: String,
    /// Connection the rows were read over
    pub connection: String,
}

impl Provenance {
    /// Provenance of a database load
    pub fn db(worker: impl Into<String>, connection: impl Into<String>) -> Self {
        Self {
            source: TableSource::Db,
            worker: worker.into(),
            connection: connection.into(),
        }
    }

    /// Provenance of a load from disk
    pub fn disk(worker: impl Into<String>) -> Self {
        Self {
            source: TableSource::Disk,
            worker: worker.into(),
            connection: "disk".to_string(),
        }
    }
}

#[derive(Debug)]
struct TableState {
    rows: Vec<Row>,
    provenance: Provenance,
    last_modified: Option<NaiveDateTime>,
}

/// A named, typed container of rows
#[derive(Debug)]
pub struct Table {
    def: TableDef,
    state: RwLock<TableState>,
}

impl Table {
    /// Empty table for `def`
    pub fn new(def: TableDef) -> Self {
        Self {
            def,
            state: RwLock::new(TableState {
                rows: Vec::new(),
                provenance: Provenance {
                    source: TableSource::Unknown,
                    worker: String::new(),
                    connection: String::new(),
                },
                // Until a cycle stamps it, the table claims to be newer than anything
                last_modified: Some(NaiveDateTime::MAX),
            }),
        }
    }

    /// Table name
    pub fn name(&self) -> &str {
        &self.def.name
    }

    /// Declared columns
    pub fn schema(&self) -> &Schema {
        &self.def.schema
    }

    /// Definition the table was created from
    pub fn def(&self) -> &TableDef {
        &self.def
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.state.read().rows.len()
    }

    /// Whether the table holds no rows
    pub fn is_empty(&self) -> bool {
        self.state.read().rows.is_empty()
    }

    /// Snapshot of the current rows
    pub fn rows(&self) -> Vec<Row> {
        self.state.read().rows.clone()
    }

    /// Run `f` over the current rows without cloning them
    pub fn with_rows<R>(&self, f: impl FnOnce(&[Row]) -> R) -> R {
        f(&self.state.read().rows)
    }

    /// Empty row built by the registered factory
    pub fn new_row(&self) -> Row {
        (self.def.factory.empty)(&self.def.schema)
    }

    /// Append a row; its schema must match the table's
    pub fn add(&self, row: Row) -> Result<()> {
        if row.schema() != &self.def.schema {
            return Err(CacheError::schema(
                &self.def.name,
                "row was built for a different schema",
            ));
        }
        self.state.write().rows.push(row);
        Ok(())
    }

    /// Remove every row
    pub fn clear(&self) {
        self.state.write().rows.clear();
    }

    /// Swap in a complete set of rows and record where they came from
    pub fn replace_rows(&self, rows: Vec<Row>, provenance: Provenance) {
        let mut state = self.state.write();
        state.rows = rows;
        state.provenance = provenance;
    }

    /// Who loaded the current rows and how
    pub fn provenance(&self) -> Provenance {
        self.state.read().provenance.clone()
    }

    /// Where the current rows came from
    pub fn source(&self) -> TableSource {
        self.state.read().provenance.source
    }

    /// Server timestamp the current rows correspond to
    pub fn last_modified(&self) -> Option<NaiveDateTime> {
        self.state.read().last_modified
    }

    /// Record the server timestamp the rows correspond to
    pub fn set_last_modified(&self, value: Option<NaiveDateTime>) {
        self.state.write().last_modified = value;
    }

    /// Query that fetches this table's rows
    pub fn select_sql(&self) -> String {
        format!("SELECT * FROM {} {};", self.def.name, self.def.where_clause)
    }

    /// Convert query results with the registered factory
    pub fn rows_from_result(&self, db_rows: &[DbRow]) -> Result<Vec<Row>> {
        db_rows
            .iter()
            .map(|r| (self.def.factory.from_result)(&self.def.name, &self.def.schema, r))
            .collect()
    }

    /// Serialize the current rows
    pub fn encode(&self) -> Result<Bytes> {
        let state = self.state.read();
        let mut enc = Encoder::with_capacity(64 * (state.rows.len() + 1));
        enc.put_len(state.rows.len())?;
        for row in &state.rows {
            row.encode(&mut enc)?;
        }
        Ok(enc.freeze())
    }

    /// Decode a table file's contents with the registered factory
    pub fn decode_rows(&self, bytes: &[u8]) -> Result<Vec<Row>> {
        let mut dec = Decoder::new(bytes);
        let count = dec.get_len()?;
        let mut rows = Vec::with_capacity(count.min(dec.remaining()));
        for _ in 0..count {
            rows.push((self.def.factory.from_bytes)(
                &self.def.name,
                &self.def.schema,
                &mut dec,
            )?);
        }
        if !dec.is_empty() {
            return Err(CacheError::codec(format!(
                "{} trailing bytes after {count} rows",
                dec.remaining()
            )));
        }
        Ok(rows)
    }

    /// Name of the table file, `<table>_cache.bin`
    pub fn file_name(&self) -> String {
        format!("{}{TABLE_FILE_SUFFIX}", self.def.name)
    }

    /// Path of the table file inside `dir`
    pub fn file_path(&self, dir: &Path) -> PathBuf {
        dir.join(self.file_name())
    }

    /// Write the table file (temp file + rename)
    pub async fn save_to_disk(&self, dir: &Path) -> Result<()> {
        let bytes = self.encode()?;
        fs::create_dir_all(dir).await?;
        let path = self.file_path(dir);
        let temp_path = path.with_extension("bin.tmp");
        fs::write(&temp_path, &bytes).await?;
        fs::rename(&temp_path, &path).await?;
        debug!(table = %self.def.name, bytes = bytes.len(), "Saved table file");
        Ok(())
    }

    /// Replace the rows with the table file's contents
    ///
    /// A file that cannot be decoded is deleted before the error is returned.
    /// Returns the number of rows loaded.
    pub async fn load_from_disk(&self, dir: &Path, worker: &str) -> Result<usize> {
        let path = self.file_path(dir);
        let bytes = fs::read(&path).await?;
        match self.decode_rows(&bytes) {
            Ok(rows) => {
                let count = rows.len();
                self.replace_rows(rows, Provenance::disk(worker));
                Ok(count)
            }
            Err(e) => {
                warn!(table = %self.def.name, path = ?path, error = %e, "Corrupt table file, deleting");
                if let Err(rm) = fs::remove_file(&path).await {
                    warn!(path = ?path, error = %rm, "Failed to delete corrupt table file");
                }
                Err(e)
            }
        }
    }

    /// Header line plus one CSV line per row
    pub fn dump(&self) -> String {
        let header = self
            .def
            .schema
            .columns()
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join(",");
        self.with_rows(|rows| {
            let mut out = header;
            for row in rows {
                out.push('\n');
                out.push_str(&row.to_string());
            }
            out
        })
    }
}

impl PartialEq for Table {
    fn eq(&self, other: &Self) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        let mine = self.rows();
        other.with_rows(|theirs| mine.as_slice() == theirs)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.with_rows(|rows| {
            f.write_str("[")?;
            for (i, row) in rows.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{row}")?;
            }
            f.write_str("]")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::Schema;
    use chrono::NaiveDate;
    use tablemirror_rdbc::Value;

    fn users() -> Table {
        let schema = Schema::builder()
            .integer("id")
            .string("name")
            .double("score")
            .datetime("seen")
            .build()
            .unwrap();
        Table::new(TableDef::new("users", schema).with_where("WHERE id > 0"))
    }

    fn filled(table: &Table) {
        let a = table.new_row();
        a.set("id", 1).unwrap();
        a.set("name", "ann").unwrap();
        a.set("score", 0.25).unwrap();
        a.set(
            "seen",
            NaiveDate::from_ymd_opt(2024, 1, 2)
                .unwrap()
                .and_hms_opt(3, 4, 5)
                .unwrap(),
        )
        .unwrap();
        let b = table.new_row();
        b.set("id", 2).unwrap();
        b.set("seen", Some(NaiveDateTime::MAX)).unwrap();
        let c = table.new_row();
        c.set("id", 3).unwrap();
        c.set("seen", Some(NaiveDateTime::MIN)).unwrap();
        table.replace_rows(vec![a, b, c], Provenance::db("w", "db:1"));
    }

    #[test]
    fn test_new_table_state() {
        let table = users();
        assert!(table.is_empty());
        assert_eq!(table.source(), TableSource::Unknown);
        assert_eq!(table.last_modified(), Some(NaiveDateTime::MAX));
        assert_eq!(table.file_name(), "users_cache.bin");
        assert_eq!(table.select_sql(), "SELECT * FROM users WHERE id > 0;");
    }

    #[test]
    fn test_encode_decode_preserves_rows_and_order() {
        let table = users();
        filled(&table);

        let bytes = table.encode().unwrap();
        let rows = table.decode_rows(&bytes).unwrap();
        assert_eq!(rows, table.rows());
        assert_eq!(rows[0].get("id").and_then(|c| c.as_int()), Some(1));
        assert_eq!(rows[2].get("id").and_then(|c| c.as_int()), Some(3));
    }

    #[test]
    fn test_decode_rejects_truncation_and_trailing_bytes() {
        let table = users();
        filled(&table);
        let bytes = table.encode().unwrap();

        assert!(table.decode_rows(&bytes[..bytes.len() - 3]).is_err());

        let mut extended = bytes.to_vec();
        extended.push(0);
        assert!(table.decode_rows(&extended).is_err());
    }

    #[test]
    fn test_rows_from_result() {
        let table = users();
        let rows = table
            .rows_from_result(&[DbRow::from_pairs([
                ("id", Value::from(5)),
                ("name", Value::from("eve")),
                ("score", Value::Null),
                ("seen", Value::from("2024-01-02 03:04:05")),
            ])])
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].to_string(), "5,eve,0,02.01.2024 03:04:05");
    }

    #[test]
    fn test_add_rejects_foreign_schema() {
        let table = users();
        let other = Schema::builder().integer("x").build().unwrap();
        assert!(table.add(Row::new(&other)).is_err());
        assert!(table.add(table.new_row()).is_ok());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_display_and_dump() {
        let table = users();
        assert_eq!(table.to_string(), "[]");
        let row = table.new_row();
        row.set("id", 1).unwrap();
        table.add(row).unwrap();
        assert_eq!(table.to_string(), "[1,,0,NULL]");
        assert_eq!(table.dump(), "id,name,score,seen\n1,,0,NULL");
    }

    #[tokio::test]
    async fn test_save_and_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let table = users();
        filled(&table);
        table.save_to_disk(dir.path()).await.unwrap();

        let restored = users();
        let count = restored.load_from_disk(dir.path(), "worker-1").await.unwrap();
        assert_eq!(count, 3);
        assert_eq!(restored, table);
        let provenance = restored.provenance();
        assert_eq!(provenance.source, TableSource::Disk);
        assert_eq!(provenance.worker, "worker-1");
        assert_eq!(provenance.connection, "disk");
    }

    #[tokio::test]
    async fn test_corrupt_file_is_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let table = users();
        let path = table.file_path(dir.path());
        std::fs::write(&path, [0, 0, 0, 9, 1]).unwrap();

        let err = table.load_from_disk(dir.path(), "w").await.unwrap_err();
        assert!(err.is_corruption());
        assert!(!path.exists());
        assert_eq!(table.source(), TableSource::Unknown);
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = users().load_from_disk(dir.path(), "w").await.unwrap_err();
        assert!(matches!(err, CacheError::Io(_)));
    }
}
