//! Diagnostic table of the cache state, logged after every load

use chrono::NaiveDateTime;
use std::fmt;
use std::sync::Arc;

use crate::codec::format_datetime;
use crate::table::{Table, TableSource};

const HEADER: [&str; 6] = [
    "Name",
    "Rows",
    "Source",
    "Last modified",
    "Worker",
    "Connection",
];

/// State of one table at capture time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSummary {
    /// Table name
    pub name: String,
    /// Row count
    pub rows: usize,
    /// Where the rows came from
    pub source: TableSource,
    /// Server timestamp the rows correspond to
    pub last_modified: Option<NaiveDateTime>,
    /// Worker that loaded the table
    pub worker: String,
    /// Connection description, `disk` for file loads
    pub connection: String,
}

impl TableSummary {
    fn cells(&self) -> [String; 6] {
        [
            self.name.clone(),
            self.rows.to_string(),
            self.source.to_string(),
            format_datetime(self.last_modified),
            self.worker.clone(),
            self.connection.clone(),
        ]
    }
}

/// Point-in-time view of every table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheSummary {
    entries: Vec<TableSummary>,
}

impl CacheSummary {
    /// Snapshot `tables` in order
    pub fn capture(tables: &[Arc<Table>]) -> Self {
        let entries = tables
            .iter()
            .map(|t| {
                let provenance = t.provenance();
                TableSummary {
                    name: t.name().to_string(),
                    rows: t.len(),
                    source: provenance.source,
                    last_modified: t.last_modified(),
                    worker: provenance.worker,
                    connection: provenance.connection,
                }
            })
            .collect();
        Self { entries }
    }

    /// Per-table entries in declaration order
    pub fn entries(&self) -> &[TableSummary] {
        &self.entries
    }

    /// Entry for table `name`
    pub fn get(&self, name: &str) -> Option<&TableSummary> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Rows across all tables
    pub fn total_rows(&self) -> usize {
        self.entries.iter().map(|e| e.rows).sum()
    }

    /// Tables whose rows came from `source`
    pub fn count(&self, source: TableSource) -> usize {
        self.entries.iter().filter(|e| e.source == source).count()
    }
}

impl fmt::Display for CacheSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows: Vec<[String; 6]> = self.entries.iter().map(TableSummary::cells).collect();

        let mut widths = HEADER.map(str::len);
        for row in &rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }

        let write_line = |f: &mut fmt::Formatter<'_>, cells: &[&str]| -> fmt::Result {
            for (i, (cell, width)) in cells.iter().zip(widths).enumerate() {
                if i > 0 {
                    f.write_str(" | ")?;
                }
                // Numbers right-aligned, last column unpadded
                if i == 1 {
                    write!(f, "{cell:>width$}")?;
                } else if i == cells.len() - 1 {
                    f.write_str(cell)?;
                } else {
                    write!(f, "{cell:<width$}")?;
                }
            }
            writeln!(f)
        };

        write_line(f, &HEADER)?;
        let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        writeln!(f, "{}", rule.join("-+-"))?;
        for row in &rows {
            let cells: Vec<&str> = row.iter().map(String::as_str).collect();
            write_line(f, &cells)?;
        }
        write!(
            f,
            "{} table(s), {} row(s): {} from DB, {} from disk",
            self.entries.len(),
            self.total_rows(),
            self.count(TableSource::Db),
            self.count(TableSource::Disk)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::Schema;
    use crate::table::{Provenance, TableDef};

    fn table(name: &str) -> Arc<Table> {
        let schema = Schema::builder().integer("id").build().unwrap();
        Arc::new(Table::new(TableDef::new(name, schema)))
    }

    #[test]
    fn test_capture() {
        let users = table("users");
        users.replace_rows(
            vec![users.new_row(), users.new_row()],
            Provenance::db("worker-0", "CLUSTER db1:3306,db2:3306"),
        );
        users.set_last_modified(None);
        let tags = table("tags");
        tags.replace_rows(vec![], Provenance::disk("worker-1"));

        let summary = CacheSummary::capture(&[users, tags]);
        assert_eq!(summary.entries().len(), 2);
        assert_eq!(summary.total_rows(), 2);
        assert_eq!(summary.count(TableSource::Db), 1);

        let users = summary.get("users").unwrap();
        assert_eq!(users.connection, "CLUSTER db1:3306,db2:3306");
        assert_eq!(users.last_modified, None);
        assert_eq!(summary.get("tags").unwrap().connection, "disk");
    }

    #[test]
    fn test_display_layout() {
        let users = table("users");
        users.replace_rows(vec![users.new_row()], Provenance::disk("worker-3"));

        let text = CacheSummary::capture(&[users]).to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("Name  | Rows | Source | Last modified"));
        assert!(lines[1].contains("-+-"));
        assert!(lines[2].starts_with("users |    1 | Disk"));
        assert!(lines[2].contains("LocalDateTime.MAX"));
        assert!(lines[2].ends_with("disk"));
        assert_eq!(lines[3], "1 table(s), 1 row(s): 0 from DB, 1 from disk");
    }

    #[test]
    fn test_empty_summary() {
        let text = CacheSummary::default().to_string();
        assert_eq!(text.lines().count(), 3);
        assert!(text.ends_with("0 table(s), 0 row(s): 0 from DB, 0 from disk"));
    }
}
