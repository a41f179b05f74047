//! # Table Cache
//!
//! Keeps a set of declared tables in memory and mirrors them to disk.
//!
//! ## Load Cycle
//!
//! 1. Fetch the server's last-modified map (fatal on failure)
//! 2. Read the manifest and plan each table: disk copy if fresh, DB otherwise
//! 3. Run one unit per table, at most `worker_count` at a time
//! 4. Wait for every unit, then stamp each loaded table with its server timestamp
//! 5. If anything came from the DB, rewrite every table file and then the manifest
//!
//! A unit whose table file is missing or corrupt falls back to the DB.
//! Failed units are collected and returned together; nothing is written
//! when any unit fails.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let cache = TableCache::new(CacheConfig::default(), vec![
//!     TableDef::new("users", users_schema),
//!     TableDef::new("orders", orders_schema).with_where("WHERE archived = 0"),
//! ])?;
//!
//! let report = cache.load_cache(&db).await?;
//! let users = cache.table("users")?;
//! ```

use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tablemirror_rdbc::cluster::connection_info;
use tablemirror_rdbc::database::Database;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::CacheConfig;
use crate::error::{CacheError, Result, TableFailure};
use crate::last_modified::LastModifiedMap;
use crate::manifest::{Manifest, ManifestEntry};
use crate::summary::CacheSummary;
use crate::table::{Provenance, Table, TableDef, TableSource};

/// Id the cache registers under on non-cluster databases
const SESSION_ID: &str = "table-cache";

/// Where a unit is told to load its table from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Plan {
    Db,
    Disk,
}

/// Result of one successful table unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableOutcome {
    /// Declared table name
    pub table: String,
    /// Where the rows finally came from
    pub source: TableSource,
    /// Rows held after the unit finished
    pub rows: usize,
    /// The disk copy was planned but unusable, so the DB was queried instead
    pub fell_back: bool,
    /// Worker that ran the unit
    pub worker: String,
}

/// Summary of one completed cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// One entry per declared table, in declaration order
    pub outcomes: Vec<TableOutcome>,
    /// Whether the table files and manifest were rewritten
    pub snapshot_written: bool,
}

impl CycleReport {
    /// Outcome recorded for `table`
    pub fn outcome(&self, table: &str) -> Option<&TableOutcome> {
        self.outcomes.iter().find(|o| o.table == table)
    }

    /// Number of tables whose rows came from the DB
    pub fn from_db(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.source == TableSource::Db)
            .count()
    }

    /// Number of tables whose rows came from disk
    pub fn from_disk(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.source == TableSource::Disk)
            .count()
    }
}

/// In-memory mirror of a fixed set of tables
pub struct TableCache {
    config: CacheConfig,
    tables: Vec<Arc<Table>>,
    index: HashMap<String, usize>,
    last_modified: RwLock<Arc<LastModifiedMap>>,
    cycle: Mutex<()>,
}

impl TableCache {
    /// Create a cache over `defs`; table names must be unique and non-empty
    pub fn new(config: CacheConfig, defs: Vec<TableDef>) -> Result<Self> {
        config.validate()?;

        let mut index = HashMap::with_capacity(defs.len());
        let mut tables = Vec::with_capacity(defs.len());
        for def in defs {
            if def.name.is_empty()
                || !def
                    .name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                return Err(CacheError::InvalidTableName(def.name));
            }
            if index.insert(def.name.clone(), tables.len()).is_some() {
                return Err(CacheError::config(format!(
                    "table '{}' declared twice",
                    def.name
                )));
            }
            tables.push(Arc::new(Table::new(def)));
        }

        Ok(Self {
            config,
            tables,
            index,
            last_modified: RwLock::new(Arc::new(LastModifiedMap::default())),
            cycle: Mutex::new(()),
        })
    }

    /// Settings the cache was built with
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Directory holding the manifest and table files
    pub fn cache_dir(&self) -> &Path {
        &self.config.cache_dir
    }

    /// Look up a declared table
    pub fn table(&self, name: &str) -> Result<Arc<Table>> {
        if name.is_empty() {
            return Err(CacheError::InvalidTableName(name.to_string()));
        }
        self.index
            .get(name)
            .map(|&i| self.tables[i].clone())
            .ok_or_else(|| CacheError::UnknownTable(name.to_string()))
    }

    /// Every declared table, in declaration order
    pub fn tables(&self) -> &[Arc<Table>] {
        &self.tables
    }

    /// Server timestamps fetched by the latest cycle
    pub fn last_modified_map(&self) -> Arc<LastModifiedMap> {
        self.last_modified.read().clone()
    }

    /// Capture a [`CacheSummary`] of every table's current state
    pub fn summary(&self) -> CacheSummary {
        CacheSummary::capture(&self.tables)
    }

    /// Refresh every table, reusing fresh disk copies
    pub async fn load_cache(&self, db: &Arc<dyn Database>) -> Result<CycleReport> {
        let _cycle = self.cycle.lock().await;
        self.with_session(db.as_ref(), self.run_cycle(db, false))
            .await
    }

    /// Refresh every table from the DB and rewrite the snapshot
    pub async fn force_reload_cache(&self, db: &Arc<dyn Database>) -> Result<CycleReport> {
        let _cycle = self.cycle.lock().await;
        self.with_session(db.as_ref(), self.run_cycle(db, true))
            .await
    }

    /// Load every table listed in the manifest from its file, without a database
    ///
    /// No staleness check is made and nothing is written. A missing manifest
    /// loads nothing.
    pub async fn load_all_from_disk(&self) -> Result<CycleReport> {
        let _cycle = self.cycle.lock().await;
        let dir = self.cache_dir();

        let Some(manifest) = Manifest::read(dir).await? else {
            debug!(dir = ?dir, "No manifest, nothing to load");
            return Ok(CycleReport::default());
        };

        let mut units = Vec::with_capacity(manifest.len());
        for entry in manifest.entries() {
            match self.index.get(&entry.name) {
                Some(&i) => units.push((self.tables[i].clone(), Plan::Disk)),
                None => warn!(table = %entry.name, "Manifest lists an undeclared table, ignoring"),
            }
        }

        let results = self.execute(units, None).await?;
        let report = self.collect(results, |name| {
            manifest.get(name).and_then(|e| e.last_modified)
        })?;

        info!("Cache loaded from disk\n{}", self.summary());
        Ok(report)
    }

    /// Write every table file and then the manifest
    ///
    /// Waits for any running cycle, so two writers never share the temp files.
    pub async fn save_all_to_disk(&self) -> Result<()> {
        let _cycle = self.cycle.lock().await;
        self.write_snapshot().await
    }

    /// Caller holds `self.cycle`
    async fn write_snapshot(&self) -> Result<()> {
        let dir = self.cache_dir();
        for table in &self.tables {
            table.save_to_disk(dir).await?;
        }
        let manifest = Manifest::new(
            self.tables
                .iter()
                .map(|t| ManifestEntry {
                    name: t.name().to_string(),
                    last_modified: t.last_modified(),
                })
                .collect(),
        );
        manifest.write(dir).await?;
        debug!(dir = ?dir, tables = self.tables.len(), "Cache snapshot written");
        Ok(())
    }

    /// Bracket `cycle` with connect/disconnect on databases that share one connection
    async fn with_session<T>(
        &self,
        db: &dyn Database,
        cycle: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        if db.is_cluster() {
            return cycle.await;
        }

        db.connect(SESSION_ID).await?;
        let result = cycle.await;
        if let Err(e) = db.disconnect(SESSION_ID).await {
            warn!(database = db.database_name(), error = %e, "Failed to disconnect after cache cycle");
        }
        result
    }

    async fn run_cycle(&self, db: &Arc<dyn Database>, force: bool) -> Result<CycleReport> {
        let map = Arc::new(
            LastModifiedMap::fetch(db.as_ref(), &self.config.last_modified_table).await?,
        );
        *self.last_modified.write() = map.clone();

        let plans = if force {
            vec![Plan::Db; self.tables.len()]
        } else {
            self.plan(&map).await
        };
        debug!(
            tables = self.tables.len(),
            from_db = plans.iter().filter(|p| **p == Plan::Db).count(),
            force,
            "Cache cycle planned"
        );

        let units = self.tables.iter().cloned().zip(plans).collect();
        let results = self.execute(units, Some(db.clone())).await?;
        let mut report = self.collect(results, |name| map.get(name))?;

        if report.from_db() > 0 {
            self.write_snapshot().await?;
            report.snapshot_written = true;
        }

        info!("Cache loaded\n{}", self.summary());
        Ok(report)
    }

    /// Decide per table whether the disk copy can be used
    async fn plan(&self, map: &LastModifiedMap) -> Vec<Plan> {
        let dir = self.cache_dir();
        let manifest = match Manifest::read(dir).await {
            Ok(Some(manifest)) => manifest,
            Ok(None) => {
                debug!(dir = ?dir, "No manifest, loading every table from the database");
                return vec![Plan::Db; self.tables.len()];
            }
            Err(e) => {
                warn!(dir = ?dir, error = %e, "Corrupt manifest, deleting and reloading everything");
                if let Err(rm) = Manifest::remove(dir).await {
                    warn!(dir = ?dir, error = %rm, "Failed to delete corrupt manifest");
                }
                return vec![Plan::Db; self.tables.len()];
            }
        };

        for entry in manifest.entries() {
            if !self.index.contains_key(&entry.name) {
                warn!(table = %entry.name, "Manifest lists an undeclared table, ignoring");
            }
        }

        self.tables
            .iter()
            .map(|table| match manifest.get(table.name()) {
                Some(entry) if !map.is_stale(table.name(), entry.last_modified) => Plan::Disk,
                _ => Plan::Db,
            })
            .collect()
    }

    /// Run every unit, at most `worker_count` at a time, and wait for all of them
    async fn execute(
        &self,
        units: Vec<(Arc<Table>, Plan)>,
        db: Option<Arc<dyn Database>>,
    ) -> Result<Vec<(String, Result<TableOutcome>)>> {
        let semaphore = Arc::new(Semaphore::new(self.config.worker_count));
        let mut handles: Vec<(String, JoinHandle<Result<TableOutcome>>)> =
            Vec::with_capacity(units.len());

        for (i, (table, plan)) in units.into_iter().enumerate() {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| CacheError::WorkerPanic("worker semaphore closed".into()))?;
            let db = db.clone();
            let dir = self.config.cache_dir.clone();
            let name = table.name().to_string();

            let handle = tokio::spawn(async move {
                let _permit = permit;
                run_unit(&table, plan, db.as_deref(), &dir, format!("worker-{i}")).await
            });
            handles.push((name, handle));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (name, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(CacheError::WorkerPanic(e.to_string())),
            };
            results.push((name, result));
        }
        Ok(results)
    }

    /// Stamp loaded tables and fold unit results into a report or one aggregated error
    fn collect(
        &self,
        results: Vec<(String, Result<TableOutcome>)>,
        timestamp: impl Fn(&str) -> Option<chrono::NaiveDateTime>,
    ) -> Result<CycleReport> {
        let mut outcomes = Vec::with_capacity(results.len());
        let mut failures = Vec::new();

        for (table, result) in results {
            match result {
                Ok(outcome) => {
                    if let Some(&i) = self.index.get(&table) {
                        self.tables[i].set_last_modified(timestamp(&table));
                    }
                    outcomes.push(outcome);
                }
                Err(error) => {
                    error!(table = %table, error = %error, "Table unit failed");
                    failures.push(TableFailure { table, error });
                }
            }
        }

        if !failures.is_empty() {
            return Err(CacheError::TableLoad { failures });
        }
        Ok(CycleReport {
            outcomes,
            snapshot_written: false,
        })
    }
}

impl std::fmt::Debug for TableCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableCache")
            .field("cache_dir", &self.config.cache_dir)
            .field("worker_count", &self.config.worker_count)
            .field("tables", &self.index.keys().collect::<Vec<_>>())
            .finish()
    }
}

async fn run_unit(
    table: &Table,
    plan: Plan,
    db: Option<&dyn Database>,
    dir: &Path,
    worker: String,
) -> Result<TableOutcome> {
    if plan == Plan::Disk {
        match table.load_from_disk(dir, &worker).await {
            Ok(rows) => {
                debug!(table = %table.name(), rows, worker = %worker, "Table loaded from disk");
                return Ok(TableOutcome {
                    table: table.name().to_string(),
                    source: TableSource::Disk,
                    rows,
                    fell_back: false,
                    worker,
                });
            }
            Err(e) if db.is_some() => {
                warn!(table = %table.name(), error = %e, "Table file unusable, loading from database");
            }
            Err(e) => return Err(e),
        }
    }

    let db = db.ok_or_else(|| CacheError::config("no database to load from"))?;
    let result = db.query(&table.select_sql()).await?;
    let rows = table.rows_from_result(&result.rows)?;
    let count = rows.len();
    table.replace_rows(rows, Provenance::db(&worker, connection_info(&result.url)));
    debug!(table = %table.name(), rows = count, worker = %worker, url = %result.url, "Table loaded from database");

    Ok(TableOutcome {
        table: table.name().to_string(),
        source: TableSource::Db,
        rows: count,
        fell_back: plan == Plan::Disk,
        worker,
    })
}
