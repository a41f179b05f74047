//! In-memory database backend for tests
//!
//! [`MockServer`] holds named tables of [`Row`]s and answers
//! `SELECT * FROM <table> ...` queries. Failures can be injected per table,
//! on connect and on close, and every URL a connection was opened against
//! is recorded.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use crate::connection::{Connection, ConnectionConfig, ConnectionFactory, DatabaseType};
use crate::error::{Error, Result};
use crate::types::{Row, Value};

static SELECT_FROM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*SELECT\s+\*\s+FROM\s+`?([A-Za-z0-9_]+)`?").unwrap());

/// Shared state behind every mock connection
#[derive(Default)]
pub struct MockServer {
    tables: RwLock<HashMap<String, Vec<Row>>>,
    failing_tables: RwLock<HashSet<String>>,
    connect_failures: AtomicUsize,
    fail_close: AtomicBool,
    query_delay: Mutex<Option<Duration>>,
    urls: Mutex<Vec<String>>,
    queries: Mutex<Vec<String>>,
    open: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockServer {
    /// Create an empty server
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Replace a table's rows
    pub fn set_table(&self, name: impl Into<String>, rows: Vec<Row>) {
        self.tables.write().insert(name.into(), rows);
    }

    /// Upsert a `last_modified` row for `table`
    ///
    /// `value` is stored verbatim as the `localDateTime` column.
    pub fn set_last_modified(&self, table: &str, value: &str) {
        let mut tables = self.tables.write();
        let rows = tables.entry("last_modified".to_string()).or_default();
        rows.retain(|r| r.get_by_name("tableName").and_then(Value::as_str) != Some(table));
        rows.push(Row::from_pairs([
            ("tableName", Value::from(table)),
            ("localDateTime", Value::from(value)),
        ]));
    }

    /// Make every query against `table` fail
    pub fn fail_table(&self, table: impl Into<String>) {
        self.failing_tables.write().insert(table.into());
    }

    /// Stop failing queries against `table`
    pub fn heal_table(&self, table: &str) {
        self.failing_tables.write().remove(table);
    }

    /// Make the next `n` connect attempts fail
    pub fn fail_next_connects(&self, n: usize) {
        self.connect_failures.store(n, Ordering::SeqCst);
    }

    /// Make `close()` fail on every connection
    pub fn fail_close(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::SeqCst);
    }

    /// Delay every query, to widen concurrency windows in tests
    pub fn set_query_delay(&self, delay: Duration) {
        *self.query_delay.lock() = Some(delay);
    }

    /// URLs of every connection opened so far, in order
    pub fn connected_urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }

    /// Every query executed so far, in order
    pub fn executed_queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }

    /// Number of queries that targeted `table`
    pub fn query_count(&self, table: &str) -> usize {
        self.queries
            .lock()
            .iter()
            .filter(|sql| parse_table(sql).as_deref() == Some(table))
            .count()
    }

    /// Connections opened and not yet closed
    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Highest number of queries that ran at the same time
    pub fn max_concurrent_queries(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn take_connect_failure(&self) -> bool {
        self.connect_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    async fn run_query(&self, sql: &str) -> Result<Vec<Row>> {
        self.queries.lock().push(sql.to_string());
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let delay = *self.query_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let result = self.answer(sql);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn answer(&self, sql: &str) -> Result<Vec<Row>> {
        let table = parse_table(sql)
            .ok_or_else(|| Error::query_with_sql("unsupported statement", sql))?;
        if self.failing_tables.read().contains(&table) {
            return Err(Error::query_with_sql(format!("injected failure for {table}"), sql));
        }
        self.tables
            .read()
            .get(&table)
            .cloned()
            .ok_or(Error::TableNotFound { table })
    }
}

fn parse_table(sql: &str) -> Option<String> {
    SELECT_FROM
        .captures(sql)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Connection to a [`MockServer`]
pub struct MockConnection {
    url: String,
    server: Arc<MockServer>,
    closed: AtomicBool,
}

#[async_trait]
impl Connection for MockConnection {
    async fn query(&self, sql: &str) -> Result<Vec<Row>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::connection("connection is closed"));
        }
        self.server.run_query(sql).await
    }

    fn url(&self) -> &str {
        &self.url
    }

    async fn is_valid(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.server.open.fetch_sub(1, Ordering::SeqCst);
        }
        if self.server.fail_close.load(Ordering::SeqCst) {
            return Err(Error::connection(format!("close failed for {}", self.url)));
        }
        Ok(())
    }
}

/// Factory producing [`MockConnection`]s
pub struct MockConnectionFactory {
    server: Arc<MockServer>,
}

impl MockConnectionFactory {
    /// Create a factory for `server`
    pub fn new(server: Arc<MockServer>) -> Self {
        Self { server }
    }
}

#[async_trait]
impl ConnectionFactory for MockConnectionFactory {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        if self.server.take_connect_failure() {
            return Err(Error::connection(format!("injected connect failure for {}", config.url)));
        }
        self.server.urls.lock().push(config.url.clone());
        self.server.open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            url: config.url.clone(),
            server: Arc::clone(&self.server),
            closed: AtomicBool::new(false),
        }))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::MariaDB
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_answers_select() {
        let server = MockServer::new();
        server.set_table("users", vec![Row::from_pairs([("id", Value::from(1))])]);
        let factory = MockConnectionFactory::new(Arc::clone(&server));

        let conn = factory
            .connect(&ConnectionConfig::new("mock://db:1/app"))
            .await
            .unwrap();
        let rows = conn.query("SELECT * FROM users WHERE id > 0;").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(server.query_count("users"), 1);
        assert!(conn.query("SELECT * FROM missing ;").await.is_err());
    }

    #[tokio::test]
    async fn test_mock_injected_failures() {
        let server = MockServer::new();
        server.set_table("users", Vec::new());
        server.fail_table("users");
        server.fail_next_connects(1);
        let factory = MockConnectionFactory::new(Arc::clone(&server));
        let config = ConnectionConfig::new("mock://db:1/app");

        assert!(factory.connect(&config).await.is_err());
        let conn = factory.connect(&config).await.unwrap();
        assert!(conn.query("SELECT * FROM users ;").await.is_err());

        server.heal_table("users");
        assert!(conn.query("SELECT * FROM users ;").await.is_ok());
        assert_eq!(server.connected_urls(), vec!["mock://db:1/app".to_string()]);
    }

    #[test]
    fn test_set_last_modified_upserts() {
        let server = MockServer::new();
        server.set_last_modified("a", "2024-01-01 00:00:00");
        server.set_last_modified("a", "2024-02-01 00:00:00");
        let rows = server.answer("SELECT * FROM last_modified ").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].get_by_name("localDateTime"),
            Some(&Value::from("2024-02-01 00:00:00"))
        );
    }
}
