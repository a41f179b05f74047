//! Tests for tablemirror-rdbc cluster rotation and the cluster database handle

use std::sync::Arc;
use std::time::Duration;
use tablemirror_rdbc::mock::{MockConnectionFactory, MockServer};
use tablemirror_rdbc::prelude::*;

fn cluster_hosts() -> Vec<Host> {
    vec![
        Host::new("localhost", 13306),
        Host::new("localhost", 23306),
        Host::new("localhost", 33306),
    ]
}

fn cluster_config() -> ClusterConfig {
    ClusterConfig::new("ClusterTestDB", cluster_hosts())
        .with_protocol("jdbc:mysql")
        .with_prewarm_delay(Duration::ZERO)
}

const URL_A: &str = "jdbc:mysql://localhost:13306,localhost:23306,localhost:33306/ClusterTestDB";
const URL_B: &str = "jdbc:mysql://localhost:23306,localhost:33306,localhost:13306/ClusterTestDB";
const URL_C: &str = "jdbc:mysql://localhost:33306,localhost:13306,localhost:23306/ClusterTestDB";

// ==================== Rotation Tests ====================

#[tokio::test]
async fn test_successive_connections_rotate_b_c_a() {
    let server = MockServer::new();
    let db = ClusterDatabase::new(
        cluster_config(),
        Arc::new(MockConnectionFactory::new(Arc::clone(&server))),
    )
    .unwrap();

    let pool = Arc::clone(db.pool());
    let c1 = pool.acquire().await.unwrap();
    let c2 = pool.acquire().await.unwrap();
    let c3 = pool.acquire().await.unwrap();

    assert_eq!(c1.url(), URL_B);
    assert_eq!(c2.url(), URL_C);
    assert_eq!(c3.url(), URL_A);
}

#[tokio::test]
async fn test_independent_pools_share_sequence() {
    let first = MockServer::new();
    let second = MockServer::new();
    let db1 = ClusterDatabase::new(
        cluster_config(),
        Arc::new(MockConnectionFactory::new(Arc::clone(&first))),
    )
    .unwrap();
    let db2 = ClusterDatabase::new(
        cluster_config(),
        Arc::new(MockConnectionFactory::new(Arc::clone(&second))),
    )
    .unwrap();

    for _ in 0..4 {
        let _a = db1.pool().acquire().await.unwrap().detach();
        let _b = db2.pool().acquire().await.unwrap().detach();
    }

    assert_eq!(first.connected_urls(), second.connected_urls());
    assert_eq!(first.connected_urls(), vec![URL_B, URL_C, URL_A, URL_B]);
}

#[tokio::test]
async fn test_reused_connection_does_not_advance_rotation() {
    let server = MockServer::new();
    server.set_table("t", Vec::new());
    let db = ClusterDatabase::new(
        cluster_config(),
        Arc::new(MockConnectionFactory::new(Arc::clone(&server))),
    )
    .unwrap();

    let first = db.query("SELECT * FROM t ;").await.unwrap();
    let second = db.query("SELECT * FROM t ;").await.unwrap();

    assert_eq!(first.url, URL_B);
    assert_eq!(second.url, URL_B);
    assert_eq!(db.rotation().cursor(), 2);
    assert_eq!(server.connected_urls().len(), 1);
}

// ==================== ClusterDatabase Tests ====================

#[tokio::test]
async fn test_cluster_database_is_cluster_and_brackets_are_noops() {
    let server = MockServer::new();
    let db = ClusterDatabase::new(
        cluster_config(),
        Arc::new(MockConnectionFactory::new(Arc::clone(&server))),
    )
    .unwrap();

    assert!(db.is_cluster());
    assert_eq!(db.database_name(), "ClusterTestDB");
    db.connect("anything").await.unwrap();
    db.disconnect("anything").await.unwrap();
    assert!(server.connected_urls().is_empty());
}

#[tokio::test]
async fn test_cluster_prewarm_creates_three_per_host() {
    let server = MockServer::new();
    let config = cluster_config().with_prewarm_delay(Duration::from_millis(5));
    let db = ClusterDatabase::new(
        config,
        Arc::new(MockConnectionFactory::new(Arc::clone(&server))),
    )
    .unwrap();

    assert_eq!(db.wait_prewarm().await, Some(9));
    assert_eq!(db.pool().idle(), 9);
    assert_eq!(db.pool_stats().prewarmed, 9);

    let urls = server.connected_urls();
    assert_eq!(&urls[..3], &[URL_B, URL_C, URL_A]);

    db.shutdown().await.unwrap();
    assert_eq!(server.open_connections(), 0);
}

#[tokio::test]
async fn test_cluster_query_failure_propagates() {
    let server = MockServer::new();
    server.set_table("t", Vec::new());
    server.fail_table("t");
    let db = ClusterDatabase::new(
        cluster_config(),
        Arc::new(MockConnectionFactory::new(Arc::clone(&server))),
    )
    .unwrap();

    let err = db.query("SELECT * FROM t ;").await.err().unwrap();
    assert_eq!(err.category(), ErrorCategory::Query);
    assert_eq!(db.pool().idle(), 1);
}

#[test]
fn test_invalid_cluster_config_rejected() {
    let server = MockServer::new();
    let result = ClusterDatabase::new(
        ClusterConfig::new("db", Vec::new()),
        Arc::new(MockConnectionFactory::new(server)),
    );
    assert!(result.is_err());
}
