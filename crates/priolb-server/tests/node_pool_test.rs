//! Node pool: admission, duplicates, removal and fleet shutdown.

mod support;

use std::sync::Arc;
use std::time::Duration;

use priolb_server::{Config, Job, NodePool, Priority};

fn pool(config: Config) -> NodePool {
    NodePool::new(None, Arc::new(config))
}

#[tokio::test]
async fn test_add_and_remove_node() {
    let mock1 = support::spawn_mock_node().await;
    let mock2 = support::spawn_mock_node().await;
    let pool = pool(Config::default());

    assert!(pool.add_node(&mock1.uri).await.unwrap());
    assert!(pool.add_node(&mock2.uri).await.unwrap());
    assert_eq!(pool.node_uris().await, vec![mock1.uri.clone(), mock2.uri.clone()]);

    // Duplicate admission is a no-op.
    assert!(!pool.add_node(&mock1.uri).await.unwrap());
    assert_eq!(pool.node_uris().await.len(), 2);

    assert!(pool.remove_node(&mock1.uri).await);
    assert_eq!(pool.node_uris().await, vec![mock2.uri.clone()]);

    assert!(!pool.remove_node(&mock1.uri).await);
}

#[tokio::test]
async fn test_add_node_failing_health_check() {
    let pool = pool(Config::default());
    let err = pool.add_node("http://127.0.0.1:4833").await.unwrap_err();
    assert!(err.to_string().contains("health check failed"));
    assert!(pool.is_empty().await);
}

#[tokio::test]
async fn test_pool_proxies_jobs() {
    let mock = support::spawn_mock_node().await;
    let pool = pool(Config {
        workers_per_node: 1,
        ..Config::default()
    });
    pool.add_node(&mock.uri).await.unwrap();

    let (job, mut result_rx) = Job::new("1", Priority::High, "foo", None);
    pool.job_sender().send(job).await.unwrap();

    let result = result_rx.recv().await.unwrap();
    assert!(result.error.is_none());
    assert_eq!(result.status_code, 0);
}

#[tokio::test]
async fn test_any_idle_worker_claims_jobs() {
    // Two nodes, one shared channel: all jobs complete no matter which
    // node's workers pick them up.
    let mock1 = support::spawn_mock_node().await;
    let mock2 = support::spawn_mock_node().await;
    let pool = pool(Config {
        workers_per_node: 2,
        ..Config::default()
    });
    pool.add_node(&mock1.uri).await.unwrap();
    pool.add_node(&mock2.uri).await.unwrap();

    let mut receivers = Vec::new();
    for i in 0..20 {
        let (job, result_rx) = Job::new(format!("{i}"), Priority::Low, "x", None);
        pool.job_sender().send(job).await.unwrap();
        receivers.push(result_rx);
    }
    for mut result_rx in receivers {
        let result = result_rx.recv().await.unwrap();
        assert!(result.error.is_none());
    }
    assert_eq!(mock1.requests() + mock2.requests(), 20);
}

#[tokio::test]
async fn test_shutdown_stops_all_workers() {
    let mock = support::spawn_mock_node().await;
    let pool = pool(Config {
        workers_per_node: 4,
        ..Config::default()
    });
    pool.add_node(&mock.uri).await.unwrap();

    // Workers register themselves shortly after spawn.
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while pool.num_workers_alive().await != 4 && std::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(pool.num_workers_alive().await, 4);

    pool.shutdown().await;
    assert_eq!(pool.num_workers_alive().await, 0);
}

#[tokio::test]
async fn test_removed_node_stops_picking_jobs() {
    let mock = support::spawn_mock_node().await;
    let pool = pool(Config {
        workers_per_node: 1,
        ..Config::default()
    });
    pool.add_node(&mock.uri).await.unwrap();
    assert!(pool.remove_node(&mock.uri).await);
    assert!(pool.is_empty().await);

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while pool.num_workers_alive().await != 0 && std::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(pool.num_workers_alive().await, 0);
}
