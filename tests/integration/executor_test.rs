//! Executor scenarios driven through the public API.

use super::wait_terminal;
use pretty_assertions::assert_eq;
use querydesk::config::ExecutorConfig;
use querydesk::db::{MockDriver, QueryDriver};
use querydesk::query::{AsyncQueryExecutor, QueryStatus};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_five_delayed_queries_cancel_two() {
    let executor = AsyncQueryExecutor::new();
    let drivers: Vec<Arc<MockDriver>> = (0..5)
        .map(|_| Arc::new(MockDriver::connected().with_delay(Duration::from_millis(300))))
        .collect();

    let ids: Vec<_> = drivers
        .iter()
        .enumerate()
        .map(|(i, d)| executor.submit(Arc::clone(d) as Arc<dyn QueryDriver>, format!("SELECT {i}")))
        .collect();

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(executor.list_active(), ids);

    assert!(executor.cancel(ids[1]));
    assert!(executor.cancel(ids[3]));

    let active = executor.list_active();
    assert_eq!(active, vec![ids[0], ids[2], ids[4]]);

    let mut cancelled = 0;
    let mut finished = 0;
    for id in &ids {
        match wait_terminal(&executor, *id).await.status {
            QueryStatus::Cancelled => cancelled += 1,
            QueryStatus::Completed | QueryStatus::Failed => finished += 1,
            other => panic!("unexpected status {other}"),
        }
    }
    assert_eq!(cancelled, 2);
    assert_eq!(finished, 3);
    assert!(executor.list_active().is_empty());

    executor.shutdown().await;
    assert_eq!(drivers[1].interrupted_count(), 1);
    assert_eq!(drivers[3].interrupted_count(), 1);
    assert_eq!(drivers[0].interrupted_count(), 0);
}

#[tokio::test]
async fn test_cancel_one_of_two_queries_on_a_shared_driver() {
    let executor = AsyncQueryExecutor::new();
    let driver = Arc::new(MockDriver::connected().with_delay(Duration::from_millis(200)));

    let a = executor.submit(Arc::clone(&driver) as Arc<dyn QueryDriver>, "SELECT 'a'");
    let b = executor.submit(Arc::clone(&driver) as Arc<dyn QueryDriver>, "SELECT 'b'");
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(executor.cancel(b));
    assert_eq!(executor.list_active(), vec![a]);

    let snapshot = wait_terminal(&executor, a).await;
    assert_eq!(snapshot.status, QueryStatus::Completed);
    assert_eq!(snapshot.error, None);
    assert_eq!(executor.poll(b).status, QueryStatus::Cancelled);
}

#[tokio::test]
async fn test_shared_driver_across_queries() {
    let executor = AsyncQueryExecutor::new();
    let driver: Arc<dyn QueryDriver> = Arc::new(MockDriver::connected());

    let first = executor.submit(Arc::clone(&driver), "SELECT 1");
    let second = executor.submit(Arc::clone(&driver), "INSERT INTO t VALUES (1)");
    drop(driver);

    assert_eq!(wait_terminal(&executor, first).await.status, QueryStatus::Completed);
    let snapshot = wait_terminal(&executor, second).await;
    assert_eq!(snapshot.status, QueryStatus::Completed);
    assert_eq!(snapshot.result.map(|r| r.affected_rows), Some(1));
}

#[tokio::test]
async fn test_poll_never_submitted_id() {
    let executor = AsyncQueryExecutor::new();
    let id = "query_77".parse().unwrap();

    let snapshot = executor.poll(id);
    assert_eq!(snapshot.status, QueryStatus::Failed);
    assert!(snapshot.error.unwrap().contains("not found"));
    assert!(!executor.is_running(id));
}

#[tokio::test]
async fn test_snapshot_serializes_to_json() {
    let executor = AsyncQueryExecutor::new();
    let id = executor.submit(Arc::new(MockDriver::connected()), "SELECT 1");
    let snapshot = wait_terminal(&executor, id).await;

    let json = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(json["id"], id.to_string());
    assert_eq!(json["status"], "completed");
    assert_eq!(json["result"]["rows"][0][0], "Mock result for: SELECT 1");
}

#[tokio::test]
async fn test_bounded_executor_drains_on_shutdown() {
    let executor = AsyncQueryExecutor::with_config(&ExecutorConfig {
        max_concurrent_queries: Some(2),
    });
    let slow = Arc::new(MockDriver::connected().with_delay(Duration::from_secs(30)));

    let ids: Vec<_> = (0..4)
        .map(|i| executor.submit(Arc::clone(&slow) as Arc<dyn QueryDriver>, format!("SELECT {i}")))
        .collect();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let running = ids.iter().filter(|id| executor.is_running(**id)).count();
    assert_eq!(running, 2);

    tokio::time::timeout(Duration::from_secs(5), executor.shutdown())
        .await
        .expect("shutdown should finish once queries are cancelled");

    for id in ids {
        assert_eq!(executor.poll(id).status, QueryStatus::Cancelled);
    }
}
