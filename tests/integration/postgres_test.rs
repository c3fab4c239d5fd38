//! PostgreSQL integration tests.
//!
//! These tests require a running PostgreSQL database.
//! Set DATABASE_URL environment variable to run them.

use querydesk::db::{PostgresDriver, QueryDriver};
use querydesk::query::{AsyncQueryExecutor, QueryStatus};
use querydesk::transaction::TransactionManager;
use std::sync::Arc;
use std::time::Duration;

use super::wait_terminal;

/// Helper to create a connected driver.
async fn get_test_driver() -> Option<Arc<PostgresDriver>> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let driver = PostgresDriver::new();
    driver.connect(&url).await.ok()?;
    Some(Arc::new(driver))
}

#[tokio::test]
async fn test_execute_through_executor() {
    let Some(driver) = get_test_driver().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let executor = AsyncQueryExecutor::new();
    let id = executor.submit(driver.clone(), "SELECT 1 AS num, NULL::text AS empty");
    let snapshot = wait_terminal(&executor, id).await;

    assert_eq!(snapshot.status, QueryStatus::Completed);
    let result = snapshot.result.unwrap();
    assert_eq!(result.columns[0].name, "num");
    assert_eq!(result.rows, vec![vec!["1".to_string(), String::new()]]);

    driver.disconnect().await;
}

#[tokio::test]
async fn test_multi_statement_script() {
    let Some(driver) = get_test_driver().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let executor = AsyncQueryExecutor::new();
    let id = executor.submit(
        driver.clone(),
        "CREATE TEMP TABLE qd_items (name text); INSERT INTO qd_items VALUES ('a;b'); SELECT name FROM qd_items",
    );
    let snapshot = wait_terminal(&executor, id).await;

    assert_eq!(snapshot.status, QueryStatus::Completed);
    assert_eq!(snapshot.results.len(), 3);
    assert_eq!(snapshot.results[1].result.affected_rows, 1);
    assert_eq!(snapshot.results[2].result.rows, vec![vec!["a;b".to_string()]]);

    driver.disconnect().await;
}

#[tokio::test]
async fn test_cancel_long_running_query() {
    let Some(driver) = get_test_driver().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let executor = AsyncQueryExecutor::new();
    let id = executor.submit(driver.clone(), "SELECT pg_sleep(30)");
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(executor.cancel(id));
    tokio::time::timeout(Duration::from_secs(10), executor.shutdown())
        .await
        .expect("server should abort the cancelled statement");
    assert_eq!(executor.poll(id).status, QueryStatus::Cancelled);

    driver.disconnect().await;
}

#[tokio::test]
async fn test_transaction_rollback() {
    let Some(driver) = get_test_driver().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    driver
        .execute("CREATE TEMP TABLE qd_tx (n int)")
        .await
        .unwrap();

    let mut tx = TransactionManager::with_driver(driver.clone());
    tx.begin().await.unwrap();
    driver.execute("INSERT INTO qd_tx VALUES (1)").await.unwrap();
    tx.rollback().await.unwrap();

    let result = driver.execute("SELECT count(*) FROM qd_tx").await.unwrap();
    assert_eq!(result.rows, vec![vec!["0".to_string()]]);

    driver.disconnect().await;
}
