//! Transaction manager integration tests.

use querydesk::db::{MockDriver, QueryDriver};
use querydesk::error::QueryDeskError;
use querydesk::query::{AsyncQueryExecutor, QueryStatus};
use querydesk::transaction::{TransactionManager, TransactionState};
use std::sync::Arc;

use super::wait_terminal;

#[tokio::test]
async fn test_transaction_wraps_executor_driver() {
    let driver = Arc::new(MockDriver::connected());
    let shared: Arc<dyn QueryDriver> = driver.clone();
    let executor = AsyncQueryExecutor::new();
    let mut tx = TransactionManager::with_driver(Arc::clone(&shared));

    tx.begin().await.unwrap();
    let id = executor.submit(Arc::clone(&shared), "UPDATE accounts SET balance = 0");
    assert_eq!(wait_terminal(&executor, id).await.status, QueryStatus::Completed);
    tx.commit().await.unwrap();

    assert_eq!(tx.state(), TransactionState::Committed);
    assert_eq!(
        driver.executed_statements(),
        vec![
            "BEGIN TRANSACTION",
            "UPDATE accounts SET balance = 0",
            "COMMIT TRANSACTION"
        ]
    );
}

#[tokio::test]
async fn test_state_errors() {
    let mut tx = TransactionManager::with_driver(Arc::new(MockDriver::connected()));

    assert!(matches!(tx.commit().await, Err(QueryDeskError::State(_))));
    tx.begin().await.unwrap();
    assert!(matches!(tx.begin().await, Err(QueryDeskError::State(_))));
    tx.rollback().await.unwrap();
    assert!(matches!(tx.rollback().await, Err(QueryDeskError::State(_))));
}

#[tokio::test]
async fn test_drop_mid_transaction_with_failing_rollback() {
    let driver = Arc::new(MockDriver::connected().failing_on("ROLLBACK"));
    {
        let mut tx = TransactionManager::with_driver(driver.clone());
        tx.begin().await.unwrap();
        assert!(tx.is_active());
    }

    for _ in 0..200 {
        if driver.execute_count() >= 2 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert_eq!(driver.execute_count(), 2);
    assert!(driver.last_error().contains("ROLLBACK"));
}
