//! Integration tests for querydesk.

pub mod cache_test;
pub mod executor_test;
pub mod postgres_test;
pub mod registry_test;
pub mod transaction_test;

use querydesk::query::{AsyncQueryExecutor, QueryId, QuerySnapshot};
use std::time::Duration;

/// Polls until the query reaches a terminal status.
pub async fn wait_terminal(executor: &AsyncQueryExecutor, id: QueryId) -> QuerySnapshot {
    for _ in 0..1000 {
        let snapshot = executor.poll(id);
        if snapshot.status.is_terminal() {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("{id} did not reach a terminal status");
}
