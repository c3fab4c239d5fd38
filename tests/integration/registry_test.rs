//! Connection registry integration tests.

use querydesk::connection::{ConnectionDescriptor, ConnectionRegistry};
use querydesk::db::{DatabaseBackend, MockDriver, QueryDriver};
use querydesk::error::QueryDeskError;
use querydesk::query::{AsyncQueryExecutor, QueryStatus};
use std::sync::Arc;

use super::wait_terminal;

fn registry_requiring(user: &'static str, password: &'static str) -> ConnectionRegistry {
    ConnectionRegistry::with_factory(move |_: &ConnectionDescriptor| {
        Arc::new(MockDriver::new().with_credentials(user, password)) as Arc<dyn QueryDriver>
    })
}

fn descriptor(id: &str, password: &str) -> ConnectionDescriptor {
    ConnectionDescriptor::new(id, "db.internal", "sales")
        .with_backend(DatabaseBackend::Mock)
        .with_credentials("analyst", password)
}

#[tokio::test]
async fn test_add_with_invalid_credentials_leaves_list_unchanged() {
    let registry = registry_requiring("analyst", "s3cr;t@");
    assert!(registry.add(descriptor("good", "s3cr;t@")).await);

    let before = registry.list();
    assert!(!registry.add(descriptor("bad", "guess")).await);
    assert_eq!(registry.list(), before);
}

#[tokio::test]
async fn test_acquire_and_execute_through_executor() {
    let registry = registry_requiring("analyst", "pw");
    assert!(registry.add(descriptor("sales", "pw")).await);

    let driver = registry.acquire("sales").await.unwrap();
    let executor = AsyncQueryExecutor::new();
    let id = executor.submit(Arc::clone(&driver), "SELECT * FROM orders");

    let snapshot = wait_terminal(&executor, id).await;
    assert_eq!(snapshot.status, QueryStatus::Completed);

    registry.release(Arc::clone(&driver)).await;
    assert!(!driver.is_connected());
}

#[tokio::test]
async fn test_acquire_after_remove_is_not_found() {
    let registry = ConnectionRegistry::new();
    let mock = ConnectionDescriptor::new("scratch", "localhost", "scratch")
        .with_backend(DatabaseBackend::Mock);
    assert!(registry.add(mock).await);
    assert!(registry.remove("scratch"));

    let err = registry.acquire("scratch").await.err().unwrap();
    assert!(matches!(err, QueryDeskError::NotFound(_)));
}

#[tokio::test]
async fn test_unreachable_postgres_is_rejected() {
    let registry = ConnectionRegistry::new();
    let unreachable = ConnectionDescriptor::new("pg", "127.0.0.1", "app")
        .with_port(1)
        .with_credentials("nobody", "nothing");

    assert!(!registry.test(&unreachable).await);
    assert!(!registry.add(unreachable).await);
    assert!(registry.list().is_empty());
}
