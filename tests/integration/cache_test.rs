//! Result cache integration tests.

use pretty_assertions::assert_eq;
use querydesk::cache::{fingerprint, ResultCache};
use querydesk::db::{ColumnInfo, MockDriver};
use querydesk::query::{AsyncQueryExecutor, QueryStatus};
use std::sync::Arc;

use super::wait_terminal;

#[tokio::test]
async fn test_cache_completed_results() {
    let executor = AsyncQueryExecutor::new();
    let cache = ResultCache::new();
    let sql = "SELECT name FROM users";
    let key = fingerprint("local", sql);

    assert!(cache.get(&key).is_none());

    let id = executor.submit(Arc::new(MockDriver::connected()), sql);
    let snapshot = wait_terminal(&executor, id).await;
    assert_eq!(snapshot.status, QueryStatus::Completed);

    let result = snapshot.result.unwrap();
    cache.put(key.clone(), result.clone());

    assert_eq!(cache.get(&fingerprint("local", "SELECT  name\nFROM users")), Some(result));
    assert!(cache.get(&fingerprint("remote", sql)).is_none());
}

#[test]
fn test_concurrent_puts_stay_within_capacity() {
    let row_result = |i: usize| {
        querydesk::db::ResultSet::with_data(
            vec![ColumnInfo::new("n", "int4")],
            vec![vec![format!("{i:04}")]],
        )
    };
    let entry_size = row_result(0).estimated_size();
    let cache = Arc::new(ResultCache::with_capacity(entry_size * 10));

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                for i in 0..50 {
                    cache.put(format!("{t}-{i}"), row_result(i));
                    let _ = cache.get(&format!("{t}-{}", i / 2));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert!(cache.current_size() <= cache.max_size());
    assert_eq!(cache.len(), 10);
    assert_eq!(cache.current_size(), entry_size * 10);
}
