//! Byte-bounded result cache with least-recently-used eviction.
//!
//! Keys are opaque strings; [`fingerprint`] builds one from a connection id and
//! SQL text. Recency is a logical tick bumped on every insert and read, so
//! eviction order does not depend on clock resolution.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::db::{lock, ResultSet};

/// Default capacity: 100 MiB.
pub const DEFAULT_MAX_SIZE_BYTES: usize = 100 * 1024 * 1024;

/// Builds a cache key from a connection identity and SQL text.
///
/// Runs of whitespace in the SQL collapse to a single space, so reformatting a
/// query does not miss the cache. Case is preserved since literals are
/// case-sensitive.
pub fn fingerprint(connection_id: &str, sql: &str) -> String {
    let normalized = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    format!("{connection_id}\u{1f}{normalized}")
}

#[derive(Debug)]
struct CachedEntry {
    result: ResultSet,
    last_used: u64,
    size: usize,
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, CachedEntry>,
    current_size: usize,
    tick: u64,
}

impl CacheInner {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn remove(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.current_size -= entry.size;
                true
            }
            None => false,
        }
    }

    fn evict_oldest(&mut self) -> bool {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(key, _)| key.clone());

        match oldest {
            Some(key) => {
                debug!("Evicting cached result '{}'", key);
                self.remove(&key)
            }
            None => false,
        }
    }
}

/// Thread-safe result cache bounded by an estimated byte size.
#[derive(Debug)]
pub struct ResultCache {
    inner: Mutex<CacheInner>,
    max_size: usize,
}

impl ResultCache {
    /// Creates a cache with the default 100 MiB capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_SIZE_BYTES)
    }

    /// Creates a cache holding at most `max_size` estimated bytes.
    pub fn with_capacity(max_size: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            max_size,
        }
    }

    /// Stores `result` under `key`, evicting least recently used entries
    /// until it fits.
    ///
    /// An entry larger than the whole capacity is still stored (after
    /// everything else has been evicted); the overrun is logged.
    pub fn put(&self, key: impl Into<String>, result: ResultSet) {
        let key = key.into();
        let size = result.estimated_size();

        let mut inner = lock(&self.inner);
        inner.remove(&key);

        while inner.current_size + size > self.max_size && inner.evict_oldest() {}

        if size > self.max_size {
            warn!(
                "Cached result '{}' ({} bytes) exceeds cache capacity ({} bytes)",
                key, size, self.max_size
            );
        }

        let last_used = inner.next_tick();
        inner.current_size += size;
        inner.entries.insert(
            key,
            CachedEntry {
                result,
                last_used,
                size,
            },
        );
    }

    /// Returns a copy of the cached result and marks it most recently used.
    pub fn get(&self, key: &str) -> Option<ResultSet> {
        let mut inner = lock(&self.inner);
        let tick = inner.next_tick();
        let entry = inner.entries.get_mut(key)?;
        entry.last_used = tick;
        Some(entry.result.clone())
    }

    /// Drops the entry for `key`. Returns true if one existed.
    pub fn invalidate(&self, key: &str) -> bool {
        lock(&self.inner).remove(key)
    }

    /// Drops every entry.
    pub fn clear(&self) {
        let mut inner = lock(&self.inner);
        inner.entries.clear();
        inner.current_size = 0;
    }

    /// Sum of the estimated sizes of all entries.
    pub fn current_size(&self) -> usize {
        lock(&self.inner).current_size
    }

    /// Configured capacity in bytes.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.inner).entries.is_empty()
    }

    /// Returns true if `key` is cached. Does not affect recency.
    pub fn contains(&self, key: &str) -> bool {
        lock(&self.inner).entries.contains_key(key)
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new()
    }
}
