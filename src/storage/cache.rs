//! Bounded TTL cache for query results.
//!
//! Keyed by an xxh3 hash of the full query shape (index, SQL, bound
//! parameters). Any successful write to an index drops all of that
//! index's entries; expiry is otherwise purely TTL-based. Disabled by
//! default via `cache.enabled`.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use xxhash_rust::xxh3::Xxh3;

use super::StoredRow;

struct CachedEntry {
    index: String,
    created: Instant,
    rows: Arc<Vec<StoredRow>>,
}

pub(crate) struct QueryResultCache {
    entries: LruCache<u64, CachedEntry>,
    ttl: Duration,
}

impl QueryResultCache {
    pub(crate) fn new(max_size: usize, ttl_secs: u64) -> Self {
        let cap = NonZeroUsize::new(max_size.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(cap),
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    /// Hash a query shape into a cache key.
    pub(crate) fn key(index: &str, sql: &str, params: &[rusqlite::types::Value]) -> u64 {
        use std::hash::Hasher;
        let mut hasher = Xxh3::new();
        hasher.write(index.as_bytes());
        hasher.write(&[0]);
        hasher.write(sql.as_bytes());
        for p in params {
            hasher.write(&[0]);
            match p {
                rusqlite::types::Value::Null => hasher.write(b"null"),
                rusqlite::types::Value::Integer(i) => hasher.write(&i.to_le_bytes()),
                rusqlite::types::Value::Real(f) => hasher.write(&f.to_le_bytes()),
                rusqlite::types::Value::Text(s) => hasher.write(s.as_bytes()),
                rusqlite::types::Value::Blob(b) => hasher.write(b),
            }
        }
        hasher.finish()
    }

    pub(crate) fn get(&mut self, key: u64) -> Option<Arc<Vec<StoredRow>>> {
        match self.entries.get(&key) {
            Some(entry) if entry.created.elapsed() <= self.ttl => Some(Arc::clone(&entry.rows)),
            Some(_) => {
                self.entries.pop(&key);
                None
            }
            None => None,
        }
    }

    pub(crate) fn put(&mut self, key: u64, index: &str, rows: Arc<Vec<StoredRow>>) {
        self.entries.put(
            key,
            CachedEntry {
                index: index.to_string(),
                created: Instant::now(),
                rows,
            },
        );
    }

    /// Drop every entry belonging to `index`.
    pub(crate) fn invalidate_index(&mut self, index: &str) {
        let stale: Vec<u64> = self
            .entries
            .iter()
            .filter(|(_, e)| e.index == index)
            .map(|(k, _)| *k)
            .collect();
        for key in stale {
            self.entries.pop(&key);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::check;

    fn rows() -> Arc<Vec<StoredRow>> {
        Arc::new(Vec::new())
    }

    #[test]
    fn test_hit_and_miss() {
        let mut cache = QueryResultCache::new(10, 60);
        let key = QueryResultCache::key("idx", "SELECT 1", &[]);
        check!(cache.get(key).is_none());
        cache.put(key, "idx", rows());
        check!(cache.get(key).is_some());
    }

    #[test]
    fn test_key_varies_with_params() {
        let a = QueryResultCache::key("idx", "SELECT ?", &[rusqlite::types::Value::Integer(1)]);
        let b = QueryResultCache::key("idx", "SELECT ?", &[rusqlite::types::Value::Integer(2)]);
        let c = QueryResultCache::key("other", "SELECT ?", &[rusqlite::types::Value::Integer(1)]);
        check!(a != b);
        check!(a != c);
    }

    #[test]
    fn test_ttl_expiry() {
        let mut cache = QueryResultCache::new(10, 0);
        let key = QueryResultCache::key("idx", "SELECT 1", &[]);
        cache.put(key, "idx", rows());
        std::thread::sleep(Duration::from_millis(5));
        check!(cache.get(key).is_none());
    }

    #[test]
    fn test_invalidate_only_touches_one_index() {
        let mut cache = QueryResultCache::new(10, 60);
        let a = QueryResultCache::key("a", "SELECT 1", &[]);
        let b = QueryResultCache::key("b", "SELECT 1", &[]);
        cache.put(a, "a", rows());
        cache.put(b, "b", rows());
        cache.invalidate_index("a");
        check!(cache.get(a).is_none());
        check!(cache.get(b).is_some());
        check!(cache.len() == 1);
    }

    #[test]
    fn test_capacity_bound() {
        let mut cache = QueryResultCache::new(2, 60);
        for i in 0..5u64 {
            cache.put(i, "idx", rows());
        }
        check!(cache.len() == 2);
    }
}
