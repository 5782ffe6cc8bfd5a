//! Persistent per-index cache of fuzzy term expansions.
//!
//! The cache is advisory: a missing or corrupt file loads as an empty
//! cache and is rebuilt over time. Entries are keyed by lowercased
//! query token and bounded; overflow evicts the oldest third in
//! insertion order. Persistence is atomic (write to temp, rename).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

/// File format version. Bump on layout changes; older or unknown
/// versions are discarded on load.
const CACHE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    /// Insertion-ordered (term, variants) pairs.
    entries: Vec<(String, Vec<String>)>,
}

/// Bounded, persistent `term → variants` store.
#[derive(Debug)]
pub struct FuzzyTermCache {
    path: PathBuf,
    max_size: usize,
    entries: HashMap<String, Vec<String>>,
    /// Insertion order for eviction.
    order: VecDeque<String>,
    dirty: bool,
}

impl FuzzyTermCache {
    /// Load the cache for an index, or start empty if the file is
    /// missing or unreadable. Never fails.
    pub fn load(path: impl Into<PathBuf>, max_size: usize) -> Self {
        let path = path.into();
        let max_size = max_size.max(1);
        let mut cache = Self {
            path,
            max_size,
            entries: HashMap::new(),
            order: VecDeque::new(),
            dirty: false,
        };

        match std::fs::read(&cache.path) {
            Ok(bytes) => match serde_json::from_slice::<CacheFile>(&bytes) {
                Ok(file) if file.version == CACHE_VERSION => {
                    for (term, variants) in file.entries {
                        let key = term.to_lowercase();
                        if !cache.entries.contains_key(&key) {
                            cache.order.push_back(key.clone());
                            cache.entries.insert(key, variants);
                        }
                    }
                    cache.trim();
                }
                Ok(file) => {
                    tracing::warn!(
                        path = %cache.path.display(),
                        version = file.version,
                        "Discarding fuzzy term cache with unsupported version"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        path = %cache.path.display(),
                        error = %e,
                        "Discarding corrupt fuzzy term cache"
                    );
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %cache.path.display(), error = %e, "Could not read fuzzy term cache");
            }
        }
        cache
    }

    /// The sidecar path for an index next to its database file.
    pub fn sidecar_path(db_path: &Path, index: &str) -> PathBuf {
        let dir = db_path.parent().unwrap_or_else(|| Path::new("."));
        dir.join(format!("{index}_fuzzy_cache.json"))
    }

    /// Cached variants for a term, if present.
    pub fn get(&self, term: &str) -> Option<&[String]> {
        self.entries.get(&term.to_lowercase()).map(Vec::as_slice)
    }

    /// Record the variants computed for a term.
    pub fn insert(&mut self, term: &str, variants: Vec<String>) {
        let key = term.to_lowercase();
        if self.entries.insert(key.clone(), variants).is_none() {
            self.order.push_back(key);
        }
        self.dirty = true;
        self.trim();
    }

    /// Current entry count.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all entries (used when an index is cleared or rebuilt).
    pub fn clear(&mut self) {
        if !self.entries.is_empty() {
            self.entries.clear();
            self.order.clear();
            self.dirty = true;
        }
    }

    /// Evict the oldest third when over capacity.
    fn trim(&mut self) {
        if self.entries.len() <= self.max_size {
            return;
        }
        let evict = (self.max_size / 3).max(1);
        for _ in 0..evict {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        self.dirty = true;
    }

    /// Write the cache to disk if it changed. Errors are logged, never
    /// surfaced: cache persistence must not fail an operation.
    pub fn persist(&mut self) {
        if !self.dirty {
            return;
        }
        let file = CacheFile {
            version: CACHE_VERSION,
            entries: self
                .order
                .iter()
                .filter_map(|k| self.entries.get(k).map(|v| (k.clone(), v.clone())))
                .collect(),
        };
        match self.write_atomic(&file) {
            Ok(()) => self.dirty = false,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to persist fuzzy term cache");
            }
        }
    }

    fn write_atomic(&self, file: &CacheFile) -> std::io::Result<()> {
        let bytes = serde_json::to_vec(file)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::check;
    use tempfile::TempDir;

    fn cache_in(dir: &TempDir, max: usize) -> FuzzyTermCache {
        FuzzyTermCache::load(dir.path().join("idx_fuzzy_cache.json"), max)
    }

    #[test]
    fn test_roundtrip_persistence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("idx_fuzzy_cache.json");
        {
            let mut cache = FuzzyTermCache::load(&path, 100);
            cache.insert("Skywalker", vec!["skywalker".to_string(), "skywalkers".to_string()]);
            cache.persist();
        }
        let cache = FuzzyTermCache::load(&path, 100);
        // Keys normalize to lowercase.
        check!(cache.get("skywalker").is_some());
        check!(cache.get("SKYWALKER").unwrap().len() == 2);
    }

    #[test]
    fn test_corrupt_file_yields_empty_cache() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("idx_fuzzy_cache.json");
        std::fs::write(&path, b"{ not json ]").unwrap();
        let cache = FuzzyTermCache::load(&path, 100);
        check!(cache.is_empty());
    }

    #[test]
    fn test_wrong_version_is_discarded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("idx_fuzzy_cache.json");
        std::fs::write(&path, br#"{"version": 99, "entries": [["a", ["b"]]]}"#).unwrap();
        let cache = FuzzyTermCache::load(&path, 100);
        check!(cache.is_empty());
    }

    #[test]
    fn test_overflow_evicts_oldest_third() {
        let dir = TempDir::new().unwrap();
        let mut cache = cache_in(&dir, 9);
        for i in 0..10 {
            cache.insert(&format!("term{i}"), vec![]);
        }
        // Capacity 9, one over: a third (3) of the oldest entries go.
        check!(cache.len() == 7);
        check!(cache.get("term0").is_none());
        check!(cache.get("term2").is_none());
        check!(cache.get("term3").is_some());
        check!(cache.get("term9").is_some());
    }

    #[test]
    fn test_sidecar_path_layout() {
        let p = FuzzyTermCache::sidecar_path(Path::new("/data/search.db"), "articles");
        check!(p == PathBuf::from("/data/articles_fuzzy_cache.json"));
    }

    #[test]
    fn test_persist_skips_clean_cache() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("idx_fuzzy_cache.json");
        let mut cache = FuzzyTermCache::load(&path, 10);
        cache.persist();
        // Nothing was inserted, so no file should appear.
        check!(!path.exists());
    }
}
