//! The facade: one object owning storage, the analyzer, and per-index
//! writers/readers.
//!
//! `Quarry` exclusively owns a single [`Storage`] handle and a shared
//! [`Analyzer`]; indexers and search engines borrow both through `Arc`
//! and are created lazily per index. Dropping the facade flushes every
//! pending write queue before the storage handle goes away.

use crate::analyzer::Analyzer;
use crate::config::SearchConfig;
use crate::document::Document;
use crate::fuzzy::FuzzyTermCache;
use crate::indexer::{BatchOutcome, Indexer};
use crate::query::SearchQuery;
use crate::results::{SearchHit, SearchResults, Suggestion};
use crate::search::SearchEngine;
use crate::storage::Storage;
use crate::types::{FieldConfig, IndexName, IndexStats, IndexSummary};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

/// Embeddable full-text search over one SQLite database.
///
/// # Examples
///
/// ```no_run
/// use quarry::{Quarry, SearchConfig, Document, SearchQuery};
///
/// let mut quarry = Quarry::new(SearchConfig::default())?;
/// quarry.index("articles", Document::with_id("a1").field("title", "Hello world"))?;
/// let results = quarry.search("articles", &SearchQuery::new("hello"))?;
/// assert_eq!(results.results[0].id, "a1");
/// # Ok::<(), quarry::SearchError>(())
/// ```
pub struct Quarry {
    config: SearchConfig,
    storage: Arc<Storage>,
    analyzer: Arc<Analyzer>,
    indexers: HashMap<String, Indexer>,
    engines: HashMap<String, SearchEngine>,
}

impl std::fmt::Debug for Quarry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Quarry")
            .field("storage", &self.storage)
            .field("open_indexers", &self.indexers.len())
            .field("open_engines", &self.engines.len())
            .finish()
    }
}

impl Quarry {
    /// Open the database named in the configuration and build the
    /// shared components.
    pub fn new(config: SearchConfig) -> crate::Result<Self> {
        let config = config.validated();
        let storage = Storage::open(&config.storage, &config.cache)?;
        let analyzer = Arc::new(Analyzer::new(config.analyzer.clone()));
        Ok(Self {
            config,
            storage,
            analyzer,
            indexers: HashMap::new(),
            engines: HashMap::new(),
        })
    }

    /// The validated configuration in effect.
    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// The shared analyzer (stop-word lists, pipeline configuration).
    pub fn analyzer(&self) -> &Analyzer {
        &self.analyzer
    }

    // ---- index lifecycle ------------------------------------------------

    /// Create an index with the configured default fields.
    pub fn create_index(&mut self, name: &str) -> crate::Result<()> {
        self.create_index_with_fields(name, self.config.indexer.fields.clone())
    }

    /// Create an index with an explicit field set. Creating an existing
    /// index with the same fields is a no-op; a different field set is
    /// a conflict.
    pub fn create_index_with_fields(
        &mut self,
        name: &str,
        fields: BTreeMap<String, FieldConfig>,
    ) -> crate::Result<()> {
        let index = IndexName::new(name)?;
        self.storage.create_index(&index, &fields)
    }

    /// Drop an index, its tables, and its fuzzy cache sidecar.
    pub fn drop_index(&mut self, name: &str) -> crate::Result<()> {
        let index = IndexName::new(name)?;
        self.indexers.remove(name);
        self.engines.remove(name);
        self.storage.drop_index(index.as_str())?;
        let sidecar = FuzzyTermCache::sidecar_path(self.storage.db_path(), name);
        if let Err(e) = std::fs::remove_file(&sidecar) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %sidecar.display(), error = %e, "Could not remove fuzzy cache sidecar");
            }
        }
        Ok(())
    }

    /// Enumerate known indices with document counts.
    pub fn list_indices(&self) -> crate::Result<Vec<IndexSummary>> {
        self.storage.list_indices()
    }

    /// Statistics for one index (flushes pending writes first).
    pub fn stats(&mut self, name: &str) -> crate::Result<IndexStats> {
        if let Some(indexer) = self.indexers.get_mut(name) {
            return indexer.stats();
        }
        self.storage.stats(name)
    }

    /// Flush and merge the index's FTS segments.
    pub fn optimize(&mut self, name: &str) -> crate::Result<()> {
        self.indexer_for(name, false)?.optimize()
    }

    /// Remove every document, preserving the field configuration.
    pub fn clear(&mut self, name: &str) -> crate::Result<()> {
        self.indexer_for(name, false)?.clear()
    }

    // ---- writes ---------------------------------------------------------

    /// Index a document, creating the index with default fields on
    /// first use. An existing id is fully replaced.
    pub fn index(&mut self, name: &str, doc: Document) -> crate::Result<()> {
        self.indexer_for(name, true)?.insert(doc)
    }

    /// Index a batch of documents. Per-document failures are collected
    /// in the outcome; a storage failure aborts the whole batch.
    pub fn index_batch(&mut self, name: &str, docs: Vec<Document>) -> crate::Result<BatchOutcome> {
        self.indexer_for(name, true)?.insert_batch(docs)
    }

    /// Replace an existing document. The id is mandatory and the index
    /// must exist.
    pub fn update(&mut self, name: &str, doc: Document) -> crate::Result<()> {
        self.indexer_for(name, false)?.update(doc)
    }

    /// Delete a document and its chunks. Returns rows removed.
    pub fn delete(&mut self, name: &str, id: &str) -> crate::Result<u64> {
        self.indexer_for(name, false)?.delete(id)
    }

    /// Rebuild an index from scratch: clear, insert, optimize.
    pub fn rebuild(&mut self, name: &str, docs: Vec<Document>) -> crate::Result<BatchOutcome> {
        self.indexer_for(name, false)?.rebuild(docs)
    }

    /// Flush a specific index's pending writes.
    pub fn flush(&mut self, name: &str) -> crate::Result<()> {
        if let Some(indexer) = self.indexers.get_mut(name) {
            indexer.flush()?;
        }
        Ok(())
    }

    /// Flush every index's pending writes.
    pub fn flush_all(&mut self) -> crate::Result<()> {
        for indexer in self.indexers.values_mut() {
            indexer.flush()?;
        }
        Ok(())
    }

    /// Flush everything and release the facade.
    pub fn close(mut self) -> crate::Result<()> {
        self.flush_all()
    }

    // ---- reads ----------------------------------------------------------

    /// Search one index. A missing index yields empty results.
    pub fn search(&mut self, name: &str, query: &SearchQuery) -> crate::Result<SearchResults> {
        self.flush(name)?;
        self.engine_for(name)?.search(query)
    }

    /// [`Quarry::search`] with a cancellation signal; storage honours it
    /// between statement steps and discards partial results.
    pub fn search_with_cancel(
        &mut self,
        name: &str,
        query: &SearchQuery,
        cancel: &crate::types::CancelToken,
    ) -> crate::Result<SearchResults> {
        self.flush(name)?;
        self.engine_for(name)?.search_with_cancel(query, Some(cancel))
    }

    /// Flush one index under a cancellation signal; a cancelled flush
    /// rolls back and keeps the queue for retry.
    pub fn flush_with_cancel(
        &mut self,
        name: &str,
        cancel: &crate::types::CancelToken,
    ) -> crate::Result<()> {
        if let Some(indexer) = self.indexers.get_mut(name) {
            indexer.flush_with_cancel(Some(cancel))?;
        }
        Ok(())
    }

    /// Matching document count (chunk-merged), ignoring pagination.
    pub fn count(&mut self, name: &str, query: &SearchQuery) -> crate::Result<u64> {
        self.flush(name)?;
        self.engine_for(name)?.count(query)
    }

    /// Ranked typo corrections for a term from the index vocabulary.
    pub fn suggest(
        &mut self,
        name: &str,
        term: &str,
        limit: usize,
    ) -> crate::Result<Vec<Suggestion>> {
        self.flush(name)?;
        self.engine_for(name)?.suggest(term, limit)
    }

    /// Search several indices (by name, or `*` glob patterns expanded
    /// against the catalog) and merge the results by score with a
    /// stable `(score desc, _index asc, id asc)` tie-break.
    pub fn search_multiple(
        &mut self,
        names_or_patterns: &[&str],
        query: &SearchQuery,
    ) -> crate::Result<SearchResults> {
        let started = Instant::now();
        let names = self.expand_index_patterns(names_or_patterns)?;

        // Each index contributes its own unpaginated top window; the
        // page is cut after the global merge.
        let mut per_index = query.clone();
        per_index.offset = 0;
        per_index.limit = (query.offset + query.limit).min(self.config.search.max_results);

        let mut all_hits: Vec<SearchHit> = Vec::new();
        let mut total = 0;
        let mut facets: BTreeMap<String, Vec<crate::results::FacetValue>> = BTreeMap::new();
        for name in &names {
            let mut results = self.search(name, &per_index)?;
            total += results.total;
            for hit in &mut results.results {
                hit.index = Some(name.clone());
            }
            all_hits.append(&mut results.results);
            for (field, values) in results.facets {
                let merged = facets.entry(field).or_default();
                for value in values {
                    match merged.iter_mut().find(|v| v.value == value.value) {
                        Some(existing) => existing.count += value.count,
                        None => merged.push(value),
                    }
                }
            }
        }
        for values in facets.values_mut() {
            values.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));
        }

        all_hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.index.cmp(&b.index))
                .then_with(|| a.id.cmp(&b.id))
        });
        let hits: Vec<SearchHit> = all_hits
            .into_iter()
            .skip(query.offset)
            .take(query.limit.min(self.config.search.max_results))
            .collect();

        Ok(SearchResults {
            count: hits.len(),
            results: hits,
            total,
            search_time_ms: started.elapsed().as_secs_f64() * 1000.0,
            facets,
            aggregations: BTreeMap::new(),
            suggestions: Vec::new(),
        })
    }

    // ---- internals ------------------------------------------------------

    fn expand_index_patterns(&self, patterns: &[&str]) -> crate::Result<Vec<String>> {
        let mut names: Vec<String> = Vec::new();
        let known: Vec<String> = if patterns.iter().any(|p| p.contains('*')) {
            self.list_indices()?.into_iter().map(|s| s.name).collect()
        } else {
            Vec::new()
        };
        for pattern in patterns {
            if pattern.contains('*') {
                for name in known.iter().filter(|n| glob_match(pattern, n)) {
                    if !names.contains(name) {
                        names.push(name.clone());
                    }
                }
            } else if !names.iter().any(|n| n == pattern) {
                names.push((*pattern).to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn indexer_for(&mut self, name: &str, auto_create: bool) -> crate::Result<&mut Indexer> {
        if !self.indexers.contains_key(name) {
            let index = IndexName::new(name)?;
            let fields = match self.storage.index_fields(name)? {
                Some(fields) => fields,
                None if auto_create => {
                    let fields = self.config.indexer.fields.clone();
                    self.storage.create_index(&index, &fields)?;
                    fields
                }
                None => {
                    return Err(crate::SearchError::IndexNotFound {
                        name: name.to_string(),
                    });
                }
            };
            let indexer = Indexer::new(
                Arc::clone(&self.storage),
                Arc::clone(&self.analyzer),
                self.config.indexer.clone(),
                index,
                fields,
            );
            self.indexers.insert(name.to_string(), indexer);
        }
        Ok(self
            .indexers
            .get_mut(name)
            .unwrap_or_else(|| unreachable!("indexer inserted above")))
    }

    fn engine_for(&mut self, name: &str) -> crate::Result<&mut SearchEngine> {
        if !self.engines.contains_key(name) {
            let index = IndexName::new(name)?;
            let engine = SearchEngine::new(
                Arc::clone(&self.storage),
                Arc::clone(&self.analyzer),
                self.config.search.clone(),
                index,
            );
            self.engines.insert(name.to_string(), engine);
        }
        Ok(self
            .engines
            .get_mut(name)
            .unwrap_or_else(|| unreachable!("engine inserted above")))
    }
}

impl Drop for Quarry {
    fn drop(&mut self) {
        for (name, indexer) in &mut self.indexers {
            if indexer.pending() > 0 {
                if let Err(e) = indexer.flush() {
                    tracing::warn!(index = %name, error = %e, "Flush on drop failed");
                }
            }
        }
    }
}

/// Minimal `*` glob matching (any number of stars).
fn glob_match(pattern: &str, name: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    let mut rest = name;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        match rest.find(part) {
            Some(pos) => {
                // Without a leading star the first part must anchor at 0.
                if i == 0 && pos != 0 {
                    return false;
                }
                rest = &rest[pos + part.len()..];
            }
            None => return false,
        }
    }
    // Without a trailing star the last part must anchor at the end.
    pattern.ends_with('*') || parts.last().is_some_and(|p| name.ends_with(p))
}
