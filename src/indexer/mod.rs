//! The indexing path: document processing, chunking, batching, and
//! transactional writes.
//!
//! An `Indexer` is bound to one index. Documents are validated and
//! processed into [`DocRecord`]s, queued, and flushed to storage in a
//! single transaction — either automatically (`auto_flush`, or when the
//! queue reaches `batch_size`) or explicitly via [`Indexer::flush`].

mod chunker;

use crate::analyzer::Analyzer;
use crate::config::IndexerConfig;
use crate::document::{
    Document, META_CHUNK_COUNT, META_CHUNK_INDEX, META_CHUNKED, META_IS_CHUNK, META_PARENT_ID,
    now_unix,
};
use crate::storage::{DocRecord, GeoRecord, Storage};
use crate::types::{CancelToken, FieldConfig, IndexName, IndexStats};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Result of a batch insert: how many rows went in, and which documents
/// were skipped with why. Failures do not abort the batch.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub indexed: usize,
    pub failures: Vec<(String, String)>,
}

/// Writer for one index.
pub struct Indexer {
    storage: Arc<Storage>,
    analyzer: Arc<Analyzer>,
    config: IndexerConfig,
    index: IndexName,
    fields: BTreeMap<String, FieldConfig>,
    queue: Vec<DocRecord>,
}

impl std::fmt::Debug for Indexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Indexer")
            .field("index", &self.index)
            .field("pending", &self.queue.len())
            .finish_non_exhaustive()
    }
}

impl Indexer {
    pub(crate) fn new(
        storage: Arc<Storage>,
        analyzer: Arc<Analyzer>,
        config: IndexerConfig,
        index: IndexName,
        fields: BTreeMap<String, FieldConfig>,
    ) -> Self {
        Self {
            storage,
            analyzer,
            config,
            index,
            fields,
            queue: Vec::new(),
        }
    }

    /// The field configuration this indexer writes with.
    pub fn fields(&self) -> &BTreeMap<String, FieldConfig> {
        &self.fields
    }

    /// Queued rows not yet flushed.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Insert (or fully replace) a single document. Errors surface.
    pub fn insert(&mut self, doc: Document) -> crate::Result<()> {
        let records = self.process_document(doc)?;
        self.enqueue(records)?;
        Ok(())
    }

    /// Insert a batch. Per-document processing errors are collected and
    /// the rest of the batch continues; a storage failure aborts all.
    pub fn insert_batch(&mut self, docs: Vec<Document>) -> crate::Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        for doc in docs {
            let id_hint = doc.id.clone().unwrap_or_else(|| "<generated>".to_string());
            match self.process_document(doc) {
                Ok(records) => {
                    outcome.indexed += 1;
                    self.queue.extend(records);
                    if self.queue.len() >= self.config.batch_size {
                        self.flush()?;
                    }
                }
                Err(e) => {
                    tracing::warn!(index = %self.index, id = %id_hint, error = %e, "Skipping document in batch");
                    outcome.failures.push((id_hint, e.to_string()));
                }
            }
        }
        if self.config.auto_flush {
            self.flush()?;
        }
        Ok(outcome)
    }

    /// Full replacement of an existing document. The id is mandatory.
    pub fn update(&mut self, doc: Document) -> crate::Result<()> {
        if doc.id.as_deref().is_none_or(str::is_empty) {
            return Err(crate::SearchError::MissingId);
        }
        self.insert(doc)
    }

    /// Delete a document, its chunks, and every derived row. Pending
    /// writes flush first so queued rows cannot resurrect the id.
    pub fn delete(&mut self, id: &str) -> crate::Result<u64> {
        self.flush()?;
        self.storage.delete_doc(self.index.as_str(), id)
    }

    /// Drop and recreate the index, preserving field configuration.
    pub fn clear(&mut self) -> crate::Result<()> {
        self.queue.clear();
        self.storage.clear_index(self.index.as_str())
    }

    /// Clear, re-insert, optimize — one logical operation.
    pub fn rebuild(&mut self, docs: Vec<Document>) -> crate::Result<BatchOutcome> {
        self.clear()?;
        let outcome = self.insert_batch(docs)?;
        self.flush()?;
        self.optimize()?;
        Ok(outcome)
    }

    /// Flush pending writes and merge the FTS segments.
    pub fn optimize(&mut self) -> crate::Result<()> {
        self.flush()?;
        self.storage.optimize_index(self.index.as_str())
    }

    /// Drain the queue in one storage transaction.
    pub fn flush(&mut self) -> crate::Result<()> {
        self.flush_with_cancel(None)
    }

    /// [`Indexer::flush`] with a cancellation signal; a cancelled flush
    /// rolls back and keeps the queue for retry.
    pub fn flush_with_cancel(&mut self, cancel: Option<&CancelToken>) -> crate::Result<()> {
        if self.queue.is_empty() {
            return Ok(());
        }
        self.storage
            .upsert_batch(self.index.as_str(), &self.fields, &self.queue, cancel)?;
        tracing::debug!(index = %self.index, rows = self.queue.len(), "Flushed");
        self.queue.clear();
        Ok(())
    }

    /// Current index statistics (flushes first so counts are accurate).
    pub fn stats(&mut self) -> crate::Result<IndexStats> {
        self.flush()?;
        self.storage.stats(self.index.as_str())
    }

    fn enqueue(&mut self, records: Vec<DocRecord>) -> crate::Result<()> {
        self.queue.extend(records);
        if self.config.auto_flush || self.queue.len() >= self.config.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Turn a client document into storable rows: the main row plus any
    /// chunk rows.
    fn process_document(&self, doc: Document) -> crate::Result<Vec<DocRecord>> {
        let ext_id = match doc.id.as_deref() {
            Some(id) if !id.is_empty() => {
                // The chunk suffix namespace belongs to the indexer.
                if id.contains("#chunk") {
                    return Err(crate::SearchError::invalid_argument(
                        "id",
                        id,
                        "'#chunk' is reserved for derived chunk rows",
                    ));
                }
                id.to_string()
            }
            _ => uuid::Uuid::new_v4().to_string(),
        };
        let language = doc.language.clone();
        let doc_type = doc
            .doc_type
            .clone()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "default".to_string());
        let timestamp = doc.timestamp.unwrap_or_else(now_unix);

        let geo_point = doc.geo_point;
        let geo = match (doc.geo_point, doc.geo_bounds) {
            (Some(p), _) => Some(GeoRecord::point(p)),
            (None, Some(b)) => Some(GeoRecord {
                min_lat: b.south,
                max_lat: b.north,
                min_lng: b.west.min(b.east),
                max_lng: b.east.max(b.west),
            }),
            (None, None) => None,
        };

        // Stored content and per-field indexed text.
        let mut content = Map::new();
        let mut index_text = BTreeMap::new();
        for (field, value) in &doc.content {
            let cfg = self.fields.get(field);
            let stored = cfg.is_none_or(|c| c.store);
            let indexed = cfg.is_some_and(|c| c.index);
            if indexed {
                if let Some(text) = indexable_text(value) {
                    let analyzed = self.analyzer.analyze(&text, language.as_deref());
                    index_text.insert(field.clone(), analyzed.tokens.join(" "));
                }
            }
            if stored {
                content.insert(field.clone(), value.clone());
            }
        }

        // Chunking decision on the primary text field.
        let primary = &self.config.primary_text_field;
        let chunk_source = doc
            .content
            .get(primary)
            .and_then(Value::as_str)
            .filter(|s| s.len() > self.config.chunk_size);

        let mut metadata = doc.metadata.clone();
        let mut records = Vec::new();

        if let Some(source) = chunk_source {
            let chunks = chunker::chunk_text(
                source,
                self.config.chunk_size,
                self.config.chunk_overlap,
            );
            metadata.insert(META_CHUNKED.to_string(), Value::Bool(true));
            metadata.insert(META_CHUNK_COUNT.to_string(), Value::from(chunks.len()));

            for (i, chunk) in chunks.into_iter().enumerate() {
                let analyzed = self.analyzer.analyze(&chunk, language.as_deref());
                let mut chunk_meta = doc.metadata.clone();
                chunk_meta.insert(META_IS_CHUNK.to_string(), Value::Bool(true));
                chunk_meta.insert(META_PARENT_ID.to_string(), Value::from(ext_id.clone()));
                chunk_meta.insert(META_CHUNK_INDEX.to_string(), Value::from(i));

                let mut chunk_content = Map::new();
                chunk_content.insert(primary.clone(), Value::from(chunk));
                let mut chunk_index_text = BTreeMap::new();
                chunk_index_text.insert(primary.clone(), analyzed.tokens.join(" "));

                records.push(DocRecord {
                    ext_id: format!("{ext_id}#chunk{i}"),
                    language: language.clone(),
                    doc_type: doc_type.clone(),
                    timestamp,
                    content_json: serde_json::to_string(&chunk_content)?,
                    metadata_json: serde_json::to_string(&chunk_meta)?,
                    index_text: chunk_index_text,
                    geo_point,
                    geo,
                    is_chunk: true,
                });
            }
        }

        // Parent row goes first so chunk purging on replace sees it.
        records.insert(
            0,
            DocRecord {
                ext_id,
                language,
                doc_type,
                timestamp,
                content_json: serde_json::to_string(&content)?,
                metadata_json: serde_json::to_string(&metadata)?,
                index_text,
                geo_point,
                geo,
                is_chunk: false,
            },
        );
        Ok(records)
    }
}

/// Extract analyzable text from a content value: strings directly,
/// lists of strings joined. Other shapes are stored but not indexed.
fn indexable_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => {
            let parts: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
            (!parts.is_empty()).then(|| parts.join(" "))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, StorageConfig};
    use assert2::check;
    use serde_json::json;

    fn fields() -> BTreeMap<String, FieldConfig> {
        let mut f = BTreeMap::new();
        f.insert("title".to_string(), FieldConfig::boosted(3.0));
        f.insert("content".to_string(), FieldConfig::default());
        f
    }

    fn indexer_with(config: IndexerConfig) -> Indexer {
        let storage = Storage::open(&StorageConfig::default(), &CacheConfig::default()).unwrap();
        let analyzer = Arc::new(Analyzer::new(crate::config::AnalyzerConfig::default()));
        let name = IndexName::new("test_idx").unwrap();
        storage.create_index(&name, &fields()).unwrap();
        Indexer::new(storage, analyzer, config, name, fields())
    }

    fn indexer() -> Indexer {
        indexer_with(IndexerConfig::default())
    }

    #[test]
    fn test_insert_assigns_id_when_absent() {
        let mut idx = indexer();
        let doc = Document::default().field("title", "Nameless");
        idx.insert(doc).unwrap();
        check!(idx.stats().unwrap().document_count == 1);
    }

    #[test]
    fn test_update_without_id_fails() {
        let mut idx = indexer();
        let doc = Document::default().field("title", "No id");
        let err = idx.update(doc).unwrap_err();
        check!(matches!(err, crate::SearchError::MissingId));
    }

    #[test]
    fn test_reserved_chunk_suffix_rejected() {
        let mut idx = indexer();
        let doc = Document::with_id("evil#chunk0").field("title", "Nope");
        check!(idx.insert(doc).is_err());
    }

    #[test]
    fn test_batch_collects_per_document_failures() {
        let mut idx = indexer();
        let good = Document::with_id("ok").field("title", "Fine");
        let bad = Document::with_id("bad#chunk1").field("title", "Reserved id");
        let outcome = idx.insert_batch(vec![good, bad]).unwrap();
        check!(outcome.indexed == 1);
        check!(outcome.failures.len() == 1);
        check!(outcome.failures[0].0 == "bad#chunk1");
        check!(idx.stats().unwrap().document_count == 1);
    }

    #[test]
    fn test_long_content_produces_chunks() {
        let mut config = IndexerConfig::default();
        config.chunk_size = 1000;
        config.chunk_overlap = 100;
        let mut idx = indexer_with(config);

        let body = (0..120)
            .map(|i| format!("Sentence number {i} talks about galaxies."))
            .collect::<Vec<_>>()
            .join(" ");
        check!(body.len() > 3000);
        let doc = Document::with_id("long").field("content", body);
        idx.insert(doc).unwrap();

        let stats = idx.stats().unwrap();
        check!(stats.chunk_count >= 3);
        check!(stats.document_count == stats.chunk_count + 1);
    }

    #[test]
    fn test_short_content_is_not_chunked() {
        let mut idx = indexer();
        let doc = Document::with_id("short").field("content", "Just a line.");
        idx.insert(doc).unwrap();
        let stats = idx.stats().unwrap();
        check!(stats.chunk_count == 0);
        check!(stats.document_count == 1);
    }

    #[test]
    fn test_manual_flush_mode_queues() {
        let mut config = IndexerConfig::default();
        config.auto_flush = false;
        config.batch_size = 100;
        let mut idx = indexer_with(config);
        idx.insert(Document::with_id("a").field("title", "One"))
            .unwrap();
        idx.insert(Document::with_id("b").field("title", "Two"))
            .unwrap();
        check!(idx.pending() == 2);
        idx.flush().unwrap();
        check!(idx.pending() == 0);
        check!(idx.stats().unwrap().document_count == 2);
    }

    #[test]
    fn test_batch_size_triggers_flush() {
        let mut config = IndexerConfig::default();
        config.auto_flush = false;
        config.batch_size = 2;
        let mut idx = indexer_with(config);
        idx.insert(Document::with_id("a").field("title", "One"))
            .unwrap();
        check!(idx.pending() == 1);
        idx.insert(Document::with_id("b").field("title", "Two"))
            .unwrap();
        // Hitting batch_size drained the queue.
        check!(idx.pending() == 0);
    }

    #[test]
    fn test_delete_flushes_queue_first() {
        let mut config = IndexerConfig::default();
        config.auto_flush = false;
        let mut idx = indexer_with(config);
        idx.insert(Document::with_id("a").field("title", "Queued"))
            .unwrap();
        let removed = idx.delete("a").unwrap();
        check!(removed == 1);
        check!(idx.stats().unwrap().document_count == 0);
    }

    #[test]
    fn test_rebuild_replaces_contents() {
        let mut idx = indexer();
        idx.insert(Document::with_id("old").field("title", "Old doc"))
            .unwrap();
        let outcome = idx
            .rebuild(vec![
                Document::with_id("new1").field("title", "First"),
                Document::with_id("new2").field("title", "Second"),
            ])
            .unwrap();
        check!(outcome.indexed == 2);
        let stats = idx.stats().unwrap();
        check!(stats.document_count == 2);
    }

    #[test]
    fn test_unconfigured_fields_stored_not_indexed() {
        let idx = indexer();
        let doc = Document::with_id("a")
            .field("title", "Known field")
            .field("extra", json!({"nested": true}));
        let records = idx.process_document(doc).unwrap();
        check!(records.len() == 1);
        check!(records[0].content_json.contains("extra"));
        check!(!records[0].index_text.contains_key("extra"));
    }

    #[test]
    fn test_list_values_are_indexed_joined() {
        let idx = indexer();
        let doc = Document::with_id("a").field("title", json!(["Star", "Wars"]));
        let records = idx.process_document(doc).unwrap();
        let title_terms = &records[0].index_text["title"];
        check!(title_terms.contains("star"));
        check!(title_terms.contains("war"));
    }

    #[test]
    fn test_chunk_rows_inherit_metadata_and_geo() {
        let mut config = IndexerConfig::default();
        config.chunk_size = 200;
        config.chunk_overlap = 40;
        let idx = indexer_with(config);
        let body = (0..30)
            .map(|i| format!("Sentence {i} fills the budget with words."))
            .collect::<Vec<_>>()
            .join(" ");
        let point = crate::geo::GeoPoint::new(45.0, -122.0).unwrap();
        let doc = Document::with_id("geo")
            .field("content", body)
            .meta("brand", "acme")
            .at(point);
        let records = idx.process_document(doc).unwrap();
        check!(records.len() > 2);

        let parent = &records[0];
        let parent_meta: Map<String, Value> =
            serde_json::from_str(&parent.metadata_json).unwrap();
        check!(parent_meta["chunked"] == json!(true));
        check!(parent_meta["chunks"] == json!(records.len() - 1));

        for chunk in &records[1..] {
            check!(chunk.is_chunk);
            check!(chunk.ext_id.starts_with("geo#chunk"));
            let meta: Map<String, Value> = serde_json::from_str(&chunk.metadata_json).unwrap();
            check!(meta["is_chunk"] == json!(true));
            check!(meta["parent_id"] == json!("geo"));
            check!(meta["brand"] == json!("acme"));
            check!(chunk.geo_point == Some(point));
        }
    }
}
