//! Storage: schema management, transactional writes, and query
//! execution over SQLite with FTS5 and R-tree.
//!
//! One `Storage` owns one database file (or an in-memory database) and
//! is shared by every indexer and search engine of a facade. The
//! connection sits behind a mutex: single writer, readers serialized —
//! acceptable for an embedded, single-process library. Statement
//! preparation goes through rusqlite's per-connection LRU cache; an
//! optional result cache sits above it.
//!
//! The tri-table invariant (documents ↔ FTS ↔ R-tree keyed by the same
//! `doc_id`) is maintained exclusively here, with every multi-row write
//! wrapped in one transaction.

mod cache;
mod filters;
mod schema;

use crate::config::{CacheConfig, StorageConfig};
use crate::document::now_unix;
use crate::fuzzy::VocabTerm;
use crate::geo::GeoPoint;
use crate::query::GeoQuery;
use crate::results::FacetValue;
use crate::types::{CancelToken, FieldConfig, IndexName, IndexStats, IndexSummary};
use cache::QueryResultCache;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, Transaction, params, params_from_iter};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Attempts made when SQLite reports a busy/locked database.
const BUSY_RETRIES: u32 = 3;

/// Delay base between busy retries.
const BUSY_BACKOFF_MS: u64 = 50;

/// Cancellation is polled every this many fetched rows.
const CANCEL_POLL_ROWS: usize = 64;

/// Geo bounding box stored in the R-tree. Point rows set min == max.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct GeoRecord {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl GeoRecord {
    pub(crate) fn point(p: GeoPoint) -> Self {
        Self {
            min_lat: p.lat,
            max_lat: p.lat,
            min_lng: p.lng,
            max_lng: p.lng,
        }
    }
}

/// One fully-processed row ready for storage.
#[derive(Debug, Clone)]
pub(crate) struct DocRecord {
    pub ext_id: String,
    pub language: Option<String>,
    pub doc_type: String,
    pub timestamp: i64,
    /// Stored fields as a JSON object.
    pub content_json: String,
    /// Arbitrary metadata as a JSON object.
    pub metadata_json: String,
    /// Raw text of every indexed field, keyed by field name. Feeds the
    /// FTS columns and, on replacement, the external-content delete.
    pub index_text: BTreeMap<String, String>,
    /// Point coordinates when the document carries a geo point.
    pub geo_point: Option<GeoPoint>,
    /// R-tree row (from the point or explicit bounds).
    pub geo: Option<GeoRecord>,
    /// Chunk rows skip the stale-chunk purge of their parent.
    pub is_chunk: bool,
}

/// One row returned by a search, before scoring.
#[derive(Debug, Clone)]
pub(crate) struct StoredRow {
    pub doc_id: i64,
    pub ext_id: String,
    pub language: Option<String>,
    pub doc_type: String,
    pub timestamp: i64,
    pub content: Map<String, Value>,
    pub metadata: Map<String, Value>,
    pub index_text: BTreeMap<String, String>,
    pub geo_lat: Option<f64>,
    pub geo_lng: Option<f64>,
    /// Normalized BM25: higher is better; 1.0 for filter-only queries.
    pub bm25: f64,
}

impl StoredRow {
    /// The stored geo point, when both coordinates are present.
    pub(crate) fn geo_point(&self) -> Option<GeoPoint> {
        match (self.geo_lat, self.geo_lng) {
            (Some(lat), Some(lng)) => GeoPoint::new(lat, lng).ok(),
            _ => None,
        }
    }
}

/// Query shape handed from the search engine to storage.
#[derive(Debug)]
pub(crate) struct MatchSpec<'a> {
    /// FTS5 match expression; `None` selects on filters alone.
    pub match_expr: Option<String>,
    pub filters: &'a [crate::query::Filter],
    pub geo: Option<&'a GeoQuery>,
    /// Upper bound on fetched rows (the engine's working set, not the
    /// page size).
    pub fetch_limit: usize,
    pub cancel: Option<&'a CancelToken>,
}

/// Shared storage handle. See the module docs for the sharing model.
pub struct Storage {
    conn: Mutex<Connection>,
    path: PathBuf,
    external_content: bool,
    result_cache: Option<Mutex<QueryResultCache>>,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("path", &self.path)
            .field("external_content", &self.external_content)
            .field("result_cache", &self.result_cache.is_some())
            .finish()
    }
}

impl Storage {
    /// Open (or create) the database and its catalog table.
    pub fn open(storage: &StorageConfig, cache: &CacheConfig) -> crate::Result<Arc<Self>> {
        let conn = Connection::open(&storage.path).map_err(|e| {
            crate::SearchError::storage_with_source(
                format!("cannot open database at {}", storage.path.display()),
                e.into(),
            )
        })?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;
        conn.set_prepared_statement_cache_capacity(64);
        conn.execute_batch(&schema::catalog_ddl())?;

        let result_cache = cache
            .enabled
            .then(|| Mutex::new(QueryResultCache::new(cache.max_size, cache.ttl)));

        tracing::debug!(path = %storage.path.display(), external_content = storage.external_content, "Opened storage");
        Ok(Arc::new(Self {
            conn: Mutex::new(conn),
            path: storage.path.clone(),
            external_content: storage.external_content,
            result_cache,
        }))
    }

    /// The database file path (sidecar files live next to it).
    pub fn db_path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Retry a write closure on SQLITE_BUSY/LOCKED with bounded backoff.
    fn with_busy_retry<T>(
        &self,
        mut op: impl FnMut(&Self) -> crate::Result<T>,
    ) -> crate::Result<T> {
        let mut attempt = 0;
        loop {
            match op(self) {
                Err(e) if attempt < BUSY_RETRIES && is_busy(&e) => {
                    attempt += 1;
                    let delay = BUSY_BACKOFF_MS * u64::from(attempt);
                    tracing::warn!(attempt, delay_ms = delay, "Database busy, retrying");
                    std::thread::sleep(std::time::Duration::from_millis(delay));
                }
                other => return other,
            }
        }
    }

    // ---- index lifecycle ------------------------------------------------

    /// Create an index. Re-creating with the same field set is a no-op;
    /// a different field set is a conflict.
    pub(crate) fn create_index(
        &self,
        name: &IndexName,
        fields: &BTreeMap<String, FieldConfig>,
    ) -> crate::Result<()> {
        for field in fields.keys() {
            schema::validate_field_name(field)?;
        }
        if schema::indexed_fields(fields).is_empty() {
            return Err(crate::SearchError::invalid_argument(
                "fields",
                format!("{} fields, none indexed", fields.len()),
                "an index needs at least one field with index=true",
            ));
        }

        if let Some(existing) = self.index_fields(name.as_str())? {
            if existing == *fields {
                return Ok(());
            }
            return Err(crate::SearchError::IndexExistsConflict {
                name: name.to_string(),
            });
        }

        let fields_json = serde_json::to_string(fields)?;
        let ddl = schema::create_index_ddl(name.as_str(), fields, self.external_content);
        self.with_busy_retry(|this| {
            let mut guard = this.conn();
            let tx = guard.transaction()?;
            tx.execute_batch(&ddl)?;
            tx.execute(
                &format!(
                    "INSERT INTO {} (name, fields, external_content, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    schema::CATALOG_TABLE
                ),
                params![
                    name.as_str(),
                    fields_json,
                    i64::from(this.external_content),
                    now_unix()
                ],
            )?;
            tx.commit()?;
            Ok(())
        })?;
        tracing::info!(index = %name, fields = fields.len(), "Created index");
        Ok(())
    }

    /// Drop an index and all its tables. Unknown name is an error.
    pub(crate) fn drop_index(&self, name: &str) -> crate::Result<()> {
        if self.index_fields(name)?.is_none() {
            return Err(crate::SearchError::IndexNotFound {
                name: name.to_string(),
            });
        }
        self.with_busy_retry(|this| {
            let mut guard = this.conn();
            let tx = guard.transaction()?;
            tx.execute_batch(&schema::drop_index_ddl(name))?;
            tx.execute(
                &format!("DELETE FROM {} WHERE name = ?1", schema::CATALOG_TABLE),
                params![name],
            )?;
            tx.commit()?;
            Ok(())
        })?;
        self.invalidate_cache(name);
        tracing::info!(index = name, "Dropped index");
        Ok(())
    }

    /// Drop and recreate an index's tables, preserving its field
    /// configuration and catalog entry.
    pub(crate) fn clear_index(&self, name: &str) -> crate::Result<()> {
        let fields = self.require_fields(name)?;
        let ddl = format!(
            "{}\n{}",
            schema::drop_index_ddl(name),
            schema::create_index_ddl(name, &fields, self.external_content)
        );
        self.with_busy_retry(|this| {
            let mut guard = this.conn();
            let tx = guard.transaction()?;
            tx.execute_batch(&ddl)?;
            tx.commit()?;
            Ok(())
        })?;
        self.invalidate_cache(name);
        tracing::info!(index = name, "Cleared index");
        Ok(())
    }

    /// Ask FTS5 to merge its b-tree segments.
    pub(crate) fn optimize_index(&self, name: &str) -> crate::Result<()> {
        self.require_fields(name)?;
        let fts = schema::fts_table(name);
        self.with_busy_retry(|this| {
            this.conn().execute(
                &format!("INSERT INTO {fts}({fts}) VALUES('optimize')"),
                [],
            )?;
            Ok(())
        })
    }

    /// The stored field configuration, or `None` for an unknown index.
    pub(crate) fn index_fields(
        &self,
        name: &str,
    ) -> crate::Result<Option<BTreeMap<String, FieldConfig>>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT fields FROM {} WHERE name = ?1",
            schema::CATALOG_TABLE
        ))?;
        let json: Option<String> = stmt
            .query_row(params![name], |row| row.get(0))
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn require_fields(&self, name: &str) -> crate::Result<BTreeMap<String, FieldConfig>> {
        self.index_fields(name)?
            .ok_or_else(|| crate::SearchError::IndexNotFound {
                name: name.to_string(),
            })
    }

    /// Enumerate known indices with summary statistics.
    pub(crate) fn list_indices(&self) -> crate::Result<Vec<IndexSummary>> {
        let names: Vec<String> = {
            let conn = self.conn();
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT name FROM {} ORDER BY name",
                schema::CATALOG_TABLE
            ))?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        let mut out = Vec::with_capacity(names.len());
        for name in names {
            let docs = schema::docs_table(&name);
            let conn = self.conn();
            let document_count: u64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM {docs}"), [], |row| {
                    row.get(0)
                })?;
            let languages: Vec<String> = {
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT DISTINCT language FROM {docs}
                     WHERE language IS NOT NULL ORDER BY language"
                ))?;
                let rows = stmt.query_map([], |row| row.get(0))?;
                rows.collect::<rusqlite::Result<_>>()?
            };
            let types: Vec<String> = {
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT DISTINCT type FROM {docs} ORDER BY type"
                ))?;
                let rows = stmt.query_map([], |row| row.get(0))?;
                rows.collect::<rusqlite::Result<_>>()?
            };
            out.push(IndexSummary {
                name,
                document_count,
                languages,
                types,
            });
        }
        Ok(out)
    }

    /// Aggregate statistics for one index.
    pub(crate) fn stats(&self, name: &str) -> crate::Result<IndexStats> {
        self.require_fields(name)?;
        let docs = schema::docs_table(name);
        let conn = self.conn();
        conn.query_row(
            &format!(
                "SELECT COUNT(*),
                        COALESCE(SUM(COALESCE(json_extract(metadata, '$.is_chunk'), 0) = 1), 0),
                        COALESCE(SUM(length(content) + length(metadata) + length(index_text) + length(ext_id)), 0),
                        COALESCE(AVG(length(content)), 0.0)
                 FROM {docs}"
            ),
            [],
            |row| {
                Ok(IndexStats {
                    document_count: row.get(0)?,
                    chunk_count: row.get(1)?,
                    size_bytes: row.get(2)?,
                    avg_doc_length: row.get(3)?,
                })
            },
        )
        .map_err(Into::into)
    }

    // ---- write path -----------------------------------------------------

    /// Upsert a batch of processed rows in one transaction.
    ///
    /// Replacing a parent document first purges its stale chunk rows,
    /// so chunk counts can shrink across updates. On any error the
    /// whole batch rolls back.
    pub(crate) fn upsert_batch(
        &self,
        name: &str,
        fields: &BTreeMap<String, FieldConfig>,
        records: &[DocRecord],
        cancel: Option<&CancelToken>,
    ) -> crate::Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let indexed = schema::indexed_fields(fields);
        let result = self.with_busy_retry(|this| {
            let mut guard = this.conn();
            let tx = guard.transaction()?;
            for record in records {
                if let Some(token) = cancel {
                    token.check()?;
                }
                if !record.is_chunk {
                    this.purge_chunks_tx(&tx, name, &record.ext_id, &indexed)?;
                }
                this.upsert_one(&tx, name, &indexed, record)?;
            }
            tx.commit()?;
            Ok(())
        });

        match result {
            Ok(()) => {
                self.invalidate_cache(name);
                tracing::debug!(index = name, rows = records.len(), "Committed write batch");
                Ok(())
            }
            Err(e @ crate::SearchError::TransactionAborted { .. }) => Err(e),
            Err(e) => Err(crate::SearchError::TransactionAborted {
                reason: e.to_string(),
            }),
        }
    }

    fn upsert_one(
        &self,
        tx: &Transaction<'_>,
        name: &str,
        indexed: &[&str],
        record: &DocRecord,
    ) -> crate::Result<()> {
        let docs = schema::docs_table(name);
        let rtree = schema::rtree_table(name);

        let existing: Option<(i64, String)> = {
            let mut stmt = tx.prepare_cached(&format!(
                "SELECT doc_id, index_text FROM {docs} WHERE ext_id = ?1"
            ))?;
            stmt.query_row(params![record.ext_id], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?
        };

        let index_text_json = serde_json::to_string(&record.index_text)?;
        let doc_id = if let Some((doc_id, old_index_text)) = existing {
            self.fts_delete(tx, name, indexed, doc_id, &old_index_text)?;
            tx.execute(
                &format!("DELETE FROM {rtree} WHERE doc_id = ?1"),
                params![doc_id],
            )?;
            tx.execute(
                &format!(
                    "UPDATE {docs}
                     SET language = ?1, type = ?2, timestamp = ?3, content = ?4,
                         metadata = ?5, index_text = ?6, geo_lat = ?7, geo_lng = ?8,
                         indexed_at = ?9
                     WHERE doc_id = ?10"
                ),
                params![
                    record.language,
                    record.doc_type,
                    record.timestamp,
                    record.content_json,
                    record.metadata_json,
                    index_text_json,
                    record.geo_point.map(|p| p.lat),
                    record.geo_point.map(|p| p.lng),
                    now_unix(),
                    doc_id
                ],
            )?;
            doc_id
        } else {
            tx.execute(
                &format!(
                    "INSERT INTO {docs}
                     (ext_id, language, type, timestamp, content, metadata, index_text,
                      geo_lat, geo_lng, indexed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ),
                params![
                    record.ext_id,
                    record.language,
                    record.doc_type,
                    record.timestamp,
                    record.content_json,
                    record.metadata_json,
                    index_text_json,
                    record.geo_point.map(|p| p.lat),
                    record.geo_point.map(|p| p.lng),
                    now_unix()
                ],
            )?;
            tx.last_insert_rowid()
        };

        // FTS row, same rowid as the docs row.
        let columns = indexed.join(", ");
        let placeholders: String = (2..=indexed.len() + 1)
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let fts = schema::fts_table(name);
        let mut fts_params: Vec<SqlValue> = vec![SqlValue::Integer(doc_id)];
        for field in indexed {
            fts_params.push(SqlValue::Text(
                record.index_text.get(*field).cloned().unwrap_or_default(),
            ));
        }
        tx.execute(
            &format!("INSERT INTO {fts} (rowid, {columns}) VALUES (?1, {placeholders})"),
            params_from_iter(fts_params.iter()),
        )?;

        if let Some(geo) = record.geo {
            tx.execute(
                &format!(
                    "INSERT INTO {rtree} (doc_id, min_lat, max_lat, min_lng, max_lng)
                     VALUES (?1, ?2, ?3, ?4, ?5)"
                ),
                params![doc_id, geo.min_lat, geo.max_lat, geo.min_lng, geo.max_lng],
            )?;
        }
        Ok(())
    }

    /// Remove one row from the FTS index. External-content tables need
    /// the old column values; contentful tables delete by rowid.
    fn fts_delete(
        &self,
        tx: &Transaction<'_>,
        name: &str,
        indexed: &[&str],
        doc_id: i64,
        index_text_json: &str,
    ) -> crate::Result<()> {
        let fts = schema::fts_table(name);
        if self.external_content {
            let old: BTreeMap<String, String> =
                serde_json::from_str(index_text_json).unwrap_or_default();
            let columns = indexed.join(", ");
            let placeholders: String = (3..=indexed.len() + 2)
                .map(|i| format!("?{i}"))
                .collect::<Vec<_>>()
                .join(", ");
            let mut params_vec: Vec<SqlValue> = vec![
                SqlValue::Text("delete".to_string()),
                SqlValue::Integer(doc_id),
            ];
            for field in indexed {
                params_vec.push(SqlValue::Text(old.get(*field).cloned().unwrap_or_default()));
            }
            tx.execute(
                &format!("INSERT INTO {fts} ({fts}, rowid, {columns}) VALUES (?1, ?2, {placeholders})"),
                params_from_iter(params_vec.iter()),
            )?;
        } else {
            tx.execute(
                &format!("DELETE FROM {fts} WHERE rowid = ?1"),
                params![doc_id],
            )?;
        }
        Ok(())
    }

    /// Delete all chunk rows whose parent is `ext_id`, within `tx`.
    fn purge_chunks_tx(
        &self,
        tx: &Transaction<'_>,
        name: &str,
        ext_id: &str,
        indexed: &[&str],
    ) -> crate::Result<u64> {
        let docs = schema::docs_table(name);
        let rtree = schema::rtree_table(name);

        // Prefix match without LIKE so ids containing '%'/'_' are safe.
        let chunks: Vec<(i64, String)> = {
            let mut stmt = tx.prepare_cached(&format!(
                "SELECT doc_id, index_text FROM {docs}
                 WHERE substr(ext_id, 1, length(?1) + 6) = ?1 || '#chunk'"
            ))?;
            let rows = stmt.query_map(params![ext_id], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        for (doc_id, index_text) in &chunks {
            self.fts_delete(tx, name, indexed, *doc_id, index_text)?;
            tx.execute(
                &format!("DELETE FROM {rtree} WHERE doc_id = ?1"),
                params![doc_id],
            )?;
            tx.execute(
                &format!("DELETE FROM {docs} WHERE doc_id = ?1"),
                params![doc_id],
            )?;
        }
        Ok(chunks.len() as u64)
    }

    /// Delete a document and its chunks. Returns the number of rows
    /// removed (0 when the id was absent).
    pub(crate) fn delete_doc(&self, name: &str, ext_id: &str) -> crate::Result<u64> {
        let fields = self.require_fields(name)?;
        let indexed = schema::indexed_fields(&fields);
        let docs = schema::docs_table(name);
        let rtree = schema::rtree_table(name);

        let removed = self.with_busy_retry(|this| {
            let mut guard = this.conn();
            let tx = guard.transaction()?;
            let mut removed = this.purge_chunks_tx(&tx, name, ext_id, &indexed)?;

            let row: Option<(i64, String)> = {
                let mut stmt = tx.prepare_cached(&format!(
                    "SELECT doc_id, index_text FROM {docs} WHERE ext_id = ?1"
                ))?;
                stmt.query_row(params![ext_id], |row| Ok((row.get(0)?, row.get(1)?)))
                    .map(Some)
                    .or_else(|e| match e {
                        rusqlite::Error::QueryReturnedNoRows => Ok(None),
                        other => Err(other),
                    })?
            };
            if let Some((doc_id, index_text)) = row {
                this.fts_delete(&tx, name, &indexed, doc_id, &index_text)?;
                tx.execute(
                    &format!("DELETE FROM {rtree} WHERE doc_id = ?1"),
                    params![doc_id],
                )?;
                tx.execute(
                    &format!("DELETE FROM {docs} WHERE doc_id = ?1"),
                    params![doc_id],
                )?;
                removed += 1;
            }
            tx.commit()?;
            Ok(removed)
        })?;

        if removed > 0 {
            self.invalidate_cache(name);
        }
        tracing::debug!(index = name, ext_id, removed, "Deleted document");
        Ok(removed)
    }

    // ---- read path ------------------------------------------------------

    /// Execute a search and return candidate rows, BM25-annotated.
    ///
    /// Rows come back in storage order (best BM25 first for match
    /// queries); scoring, merging, and pagination happen in the engine.
    /// A `near` constraint is refined here with exact great-circle
    /// distance, so every returned row truly lies within the radius.
    pub(crate) fn search_rows(
        &self,
        name: &str,
        spec: &MatchSpec<'_>,
    ) -> crate::Result<Arc<Vec<StoredRow>>> {
        if self.index_fields(name)?.is_none() {
            return Ok(Arc::new(Vec::new()));
        }

        let (sql, params) = self.build_search_sql(name, spec)?;

        let cache_key = self
            .result_cache
            .as_ref()
            .map(|_| QueryResultCache::key(name, &sql, &params));
        if let (Some(cache), Some(key)) = (&self.result_cache, cache_key) {
            let mut cache = cache.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(rows) = cache.get(key) {
                tracing::trace!(index = name, "Query result cache hit");
                return Ok(rows);
            }
        }

        let has_match = spec.match_expr.is_some();
        let mut rows = Vec::new();
        {
            let conn = self.conn();
            let mut stmt = conn.prepare_cached(&sql)?;
            let mapped = stmt.query_map(params_from_iter(params.iter()), |row| {
                let rank: f64 = row.get(10)?;
                Ok(RawRow {
                    doc_id: row.get(0)?,
                    ext_id: row.get(1)?,
                    language: row.get(2)?,
                    doc_type: row.get(3)?,
                    timestamp: row.get(4)?,
                    content: row.get(5)?,
                    metadata: row.get(6)?,
                    index_text: row.get(7)?,
                    geo_lat: row.get(8)?,
                    geo_lng: row.get(9)?,
                    rank,
                })
            })?;
            for (i, raw) in mapped.enumerate() {
                if i % CANCEL_POLL_ROWS == 0 {
                    if let Some(token) = spec.cancel {
                        token.check()?;
                    }
                }
                rows.push(raw?.parse(has_match)?);
            }
        }

        // Exact-distance refinement for `near`: the R-tree prefilter is a
        // bounding box, whose corners exceed the radius.
        if let Some(near) = spec.geo.and_then(|g| g.near.as_ref()) {
            rows.retain(|row| {
                row.geo_point()
                    .is_some_and(|p| p.distance_to(&near.point) <= near.radius_m)
            });
        }
        rows.truncate(spec.fetch_limit);

        let rows = Arc::new(rows);
        if let (Some(cache), Some(key)) = (&self.result_cache, cache_key) {
            let mut cache = cache.lock().unwrap_or_else(PoisonError::into_inner);
            cache.put(key, name, Arc::clone(&rows));
        }
        Ok(rows)
    }

    /// Shared FROM/WHERE construction for search, facets, aggregations.
    fn build_query_core(
        &self,
        name: &str,
        spec: &MatchSpec<'_>,
    ) -> crate::Result<(String, String, Vec<SqlValue>)> {
        let docs = schema::docs_table(name);
        let fts = schema::fts_table(name);
        let mut params: Vec<SqlValue> = Vec::new();

        let from = if spec.match_expr.is_some() {
            format!("{fts} f JOIN {docs} d ON d.doc_id = f.rowid")
        } else {
            format!("{docs} d")
        };

        let mut where_clause = String::from("1=1");
        if let Some(expr) = &spec.match_expr {
            where_clause.push_str(&format!(" AND {fts} MATCH ?"));
            params.push(SqlValue::Text(expr.clone()));
        }

        let predicate = filters::compile_filters(spec.filters)?;
        if !predicate.clause.is_empty() {
            where_clause.push_str(" AND ");
            where_clause.push_str(&predicate.clause);
            params.extend(predicate.params);
        }

        if let Some(geo) = spec.geo {
            for clause in geo_prefilters(name, geo, &mut params) {
                where_clause.push_str(" AND ");
                where_clause.push_str(&clause);
            }
        }

        Ok((from, where_clause, params))
    }

    fn build_search_sql(
        &self,
        name: &str,
        spec: &MatchSpec<'_>,
    ) -> crate::Result<(String, Vec<SqlValue>)> {
        let fts = schema::fts_table(name);
        let (from, where_clause, mut params) = self.build_query_core(name, spec)?;

        let (rank_expr, order) = if spec.match_expr.is_some() {
            (format!("bm25({fts})"), "ORDER BY rank".to_string())
        } else {
            ("0.0".to_string(), "ORDER BY d.doc_id".to_string())
        };

        let mut sql = format!(
            "SELECT d.doc_id, d.ext_id, d.language, d.type, d.timestamp,
                    d.content, d.metadata, d.index_text, d.geo_lat, d.geo_lng,
                    {rank_expr} AS rank
             FROM {from} WHERE {where_clause} {order}"
        );

        // With a `near` constraint the limit applies after refinement.
        let needs_refine = spec.geo.is_some_and(|g| g.near.is_some());
        if !needs_refine {
            sql.push_str(" LIMIT ?");
            params.push(SqlValue::Integer(spec.fetch_limit as i64));
        }
        Ok((sql, params))
    }

    /// Term counts for one facet field over the (unpaginated) filtered
    /// set. Chunk rows are excluded so inherited metadata does not
    /// inflate counts.
    pub(crate) fn facet_counts(
        &self,
        name: &str,
        spec: &MatchSpec<'_>,
        field: &str,
        limit: usize,
        min_count: u64,
    ) -> crate::Result<Vec<FacetValue>> {
        if self.index_fields(name)?.is_none() {
            return Ok(Vec::new());
        }
        let (value_expr, value_params) = filters::field_value_expr(field)?;
        let (from, where_clause, core_params) = self.build_query_core(name, spec)?;

        let sql = format!(
            "SELECT CAST({value_expr} AS TEXT) AS facet_value, COUNT(*) AS n
             FROM {from}
             WHERE {where_clause}
               AND {value_expr} IS NOT NULL
               AND COALESCE(json_extract(d.metadata, '$.is_chunk'), 0) != 1
             GROUP BY facet_value
             HAVING n >= ?
             ORDER BY n DESC, facet_value ASC
             LIMIT ?"
        );

        // Positional binding: the value expression occurs in the SELECT
        // and again in the NOT NULL guard, so its path parameter (if
        // any) binds twice, around the WHERE-core parameters.
        let mut bind: Vec<SqlValue> = Vec::new();
        bind.extend(value_params.clone());
        bind.extend(core_params);
        bind.extend(value_params);
        bind.push(SqlValue::Integer(min_count as i64));
        bind.push(SqlValue::Integer(limit as i64));

        let conn = self.conn();
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params_from_iter(bind.iter()), |row| {
            Ok(FacetValue {
                value: row.get(0)?,
                count: row.get(1)?,
            })
        })?;
        rows.collect::<rusqlite::Result<_>>().map_err(Into::into)
    }

    /// A numeric aggregation over the filtered set (chunks excluded).
    pub(crate) fn aggregate(
        &self,
        name: &str,
        spec: &MatchSpec<'_>,
        kind: crate::query::AggregationKind,
        field: &str,
    ) -> crate::Result<Value> {
        use crate::query::AggregationKind as K;
        if self.index_fields(name)?.is_none() {
            return Ok(Value::Null);
        }
        let (from, where_clause, core_params) = self.build_query_core(name, spec)?;

        let (select, bind) = if kind == K::Count {
            ("COUNT(*)".to_string(), core_params)
        } else {
            let (value_expr, value_params) = filters::field_value_expr(field)?;
            let func = match kind {
                K::Min => "MIN",
                K::Max => "MAX",
                K::Avg => "AVG",
                K::Sum => "SUM",
                K::Count => unreachable!(),
            };
            let mut bind = value_params;
            bind.extend(core_params);
            (format!("{func}(CAST({value_expr} AS REAL))"), bind)
        };

        let sql = format!(
            "SELECT {select} FROM {from}
             WHERE {where_clause}
               AND COALESCE(json_extract(d.metadata, '$.is_chunk'), 0) != 1"
        );
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(&sql)?;
        let result: Option<f64> = stmt.query_row(params_from_iter(bind.iter()), |row| row.get(0))?;
        Ok(result.map_or(Value::Null, |v| {
            serde_json::Number::from_f64(v).map_or(Value::Null, Value::Number)
        }))
    }

    /// Indexed terms with document frequency at or above `min_doc_count`,
    /// most frequent first.
    pub(crate) fn vocabulary(
        &self,
        name: &str,
        min_doc_count: u64,
        max_terms: usize,
    ) -> crate::Result<Vec<VocabTerm>> {
        if self.index_fields(name)?.is_none() {
            return Ok(Vec::new());
        }
        let vocab = schema::vocab_table(name);
        let read = || -> rusqlite::Result<Vec<VocabTerm>> {
            let conn = self.conn();
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT term, doc FROM {vocab} WHERE doc >= ?1
                 ORDER BY doc DESC, term ASC LIMIT ?2"
            ))?;
            let rows = stmt.query_map(params![min_doc_count as i64, max_terms as i64], |row| {
                Ok(VocabTerm {
                    term: row.get(0)?,
                    doc_count: row.get::<_, i64>(1)? as u64,
                })
            })?;
            rows.collect()
        };
        read().map_err(|e| crate::SearchError::FuzzyUnavailable {
            reason: format!("vocabulary read failed: {e}"),
        })
    }

    /// Drop all cached query results for an index.
    pub(crate) fn invalidate_cache(&self, name: &str) {
        if let Some(cache) = &self.result_cache {
            cache
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .invalidate_index(name);
        }
    }
}

/// Whether an error is SQLITE_BUSY/SQLITE_LOCKED underneath.
fn is_busy(e: &crate::SearchError) -> bool {
    let crate::SearchError::Storage { source: Some(source), .. } = e else {
        return false;
    };
    source
        .downcast_ref::<rusqlite::Error>()
        .and_then(rusqlite::Error::sqlite_error_code)
        .is_some_and(|code| {
            matches!(
                code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            )
        })
}

/// R-tree subquery clauses for the geo constraints, parameters appended
/// in order.
fn geo_prefilters(name: &str, geo: &GeoQuery, params: &mut Vec<SqlValue>) -> Vec<String> {
    let rtree = schema::rtree_table(name);
    let mut clauses = Vec::new();

    let mut push_bounds = |bounds: &crate::geo::GeoBounds, params: &mut Vec<SqlValue>| {
        let segments = bounds.lng_segments();
        let lng_clause = segments
            .iter()
            .map(|_| "(r.max_lng >= ? AND r.min_lng <= ?)".to_string())
            .collect::<Vec<_>>()
            .join(" OR ");
        let clause = format!(
            "d.doc_id IN (SELECT r.doc_id FROM {rtree} r
             WHERE r.max_lat >= ? AND r.min_lat <= ? AND ({lng_clause}))"
        );
        params.push(SqlValue::Real(bounds.south));
        params.push(SqlValue::Real(bounds.north));
        for (west, east) in segments {
            params.push(SqlValue::Real(west));
            params.push(SqlValue::Real(east));
        }
        clause
    };

    if let Some(near) = &geo.near {
        let bbox = near.point.bounding_box(near.radius_m);
        clauses.push(push_bounds(&bbox, params));
    }
    if let Some(within) = &geo.within {
        clauses.push(push_bounds(within, params));
    }
    clauses
}

/// Raw column values before JSON parsing.
struct RawRow {
    doc_id: i64,
    ext_id: String,
    language: Option<String>,
    doc_type: String,
    timestamp: i64,
    content: String,
    metadata: String,
    index_text: String,
    geo_lat: Option<f64>,
    geo_lng: Option<f64>,
    rank: f64,
}

impl RawRow {
    fn parse(self, has_match: bool) -> crate::Result<StoredRow> {
        // FTS5's bm25() is negative (more negative = better); normalize
        // to a positive higher-is-better base. Filter-only queries get a
        // neutral base of 1.0.
        let bm25 = if has_match {
            (-self.rank).max(1e-6)
        } else {
            1.0
        };
        Ok(StoredRow {
            doc_id: self.doc_id,
            ext_id: self.ext_id,
            language: self.language,
            doc_type: self.doc_type,
            timestamp: self.timestamp,
            content: serde_json::from_str(&self.content)?,
            metadata: serde_json::from_str(&self.metadata)?,
            index_text: serde_json::from_str(&self.index_text)?,
            geo_lat: self.geo_lat,
            geo_lng: self.geo_lng,
            bm25,
        })
    }
}
