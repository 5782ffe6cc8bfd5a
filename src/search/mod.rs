//! The query pipeline: analyze → fuzzify → match → score → merge →
//! paginate, with optional highlighting, facets, and aggregations.
//!
//! A `SearchEngine` is bound to one index and owns that index's
//! persistent fuzzy term cache plus a TTL-bounded vocabulary snapshot.
//! It is otherwise stateless between calls; ranking state lives in the
//! shared [`Storage`] caches.

mod highlight;
mod scoring;

use crate::analyzer::{Analyzer, stemmer_for};
use crate::config::SearchTuning;
use crate::document::{META_IS_CHUNK, META_PARENT_ID};
use crate::fuzzy::{ExpandedToken, FuzzyEngine, FuzzyTermCache, VocabTerm};
use crate::query::{SearchQuery, Sort, SortOrder};
use crate::results::{SearchHit, SearchResults, Suggestion};
use crate::storage::{MatchSpec, Storage, StoredRow};
use crate::types::{CancelToken, FieldConfig, IndexName};
use ahash::AHashSet;
use highlight::Highlighter;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Fewer hits than this (after a correction) triggers did-you-mean
/// suggestions.
const SUGGESTION_MIN_HITS: u64 = 3;

/// Reader for one index.
pub struct SearchEngine {
    storage: Arc<Storage>,
    analyzer: Arc<Analyzer>,
    tuning: SearchTuning,
    index: IndexName,
    term_cache: FuzzyTermCache,
    vocab_cache: Option<(Instant, Arc<Vec<VocabTerm>>)>,
}

impl std::fmt::Debug for SearchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchEngine")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

/// One logical result after chunk merging.
struct Merged {
    id: String,
    rep: StoredRow,
    rep_is_parent: bool,
    score: f32,
    /// Total stored-content length, the secondary tie-break.
    merged_len: usize,
    /// Primary-field texts of matched chunk members, highlight sources.
    member_texts: Vec<String>,
    distance: Option<f64>,
}

impl SearchEngine {
    pub(crate) fn new(
        storage: Arc<Storage>,
        analyzer: Arc<Analyzer>,
        tuning: SearchTuning,
        index: IndexName,
    ) -> Self {
        let sidecar = FuzzyTermCache::sidecar_path(storage.db_path(), index.as_str());
        let term_cache = FuzzyTermCache::load(sidecar, tuning.fuzzy_cache_max_size);
        Self {
            storage,
            analyzer,
            tuning,
            index,
            term_cache,
            vocab_cache: None,
        }
    }

    /// Execute a search.
    pub fn search(&mut self, query: &SearchQuery) -> crate::Result<SearchResults> {
        self.search_with_cancel(query, None)
    }

    /// [`SearchEngine::search`] with a cancellation signal.
    pub fn search_with_cancel(
        &mut self,
        query: &SearchQuery,
        cancel: Option<&CancelToken>,
    ) -> crate::Result<SearchResults> {
        let started = Instant::now();
        let limit = query.limit.min(self.tuning.max_results);

        let (mut merged, expanded, tokens) = self.run_pipeline(query, cancel)?;
        let total = merged.len() as u64;

        // Facets and aggregations see the filtered, unpaginated set.
        let spec = self.match_spec(&expanded, query, cancel);
        let mut facets = BTreeMap::new();
        for (field, options) in &query.facets {
            let counts = self.storage.facet_counts(
                self.index.as_str(),
                &spec,
                field,
                options.limit,
                options.min_count,
            )?;
            facets.insert(field.clone(), counts);
        }
        let mut aggregations = BTreeMap::new();
        for (name, agg) in &query.aggregations {
            let value =
                self.storage
                    .aggregate(self.index.as_str(), &spec, agg.kind, &agg.field)?;
            aggregations.insert(name.clone(), value);
        }

        // Paginate.
        let page: Vec<Merged> = merged
            .drain(..)
            .skip(query.offset)
            .take(limit)
            .collect();

        // Did-you-mean when the result set is sparse.
        let mut suggestions = Vec::new();
        if self.tuning.enable_suggestions
            && total < SUGGESTION_MIN_HITS
            && expanded.iter().any(ExpandedToken::is_fuzzy)
        {
            if let Some(vocab) = self.vocabulary_or_warn() {
                let engine = FuzzyEngine::new(&self.tuning, self.effective_fuzziness(query));
                suggestions = engine
                    .suggestions(&tokens, &vocab, 3)
                    .into_iter()
                    .map(|(text, confidence)| Suggestion { text, confidence })
                    .collect();
            }
        }

        let hits = self.build_hits(page, query, &expanded)?;
        self.term_cache.persist();

        let results = SearchResults {
            count: hits.len(),
            results: hits,
            total,
            search_time_ms: started.elapsed().as_secs_f64() * 1000.0,
            facets,
            aggregations,
            suggestions,
        };
        tracing::debug!(
            index = %self.index,
            query = %query.query,
            total,
            elapsed_ms = results.search_time_ms,
            "Search completed"
        );
        Ok(results)
    }

    /// Number of matching documents (after chunk merging), ignoring
    /// pagination.
    pub fn count(&mut self, query: &SearchQuery) -> crate::Result<u64> {
        let (merged, _, _) = self.run_pipeline(query, None)?;
        Ok(merged.len() as u64)
    }

    /// Ranked correction candidates for a single term.
    pub fn suggest(&mut self, term: &str, limit: usize) -> crate::Result<Vec<Suggestion>> {
        let analyzed = self.analyzer.analyze(term, None);
        let token = match analyzed.tokens.first() {
            Some(t) => t.clone(),
            None => return Ok(Vec::new()),
        };
        let Some(vocab) = self.vocabulary_or_warn() else {
            return Ok(Vec::new());
        };
        let engine = FuzzyEngine::new(&self.tuning, self.tuning.fuzziness);
        Ok(engine
            .rank_candidates(&token, &vocab)
            .into_iter()
            .take(limit)
            .map(|c| Suggestion {
                text: c.term,
                confidence: c.score,
            })
            .collect())
    }

    /// Shared front half of search/count: analyze, fuzzify, fetch,
    /// score, merge, order.
    fn run_pipeline(
        &mut self,
        query: &SearchQuery,
        cancel: Option<&CancelToken>,
    ) -> crate::Result<(Vec<Merged>, Vec<ExpandedToken>, Vec<String>)> {
        let analyzed = self
            .analyzer
            .analyze(&query.query, query.language.as_deref());
        let tokens = analyzed.tokens;

        let fuzzy_enabled = query.fuzzy.unwrap_or(self.tuning.enable_fuzzy) && !tokens.is_empty();
        let expanded: Vec<ExpandedToken> = if fuzzy_enabled {
            match self.vocabulary_or_warn() {
                Some(vocab) => {
                    let engine = FuzzyEngine::new(&self.tuning, self.effective_fuzziness(query));
                    engine.expand(&tokens, &vocab, &mut self.term_cache)
                }
                None => tokens.iter().cloned().map(ExpandedToken::Exact).collect(),
            }
        } else {
            tokens.iter().cloned().map(ExpandedToken::Exact).collect()
        };

        let fields = self
            .storage
            .index_fields(self.index.as_str())?
            .unwrap_or_default();

        let spec = self.match_spec(&expanded, query, cancel);
        let rows = self.storage.search_rows(self.index.as_str(), &spec)?;

        let merged = self.score_and_merge(&rows, query, &expanded, &tokens, &fields);
        Ok((merged, expanded, tokens))
    }

    fn effective_fuzziness(&self, query: &SearchQuery) -> f64 {
        query.fuzziness.unwrap_or(self.tuning.fuzziness)
    }

    fn match_spec<'a>(
        &self,
        expanded: &[ExpandedToken],
        query: &'a SearchQuery,
        cancel: Option<&'a CancelToken>,
    ) -> MatchSpec<'a> {
        MatchSpec {
            match_expr: build_match_expr(expanded, self.tuning.prefix_last_token),
            filters: &query.filters,
            geo: Some(&query.geo),
            fetch_limit: self.tuning.max_results,
            cancel,
        }
    }

    /// Score rows, collapse chunks onto their parents (and routes when
    /// requested), apply `min_score`, and order.
    fn score_and_merge(
        &self,
        rows: &[StoredRow],
        query: &SearchQuery,
        expanded: &[ExpandedToken],
        tokens: &[String],
        fields: &BTreeMap<String, FieldConfig>,
    ) -> Vec<Merged> {
        let any_fuzzy = expanded.iter().any(ExpandedToken::is_fuzzy);
        let primary_terms: Vec<String> = expanded.iter().map(primary_term).collect();

        let mut order: Vec<String> = Vec::new();
        let mut groups: std::collections::HashMap<String, Merged> =
            std::collections::HashMap::new();

        for row in rows {
            let is_chunk = row
                .metadata
                .get(META_IS_CHUNK)
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let group_id = if is_chunk {
                row.metadata
                    .get(META_PARENT_ID)
                    .and_then(Value::as_str)
                    .unwrap_or(row.ext_id.as_str())
                    .to_string()
            } else {
                row.ext_id.clone()
            };

            let score = self.score_row(row, query, &primary_terms, tokens, any_fuzzy, fields);
            let distance = self.distance_for(row, query);
            let chunk_text = is_chunk
                .then(|| row.content.values().find_map(Value::as_str).map(str::to_string))
                .flatten();

            match groups.get_mut(&group_id) {
                Some(merged) => {
                    merged.score = merged.score.max(score);
                    if let Some(text) = chunk_text {
                        merged.member_texts.push(text);
                    }
                    if !is_chunk && !merged.rep_is_parent {
                        merged.merged_len = content_length(row);
                        merged.rep = row.clone();
                        merged.rep_is_parent = true;
                        merged.distance = distance;
                    }
                }
                None => {
                    order.push(group_id.clone());
                    groups.insert(
                        group_id.clone(),
                        Merged {
                            id: group_id,
                            merged_len: content_length(row),
                            rep: row.clone(),
                            rep_is_parent: !is_chunk,
                            score,
                            member_texts: chunk_text.into_iter().collect(),
                            distance,
                        },
                    );
                }
            }
        }

        let mut merged: Vec<Merged> = order
            .into_iter()
            .filter_map(|id| groups.remove(&id))
            .collect();

        // Optional second collapse on metadata.route.
        if query.unique_by_route {
            let mut by_route: std::collections::HashMap<String, Merged> =
                std::collections::HashMap::new();
            let mut route_order = Vec::new();
            for m in merged {
                let route = m
                    .rep
                    .metadata
                    .get("route")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                match route {
                    Some(route) => match by_route.get_mut(&route) {
                        Some(existing) => existing.score = existing.score.max(m.score),
                        None => {
                            route_order.push(route.clone());
                            by_route.insert(route, m);
                        }
                    },
                    None => {
                        // Rows without a route never collapse; key by id.
                        let key = format!("\u{0}{}", m.id);
                        route_order.push(key.clone());
                        by_route.insert(key, m);
                    }
                }
            }
            merged = route_order
                .into_iter()
                .filter_map(|k| by_route.remove(&k))
                .collect();
        }

        merged.retain(|m| m.score >= self.tuning.min_score);
        self.order_merged(&mut merged, query);
        merged
    }

    fn score_row(
        &self,
        row: &StoredRow,
        query: &SearchQuery,
        primary_terms: &[String],
        original_tokens: &[String],
        any_fuzzy: bool,
        fields: &BTreeMap<String, FieldConfig>,
    ) -> f32 {
        let mut signals = Vec::new();
        for (field, terms) in &row.index_text {
            let boost = query
                .boosts
                .get(field)
                .copied()
                .or_else(|| fields.get(field).map(|f| f.boost))
                .unwrap_or(1.0);
            let Some(quality) = scoring::match_quality(terms, primary_terms) else {
                continue;
            };
            let raw_value = row.content.get(field).and_then(Value::as_str).unwrap_or("");
            signals.push(scoring::FieldSignal {
                boost,
                quality,
                length_penalty: scoring::length_penalty(raw_value, &query.query),
                exact_bonus: scoring::exact_bonus(raw_value, &query.query, boost),
            });
        }

        let fuzzy_matched = any_fuzzy && {
            let row_terms: AHashSet<&str> = row
                .index_text
                .values()
                .flat_map(|t| t.split_whitespace())
                .collect();
            !original_tokens.iter().any(|t| row_terms.contains(t.as_str()))
        };

        scoring::combine(
            row.bm25,
            &signals,
            fuzzy_matched,
            self.tuning.fuzzy_score_penalty,
        )
    }

    fn distance_for(&self, row: &StoredRow, query: &SearchQuery) -> Option<f64> {
        let reference = query
            .geo
            .distance_sort
            .as_ref()
            .map(|d| d.point)
            .or_else(|| query.geo.near.as_ref().map(|n| n.point))?;
        row.geo_point().map(|p| p.distance_to(&reference))
    }

    /// Final ordering: explicit sorts win, then distance sort, then
    /// score with deterministic tie-breaks.
    fn order_merged(&self, merged: &mut [Merged], query: &SearchQuery) {
        if let Some(distance_sort) = &query.geo.distance_sort {
            let asc = distance_sort.order == SortOrder::Asc;
            merged.sort_by(|a, b| {
                let da = a.distance.unwrap_or(f64::INFINITY);
                let db = b.distance.unwrap_or(f64::INFINITY);
                let ord = da.total_cmp(&db);
                if asc { ord } else { ord.reverse() }
            });
            return;
        }
        if !query.sort.is_empty() {
            let sorts = query.sort.clone();
            merged.sort_by(|a, b| compare_by_sorts(a, b, &sorts));
            return;
        }
        merged.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.merged_len.cmp(&b.merged_len))
                .then_with(|| a.id.cmp(&b.id))
        });
    }

    /// Build the public hits for one page: projection, highlighting,
    /// distance annotation.
    fn build_hits(
        &self,
        page: Vec<Merged>,
        query: &SearchQuery,
        expanded: &[ExpandedToken],
    ) -> crate::Result<Vec<SearchHit>> {
        let highlight_enabled = query.highlight.enabled;
        let snippet_length = if query.highlight.length > 0 {
            query.highlight.length
        } else {
            self.tuning.snippet_length
        };
        let highlighter = Highlighter {
            open_tag: self.tuning.highlight_tag.clone(),
            close_tag: self.tuning.highlight_tag_close.clone(),
            snippet_length,
        };
        let highlight_terms: Vec<String> = expanded
            .iter()
            .flat_map(|e| e.match_terms().into_iter().map(str::to_string))
            .collect();

        let mut hits = Vec::with_capacity(page.len());
        for m in page {
            let language = m
                .rep
                .language
                .clone()
                .unwrap_or_else(|| self.analyzer.config().default_language.clone());
            let stemmer = stemmer_for(&language);

            let document: Map<String, Value> = if query.fields.is_empty() {
                m.rep.content.clone()
            } else {
                m.rep
                    .content
                    .iter()
                    .filter(|(k, _)| query.fields.iter().any(|f| f == *k))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            };

            let mut highlights = BTreeMap::new();
            if highlight_enabled && !highlight_terms.is_empty() {
                for (field, value) in &document {
                    let Some(text) = value.as_str() else { continue };
                    if let Some(snippet) =
                        highlighter.highlight(text, &highlight_terms, &stemmer)
                    {
                        highlights.insert(field.clone(), snippet);
                    }
                }
                // Chunk members may hold the matching text when the
                // parent's own fields did not hit.
                if highlights.is_empty() {
                    let mut seen = AHashSet::new();
                    let mut combined = String::new();
                    for text in &m.member_texts {
                        if let Some(snippet) =
                            highlighter.highlight(text, &highlight_terms, &stemmer)
                        {
                            if seen.insert(snippet.clone()) {
                                if !combined.is_empty() {
                                    combined.push(' ');
                                }
                                combined.push_str(&snippet);
                                if combined.len() >= snippet_length {
                                    break;
                                }
                            }
                        }
                    }
                    if !combined.is_empty() {
                        highlights.insert("content".to_string(), combined);
                    }
                }
            }

            hits.push(SearchHit {
                id: m.id,
                score: m.score,
                document,
                metadata: m.rep.metadata.clone(),
                highlights,
                distance: m.distance,
                index: None,
            });
        }
        Ok(hits)
    }

    /// The candidate vocabulary, TTL-cached. A storage failure logs a
    /// warning and disables fuzzy matching for this call.
    fn vocabulary_or_warn(&mut self) -> Option<Arc<Vec<VocabTerm>>> {
        let ttl = Duration::from_secs(self.tuning.indexed_terms_cache_ttl);
        if let Some((at, vocab)) = &self.vocab_cache {
            if at.elapsed() <= ttl {
                return Some(Arc::clone(vocab));
            }
        }
        match self.storage.vocabulary(
            self.index.as_str(),
            self.tuning.min_term_frequency,
            self.tuning.max_indexed_terms,
        ) {
            Ok(vocab) => {
                let vocab = Arc::new(vocab);
                self.vocab_cache = Some((Instant::now(), Arc::clone(&vocab)));
                Some(vocab)
            }
            Err(e) => {
                tracing::warn!(index = %self.index, error = %e, "Fuzzy matching unavailable");
                None
            }
        }
    }
}

/// Representative term of a token: the correction when one was applied,
/// otherwise the original.
fn primary_term(token: &ExpandedToken) -> String {
    match token {
        ExpandedToken::Exact(t) => t.clone(),
        ExpandedToken::Corrected { replacement, .. } => replacement.clone(),
        ExpandedToken::Expanded { original, .. } => original.clone(),
    }
}

/// Quote a term for an FTS5 match expression. Prefix terms keep their
/// trailing star outside the quotes.
fn quote_term(term: &str) -> String {
    let clean = term.replace('"', "");
    match clean.strip_suffix('*') {
        Some(stem) if !stem.is_empty() => format!("\"{stem}\"*"),
        _ => format!("\"{clean}\""),
    }
}

/// Build the FTS5 match expression from the expanded tokens.
///
/// Multi-token queries OR the full phrase with every per-token
/// alternative: `("t1 t2" OR "t1" OR "t1v" OR "t2")`. The phrase arm
/// doubles with the per-term arms for rows containing the exact phrase,
/// which is what ranks phrase hits first.
fn build_match_expr(expanded: &[ExpandedToken], prefix_last_token: bool) -> Option<String> {
    if expanded.is_empty() {
        return None;
    }

    let mut arms: Vec<String> = Vec::new();
    if expanded.len() > 1 {
        let phrase = expanded
            .iter()
            .map(primary_term)
            .collect::<Vec<_>>()
            .join(" ");
        arms.push(format!("\"{}\"", phrase.replace('"', "")));
    }

    let last = expanded.len() - 1;
    for (i, token) in expanded.iter().enumerate() {
        for term in token.match_terms() {
            arms.push(quote_term(term));
        }
        if prefix_last_token && i == last {
            arms.push(quote_term(&format!("{}*", primary_term(token))));
        }
    }

    // Duplicate arms are harmless but noisy.
    let mut seen = AHashSet::new();
    arms.retain(|a| seen.insert(a.clone()));

    Some(format!("({})", arms.join(" OR ")))
}

/// Compare two merged rows by the query's sort clauses, falling back to
/// id for stability.
fn compare_by_sorts(a: &Merged, b: &Merged, sorts: &[Sort]) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    for sort in sorts {
        let ord = match sort.field.as_str() {
            "_score" => a.score.total_cmp(&b.score),
            "id" => a.id.cmp(&b.id),
            "timestamp" => a.rep.timestamp.cmp(&b.rep.timestamp),
            "language" => a.rep.language.cmp(&b.rep.language),
            "type" => a.rep.doc_type.cmp(&b.rep.doc_type),
            path => compare_values(field_value(a, path), field_value(b, path)),
        };
        let ord = match sort.order {
            SortOrder::Asc => ord,
            SortOrder::Desc => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.id.cmp(&b.id)
}

/// Resolve a `metadata.…`/`content.…` path against a merged row.
fn field_value<'a>(m: &'a Merged, path: &str) -> Option<&'a Value> {
    let (root, rest) = path.split_once('.')?;
    let mut current = match root {
        "metadata" => m.rep.metadata.get(rest.split('.').next()?),
        "content" => m.rep.content.get(rest.split('.').next()?),
        _ => None,
    }?;
    for segment in rest.split('.').skip(1) {
        current = current.get(segment)?;
    }
    Some(current)
}

/// Order JSON values: numbers before strings, nulls last.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            _ => a.to_string().cmp(&b.to_string()),
        },
    }
}

fn content_length(row: &StoredRow) -> usize {
    row.content
        .values()
        .filter_map(Value::as_str)
        .map(str::len)
        .sum()
}
