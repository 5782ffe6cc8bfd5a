//! Configuration for the facade and its components.
//!
//! Every group deserializes with `#[serde(default)]`, so callers supply
//! only the keys they care about; unknown keys are ignored for forward
//! compatibility. Numeric knobs outside their valid range are clamped to
//! the nearest valid value by [`SearchConfig::validated`] rather than
//! rejected.

use crate::fuzzy::FuzzyAlgorithm;
use crate::types::FieldConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Root configuration handed to [`Quarry::new`](crate::Quarry::new).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub storage: StorageConfig,
    pub analyzer: AnalyzerConfig,
    pub indexer: IndexerConfig,
    pub search: SearchTuning,
    pub cache: CacheConfig,
}

impl SearchConfig {
    /// Return a copy with every out-of-range numeric clamped to its
    /// nearest valid value.
    pub fn validated(mut self) -> Self {
        let a = &mut self.analyzer;
        a.min_word_length = a.min_word_length.max(1);
        a.max_word_length = a.max_word_length.max(a.min_word_length);

        let i = &mut self.indexer;
        i.batch_size = i.batch_size.max(1);
        i.chunk_size = i.chunk_size.max(64);
        i.chunk_overlap = i.chunk_overlap.min(i.chunk_size / 2);

        let s = &mut self.search;
        s.max_results = s.max_results.max(1);
        s.min_score = s.min_score.max(0.0);
        s.fuzziness = s.fuzziness.clamp(0.0, 1.0);
        s.fuzzy_score_penalty = s.fuzzy_score_penalty.clamp(0.0, 1.0);
        s.correction_threshold = s.correction_threshold.clamp(0.0, 1.0);
        s.trigram_threshold = s.trigram_threshold.clamp(0.0, 1.0);
        s.jaro_winkler_threshold = s.jaro_winkler_threshold.clamp(0.0, 1.0);
        s.jaro_winkler_prefix_scale = s.jaro_winkler_prefix_scale.clamp(0.0, 0.25);
        s.trigram_size = s.trigram_size.clamp(2, 4);
        s.min_term_frequency = s.min_term_frequency.max(1);
        s.max_indexed_terms = s.max_indexed_terms.max(100);
        s.max_fuzzy_variations = s.max_fuzzy_variations.max(1);
        s.snippet_length = s.snippet_length.max(16);

        self.cache.max_size = self.cache.max_size.max(1);
        self
    }
}

/// Where and how the SQLite database is opened.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file path. `:memory:` opens a private in-memory database.
    pub path: PathBuf,
    /// Use FTS5 external-content mode (index references the documents
    /// table instead of duplicating text). Plain contentful FTS5 tables
    /// are created when false.
    pub external_content: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(":memory:"),
            external_content: true,
        }
    }
}

/// Text analysis pipeline knobs. See [`Analyzer`](crate::analyzer::Analyzer).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Tokens shorter than this (in characters, post-normalization) are dropped.
    pub min_word_length: usize,
    /// Tokens longer than this are truncated at this length.
    pub max_word_length: usize,
    /// Drop tokens that are purely numeric.
    pub remove_numbers: bool,
    pub lowercase: bool,
    /// Remove tag markup; attribute contents (href/src) never become tokens.
    pub strip_html: bool,
    pub strip_punctuation: bool,
    /// Replace known English contractions (`can't` → `cannot`) before tokenization.
    pub expand_contractions: bool,
    pub disable_stop_words: bool,
    /// Extra stop words merged into the language defaults. Compared
    /// case-insensitively after trimming.
    pub custom_stop_words: Vec<String>,
    /// Default language for documents that do not carry one.
    pub default_language: String,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            min_word_length: 2,
            max_word_length: 50,
            remove_numbers: false,
            lowercase: true,
            strip_html: true,
            strip_punctuation: true,
            expand_contractions: true,
            disable_stop_words: false,
            custom_stop_words: Vec::new(),
            default_language: "english".to_string(),
        }
    }
}

/// Indexer batching and chunking knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Queue length that triggers an automatic flush.
    pub batch_size: usize,
    /// Flush after every insert call instead of waiting for `batch_size`.
    pub auto_flush: bool,
    /// Byte length of the primary text field above which a document is
    /// split into chunk rows.
    pub chunk_size: usize,
    /// Trailing bytes of a chunk repeated at the start of the next one,
    /// snapped to whole words.
    pub chunk_overlap: usize,
    /// Name of the field whose length drives the chunking decision.
    pub primary_text_field: String,
    /// Field configuration applied to indices created implicitly by the
    /// first write.
    pub fields: BTreeMap<String, FieldConfig>,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        let mut fields = BTreeMap::new();
        fields.insert("title".to_string(), FieldConfig::boosted(3.0));
        fields.insert("content".to_string(), FieldConfig::default());
        Self {
            batch_size: 100,
            auto_flush: true,
            chunk_size: 10_000,
            chunk_overlap: 100,
            primary_text_field: "content".to_string(),
            fields,
        }
    }
}

/// Query-side tuning: scoring, highlighting, and the fuzzy subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchTuning {
    /// Rows scoring below this are dropped before pagination.
    pub min_score: f32,
    /// Hard cap on `limit`.
    pub max_results: usize,
    pub highlight_tag: String,
    pub highlight_tag_close: String,
    /// Target snippet length in characters.
    pub snippet_length: usize,

    pub enable_fuzzy: bool,
    pub enable_suggestions: bool,
    pub fuzzy_algorithm: FuzzyAlgorithm,
    /// Pick a single best correction per token (vs. OR-ing all variants
    /// into the match expression).
    pub fuzzy_correction_mode: bool,
    /// Minimum cross-matcher confidence for a correction to be applied.
    pub correction_threshold: f64,
    /// Score multiplier `(1 - penalty)` applied to rows reached only
    /// through fuzzy variants.
    pub fuzzy_score_penalty: f32,
    /// Query-side fuzziness in [0, 1]; scales how aggressive expansion is.
    pub fuzziness: f64,
    /// Only fuzzify the final token (as-you-type UX).
    pub fuzzy_last_token_only: bool,
    /// Append `*` to the last token regardless of algorithm.
    pub prefix_last_token: bool,

    pub trigram_size: usize,
    pub trigram_threshold: f64,
    pub jaro_winkler_threshold: f64,
    pub jaro_winkler_prefix_scale: f64,
    pub levenshtein_threshold: usize,

    /// Vocabulary terms below this document frequency are not fuzzy
    /// candidates.
    pub min_term_frequency: u64,
    /// Cap on the candidate vocabulary size.
    pub max_indexed_terms: usize,
    /// Cap on generated variants per query token.
    pub max_fuzzy_variations: usize,
    /// Seconds the candidate vocabulary is reused before re-reading it
    /// from storage.
    pub indexed_terms_cache_ttl: u64,
    /// Bound on the persistent per-index fuzzy term cache.
    pub fuzzy_cache_max_size: usize,
}

impl Default for SearchTuning {
    fn default() -> Self {
        Self {
            min_score: 0.0,
            max_results: 1000,
            highlight_tag: "<mark>".to_string(),
            highlight_tag_close: "</mark>".to_string(),
            snippet_length: 160,
            enable_fuzzy: true,
            enable_suggestions: true,
            fuzzy_algorithm: FuzzyAlgorithm::Trigram,
            fuzzy_correction_mode: true,
            correction_threshold: 0.6,
            fuzzy_score_penalty: 0.25,
            fuzziness: 0.5,
            fuzzy_last_token_only: false,
            prefix_last_token: false,
            trigram_size: 3,
            trigram_threshold: 0.35,
            jaro_winkler_threshold: 0.85,
            jaro_winkler_prefix_scale: 0.1,
            levenshtein_threshold: 2,
            min_term_frequency: 1,
            max_indexed_terms: 10_000,
            max_fuzzy_variations: 10,
            indexed_terms_cache_ttl: 300,
            fuzzy_cache_max_size: 1000,
        }
    }
}

/// Optional query-result cache shared by all indices of one storage
/// handle. Disabled by default; any successful write to an index
/// invalidates that index's entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Entry time-to-live in seconds.
    pub ttl: u64,
    pub max_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl: 300,
            max_size: 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::check;

    #[test]
    fn test_defaults_match_documented_values() {
        let c = SearchConfig::default();
        check!(c.analyzer.min_word_length == 2);
        check!(c.analyzer.max_word_length == 50);
        check!(c.indexer.batch_size == 100);
        check!(c.search.trigram_threshold == 0.35);
        check!(c.search.jaro_winkler_threshold == 0.85);
        check!(c.search.levenshtein_threshold == 2);
        check!(!c.cache.enabled);
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let json = r#"{
            "search": { "min_score": 0.5, "warp_drive": true },
            "flux_capacitor": 88
        }"#;
        let c: SearchConfig = serde_json::from_str(json).unwrap();
        check!(c.search.min_score == 0.5);
    }

    #[test]
    fn test_out_of_range_values_clamp() {
        let mut c = SearchConfig::default();
        c.analyzer.min_word_length = 0;
        c.search.fuzzy_score_penalty = 3.0;
        c.search.trigram_size = 10;
        c.indexer.chunk_size = 1;
        let c = c.validated();
        check!(c.analyzer.min_word_length == 1);
        check!(c.search.fuzzy_score_penalty == 1.0);
        check!(c.search.trigram_size == 4);
        check!(c.indexer.chunk_size == 64);
    }

    #[test]
    fn test_overlap_never_exceeds_half_chunk() {
        let mut c = SearchConfig::default();
        c.indexer.chunk_size = 1000;
        c.indexer.chunk_overlap = 900;
        let c = c.validated();
        check!(c.indexer.chunk_overlap == 500);
    }
}
