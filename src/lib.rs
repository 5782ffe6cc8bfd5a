//! Embeddable full-text search over SQLite FTS5 with an R-tree for geo
//! queries.
//!
//! quarry indexes heterogeneous documents — text fields, arbitrary JSON
//! metadata, optional geo points or bounds — and answers ranked,
//! filtered, faceted, geo-constrained queries with typo tolerance.
//! Everything lives in one SQLite database file; there is no server.
//!
//! The entry point is [`Quarry`]; see its docs for a round-trip
//! example.

#![warn(unreachable_pub)]

pub mod analyzer;
pub mod config;
pub mod document;
pub mod error;
pub mod facade;
pub mod fuzzy;
pub mod geo;
pub mod indexer;
pub mod query;
pub mod results;
pub mod search;
pub mod storage;
pub mod tracing;
pub mod types;

// Re-export common types
pub use config::{AnalyzerConfig, CacheConfig, IndexerConfig, SearchConfig, SearchTuning, StorageConfig};
pub use document::Document;
pub use error::{Result, SearchError};
pub use facade::Quarry;
pub use fuzzy::FuzzyAlgorithm;
pub use geo::{GeoBounds, GeoPoint};
pub use indexer::{BatchOutcome, Indexer};
pub use query::{
    Aggregation, AggregationKind, FacetOptions, Filter, FilterOp, SearchQuery, Sort, SortOrder,
};
pub use results::{FacetValue, SearchHit, SearchResults, Suggestion};
pub use search::SearchEngine;
pub use storage::Storage;
pub use types::{CancelToken, FieldConfig, IndexName, IndexStats, IndexSummary};
