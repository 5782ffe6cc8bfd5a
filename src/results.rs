//! Search result shapes returned to callers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// One matched document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    /// Stored content, restricted to the query's field projection.
    pub document: Map<String, Value>,
    pub metadata: Map<String, Value>,
    /// Field → highlighted snippet. Empty unless highlighting was requested.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub highlights: BTreeMap<String, String>,
    /// Meters from the distance-sort or `near` reference point.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    /// Source index name; set by multi-index searches.
    #[serde(rename = "_index", skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
}

/// One facet bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacetValue {
    pub value: String,
    pub count: u64,
}

/// A did-you-mean candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    pub text: String,
    pub confidence: f64,
}

/// The full response of a search operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResults {
    pub results: Vec<SearchHit>,
    /// Matching rows before pagination (after chunk merging).
    pub total: u64,
    /// Rows in `results` (the current page).
    pub count: usize,
    pub search_time_ms: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub facets: BTreeMap<String, Vec<FacetValue>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub aggregations: BTreeMap<String, Value>,
    /// Present when the engine has did-you-mean candidates for a sparse
    /// result set.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<Suggestion>,
}

impl SearchResults {
    /// An empty result set carrying only timing.
    pub fn empty(search_time_ms: f64) -> Self {
        Self {
            search_time_ms,
            ..Self::default()
        }
    }
}
