//! The search query value type and its component clauses.

use crate::geo::{GeoBounds, GeoPoint};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A predicate over document attributes.
///
/// `field` is a path: `id`, `language`, `type`, `timestamp` address
/// columns directly; `metadata.a.b` and `content.title` address JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    #[serde(default)]
    pub value: Value,
}

impl Filter {
    pub fn new(field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }
}

/// Predicate operators. See the storage layer for their SQL semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    /// Type-preserving equality.
    Eq,
    /// Type-preserving inequality.
    Ne,
    /// Numeric compare; both sides cast to REAL.
    Lt,
    Le,
    Gt,
    Ge,
    /// Membership; `value` must be a JSON array.
    In,
    NotIn,
    /// Case-insensitive substring match.
    Contains,
    /// SQL LIKE with `%` and `_`.
    Like,
    /// The JSON path resolves to a non-null value; `value` is ignored.
    Exists,
    /// Equal, or the field is absent (tri-valued true on missing).
    EqOrNull,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Desc,
    Asc,
}

/// A sort clause. `field` may be `_score` or any filterable path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sort {
    pub field: String,
    #[serde(default)]
    pub order: SortOrder,
}

/// Options for one requested facet.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FacetOptions {
    /// Maximum number of distinct values returned.
    pub limit: usize,
    /// Values with fewer occurrences are omitted.
    pub min_count: u64,
}

impl Default for FacetOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            min_count: 1,
        }
    }
}

/// Numeric aggregation kinds over a metadata field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationKind {
    Min,
    Max,
    Avg,
    Sum,
    Count,
}

/// One requested aggregation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Aggregation {
    #[serde(rename = "type")]
    pub kind: AggregationKind,
    /// Field path the aggregation reads (ignored for `Count`).
    pub field: String,
}

/// Geo constraints and distance sorting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoQuery {
    /// Keep rows within `radius_m` meters of `point`.
    pub near: Option<GeoNear>,
    /// Keep rows whose point lies inside the bounds.
    pub within: Option<GeoBounds>,
    /// Order results by distance from a point.
    pub distance_sort: Option<DistanceSort>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoNear {
    pub point: GeoPoint,
    pub radius_m: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistanceSort {
    pub point: GeoPoint,
    #[serde(default)]
    pub order: SortOrder,
}

/// Highlighting options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HighlightOptions {
    pub enabled: bool,
    /// Snippet length in characters; 0 falls back to the configured
    /// `search.snippet_length`.
    pub length: usize,
}

impl Default for HighlightOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            length: 0,
        }
    }
}

/// A fully-specified search request.
///
/// Build one with [`SearchQuery::new`] and the `with_*` helpers; every
/// field also deserializes from JSON for callers that assemble queries
/// dynamically.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchQuery {
    /// Free-text query. May be empty when filters alone select rows.
    pub query: String,
    pub filters: Vec<Filter>,
    /// Restrict returned document fields. Empty means all stored fields.
    pub fields: Vec<String>,
    pub sort: Vec<Sort>,
    /// Overrides the analyzer's default language for this query.
    pub language: Option<String>,
    /// Per-field boost overrides for this query.
    pub boosts: BTreeMap<String, f32>,
    /// None defers to `search.enable_fuzzy`.
    pub fuzzy: Option<bool>,
    /// Query-time fuzziness override in [0, 1].
    pub fuzziness: Option<f64>,
    pub highlight: HighlightOptions,
    /// Facet field → options.
    pub facets: BTreeMap<String, FacetOptions>,
    /// Aggregation name → spec.
    pub aggregations: BTreeMap<String, Aggregation>,
    pub geo: GeoQuery,
    /// Collapse rows sharing `metadata.route` into one.
    pub unique_by_route: bool,
    pub limit: usize,
    pub offset: usize,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            query: String::new(),
            filters: Vec::new(),
            fields: Vec::new(),
            sort: Vec::new(),
            language: None,
            boosts: BTreeMap::new(),
            fuzzy: None,
            fuzziness: None,
            highlight: HighlightOptions::default(),
            facets: BTreeMap::new(),
            aggregations: BTreeMap::new(),
            geo: GeoQuery::default(),
            unique_by_route: false,
            limit: 20,
            offset: 0,
        }
    }
}

impl SearchQuery {
    /// A query for `text` with default options.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            query: text.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    #[must_use]
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    #[must_use]
    pub fn with_fuzzy(mut self, enabled: bool) -> Self {
        self.fuzzy = Some(enabled);
        self
    }

    #[must_use]
    pub fn with_highlight(mut self, length: usize) -> Self {
        self.highlight = HighlightOptions {
            enabled: true,
            length,
        };
        self
    }

    #[must_use]
    pub fn near(mut self, point: GeoPoint, radius_m: f64) -> Self {
        self.geo.near = Some(GeoNear { point, radius_m });
        self
    }

    #[must_use]
    pub fn sort_by_distance(mut self, point: GeoPoint, order: SortOrder) -> Self {
        self.geo.distance_sort = Some(DistanceSort { point, order });
        self
    }
}
