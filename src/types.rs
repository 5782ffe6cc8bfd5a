//! Domain-specific types to replace primitive string obsession.
//!
//! This module provides strongly-typed alternatives to raw strings for:
//! - Index names (with validation, used to derive SQL table names)
//! - Per-field indexing configuration
//! - Cancellation tokens shared between a caller and a running operation

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A validated index name.
///
/// Index names become part of SQL table names (`docs_<name>`,
/// `fts_<name>`, `rtree_<name>`), so they are restricted to
/// `[a-zA-Z_][a-zA-Z0-9_]*`. Validation here is what makes string
/// interpolation into DDL safe.
///
/// # Examples
///
/// ```
/// use quarry::types::IndexName;
///
/// let name = IndexName::new("articles_en").unwrap();
/// assert_eq!(name.as_str(), "articles_en");
/// assert!(IndexName::new("1st").is_err());
/// assert!(IndexName::new("no-dashes").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct IndexName(String);

impl IndexName {
    /// Create a validated index name.
    pub fn new(name: impl Into<String>) -> crate::Result<Self> {
        let name = name.into();
        let mut chars = name.chars();
        let valid_start = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        let valid_rest = name
            .chars()
            .skip(1)
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid_start || !valid_rest {
            return Err(crate::SearchError::invalid_argument(
                "index_name",
                &name,
                "must match [a-zA-Z_][a-zA-Z0-9_]*",
            ));
        }
        Ok(Self(name))
    }

    /// The raw name as provided.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IndexName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for IndexName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for IndexName {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::new(s).map_err(serde::de::Error::custom)
    }
}

/// Per-field indexing configuration.
///
/// The field set of an index is fixed at creation; changing it requires
/// a rebuild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldConfig {
    /// Score multiplier applied when a match occurs in this field.
    #[serde(default = "default_boost")]
    pub boost: f32,
    /// Whether the raw value is kept in the stored content map and
    /// returned in results.
    #[serde(default = "default_true")]
    pub store: bool,
    /// Whether the value participates in full-text matching.
    #[serde(default = "default_true")]
    pub index: bool,
}

fn default_boost() -> f32 {
    1.0
}

fn default_true() -> bool {
    true
}

impl Default for FieldConfig {
    fn default() -> Self {
        Self {
            boost: 1.0,
            store: true,
            index: true,
        }
    }
}

impl FieldConfig {
    /// A field with a custom boost, stored and indexed.
    pub fn boosted(boost: f32) -> Self {
        Self {
            boost: boost.max(0.0),
            ..Self::default()
        }
    }
}

/// Cooperative cancellation flag shared between a caller and a running
/// operation.
///
/// Storage checks the token between statement steps and row batches;
/// cancelled writes roll back, cancelled reads discard partial results.
/// Cloning is cheap and all clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a new, un-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation to every holder of this token.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Return a `TransactionAborted` error if cancellation was requested.
    pub(crate) fn check(&self) -> crate::Result<()> {
        if self.is_cancelled() {
            Err(crate::SearchError::TransactionAborted {
                reason: "operation cancelled".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

/// Aggregate statistics for one index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStats {
    /// Total rows in the documents table, chunks included.
    pub document_count: u64,
    /// Rows that are derived chunks rather than client documents.
    pub chunk_count: u64,
    /// Approximate on-disk size of the index's tables.
    pub size_bytes: u64,
    /// Mean byte length of stored content across all rows.
    pub avg_doc_length: f64,
}

/// One entry returned by `list_indices()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSummary {
    pub name: String,
    pub document_count: u64,
    /// Distinct non-null `language` values present in the index.
    pub languages: Vec<String>,
    /// Distinct `type` values present in the index.
    pub types: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::check;
    use rstest::rstest;

    #[rstest]
    #[case("articles", true)]
    #[case("_hidden", true)]
    #[case("en_posts_2", true)]
    #[case("A", true)]
    #[case("", false)]
    #[case("1st", false)]
    #[case("no-dashes", false)]
    #[case("no.dots", false)]
    #[case("no spaces", false)]
    fn test_index_name_validation(#[case] name: &str, #[case] ok: bool) {
        check!(IndexName::new(name).is_ok() == ok);
    }

    #[test]
    fn test_field_config_defaults() {
        let f = FieldConfig::default();
        check!(f.boost == 1.0);
        check!(f.store);
        check!(f.index);
    }

    #[test]
    fn test_field_config_negative_boost_clamps() {
        let f = FieldConfig::boosted(-2.0);
        check!(f.boost == 0.0);
    }

    #[test]
    fn test_cancel_token_shared_across_clones() {
        let token = CancelToken::new();
        let observer = token.clone();
        check!(!observer.is_cancelled());
        token.cancel();
        check!(observer.is_cancelled());
        check!(observer.check().is_err());
    }
}
