//! Centralized error handling with typed error enums.
//!
//! This module provides structured error types for all public search
//! operations. Errors are designed to:
//! - Provide detailed context via Debug for logging (`{:?}`)
//! - Provide deterministic, user-facing messages via Display (`{}`)
//! - Enable pattern matching for programmatic error handling
//!
//! Read-path errors surface to the caller. Per-document errors inside a
//! batch are collected into a [`BatchOutcome`](crate::indexer::BatchOutcome)
//! while the batch continues. Cache-layer errors never fail an operation.

use thiserror::Error;

/// A specialized Result type for quarry operations.
pub type Result<T> = std::result::Result<T, SearchError>;

/// Primary error type for all public search operations.
#[derive(Debug, Error)]
pub enum SearchError {
    /// Input validation failed (out-of-range latitude, negative limit,
    /// empty index name, malformed field path, ...). Recoverable at the
    /// call site.
    #[error("invalid argument '{field}': {reason} (got '{value}')")]
    InvalidArgument {
        field: &'static str,
        value: String,
        reason: String,
    },

    /// Operation against an index that does not exist. `search` and
    /// `count` return empty results instead of this error; mutating
    /// operations surface it unless documented to auto-create.
    #[error("index '{name}' does not exist")]
    IndexNotFound { name: String },

    /// `create_index` against an existing index with a different field
    /// configuration.
    #[error("index '{name}' already exists with a different field configuration")]
    IndexExistsConflict { name: String },

    /// `update` called on a document without an id.
    #[error("update requires a document id")]
    MissingId,

    /// Underlying SQL or file I/O error. Transient variants (locked,
    /// busy) are retried internally before this surfaces.
    #[error("storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// A write batch was rolled back. The caller may retry the batch.
    #[error("transaction aborted: {reason}")]
    TransactionAborted { reason: String },

    /// The fuzzy vocabulary could not be read. Non-fatal: searches
    /// continue without fuzzy expansion.
    #[error("fuzzy matching unavailable: {reason}")]
    FuzzyUnavailable { reason: String },

    /// The analyzer rejected a document or query (e.g. invalid UTF-8 in
    /// a text field). Skipped in batches, surfaced for single documents.
    #[error("analyzer error: {reason}")]
    Analyzer { reason: String },
}

impl SearchError {
    /// Create a storage error from a message.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Create a storage error with an underlying cause.
    pub fn storage_with_source(message: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create an invalid-argument error for `field` with the observed
    /// `value` and a reason.
    pub fn invalid_argument(
        field: &'static str,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidArgument {
            field,
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether the operation that produced this error is worth retrying
    /// unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransactionAborted { .. })
    }

    /// Get optional help text for this error.
    ///
    /// Returns additional guidance for resolving the error, if available.
    pub fn help(&self) -> Option<&'static str> {
        match self {
            Self::InvalidArgument { .. } => Some(
                "Check the argument against its documented range or format:\n\
                 • index names match [a-zA-Z_][a-zA-Z0-9_]*\n\
                 • latitudes lie in [-90, 90], longitudes in [-180, 180]\n\
                 • limits and offsets are non-negative",
            ),
            Self::IndexNotFound { .. } => {
                Some("Use list_indices() to see available indices, or create_index() first.")
            }
            Self::IndexExistsConflict { .. } => Some(
                "The field set of an index is fixed at creation.\n\
                 Drop and recreate the index to change its fields.",
            ),
            Self::MissingId => Some("Set the document's id before calling update()."),
            Self::Storage { .. } => Some(
                "Ensure the database file is writable and not held by another process.\n\
                 Busy/locked conditions are retried automatically before surfacing.",
            ),
            Self::TransactionAborted { .. } => {
                Some("No partial writes were made. The batch can be retried as-is.")
            }
            Self::FuzzyUnavailable { .. } => Some(
                "Results were returned without typo tolerance.\n\
                 The term vocabulary rebuilds itself on the next successful write.",
            ),
            Self::Analyzer { .. } => Some("Text fields must be valid UTF-8 strings."),
        }
    }

    /// Get a user-friendly message with optional help text appended.
    pub fn user_message(&self) -> String {
        match self.help() {
            Some(help) => format!("{self}\n\n{help}"),
            None => self.to_string(),
        }
    }
}

impl From<rusqlite::Error> for SearchError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage {
            message: e.to_string(),
            source: Some(e.into()),
        }
    }
}

impl From<std::io::Error> for SearchError {
    fn from(e: std::io::Error) -> Self {
        Self::Storage {
            message: format!("I/O error: {e}"),
            source: Some(e.into()),
        }
    }
}

impl From<serde_json::Error> for SearchError {
    fn from(e: serde_json::Error) -> Self {
        Self::Storage {
            message: format!("JSON serialization failed: {e}"),
            source: Some(e.into()),
        }
    }
}
