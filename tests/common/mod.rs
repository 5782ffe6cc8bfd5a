//! Shared test fixtures for integration tests.
//!
//! Each test gets a fresh temporary directory holding its own database
//! file and fuzzy-cache sidecars, so tests never share state. The
//! fixture keeps the `TempDir` alive for the facade's lifetime.

use quarry::{Document, FieldConfig, Quarry, SearchConfig};
use rstest::fixture;
use std::collections::BTreeMap;
use tempfile::TempDir;

/// A facade over a throwaway on-disk database.
#[allow(dead_code)] // Helpers are shared across integration test crates
pub struct TestIndex {
    pub quarry: Quarry,
    _temp: TempDir,
}

impl TestIndex {
    /// Build with a customized configuration. The storage path is
    /// always redirected into the temp directory.
    pub fn with_config(mut config: SearchConfig) -> Self {
        quarry::tracing::init_for_tests();
        let temp = TempDir::new().expect("create temp dir");
        config.storage.path = temp.path().join("search.db");
        let quarry = Quarry::new(config).expect("open quarry");
        Self {
            quarry,
            _temp: temp,
        }
    }
}

/// Field set used across the scenario tests: boosted title, plain body.
#[allow(dead_code)]
pub fn title_content_fields() -> BTreeMap<String, FieldConfig> {
    let mut fields = BTreeMap::new();
    fields.insert("title".to_string(), FieldConfig::boosted(3.0));
    fields.insert("content".to_string(), FieldConfig::default());
    fields
}

/// Default test fixture: default config, temp-dir database.
#[fixture]
pub fn test_index() -> TestIndex {
    TestIndex::with_config(SearchConfig::default())
}

/// Shorthand for a title-only document.
#[allow(dead_code)]
pub fn doc(id: &str, title: &str) -> Document {
    Document::with_id(id).field("title", title)
}

/// Shorthand for a title+content document.
#[allow(dead_code)]
pub fn doc_with_content(id: &str, title: &str, content: &str) -> Document {
    Document::with_id(id)
        .field("title", title)
        .field("content", content)
}
