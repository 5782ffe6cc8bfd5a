//! The client-facing document model.

use crate::geo::{GeoBounds, GeoPoint};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};

/// Reserved metadata keys written by the indexer on chunk rows.
pub(crate) const META_IS_CHUNK: &str = "is_chunk";
pub(crate) const META_PARENT_ID: &str = "parent_id";
pub(crate) const META_CHUNKED: &str = "chunked";
pub(crate) const META_CHUNK_COUNT: &str = "chunks";
pub(crate) const META_CHUNK_INDEX: &str = "chunk_index";

/// A document to be indexed.
///
/// `content` maps configured field names to values; string values of
/// `index=true` fields participate in full-text matching. `metadata`
/// is arbitrary JSON used for filtering, faceting, and aggregations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Document {
    /// Unique id within the index. Generated when absent or empty.
    pub id: Option<String>,
    pub content: Map<String, Value>,
    pub metadata: Map<String, Value>,
    /// Language tag driving stemming and stop words (`en`, `french`, ...).
    pub language: Option<String>,
    #[serde(rename = "type")]
    pub doc_type: Option<String>,
    /// Unix seconds. Now when absent.
    pub timestamp: Option<i64>,
    pub geo_point: Option<GeoPoint>,
    pub geo_bounds: Option<GeoBounds>,
}

impl Document {
    /// Start a document with the given id.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    /// Set a content field (builder style).
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.content.insert(name.into(), value.into());
        self
    }

    /// Set a metadata attribute (builder style).
    #[must_use]
    pub fn meta(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(name.into(), value.into());
        self
    }

    /// Set the language tag (builder style).
    #[must_use]
    pub fn language(mut self, lang: impl Into<String>) -> Self {
        self.language = Some(lang.into());
        self
    }

    /// Set the geo point (builder style).
    #[must_use]
    pub fn at(mut self, point: GeoPoint) -> Self {
        self.geo_point = Some(point);
        self
    }

    /// Whether this row is a derived chunk rather than a client document.
    pub fn is_chunk(&self) -> bool {
        self.metadata
            .get(META_IS_CHUNK)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Parent id for chunk rows.
    pub fn parent_id(&self) -> Option<&str> {
        self.metadata.get(META_PARENT_ID).and_then(Value::as_str)
    }
}

/// Current time as unix seconds.
pub(crate) fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::check;
    use serde_json::json;

    #[test]
    fn test_builder_roundtrip() {
        let doc = Document::with_id("a1")
            .field("title", "Hello")
            .meta("price", 10)
            .language("en");
        check!(doc.id.as_deref() == Some("a1"));
        check!(doc.content["title"] == json!("Hello"));
        check!(doc.metadata["price"] == json!(10));
        check!(!doc.is_chunk());
    }

    #[test]
    fn test_chunk_markers() {
        let doc = Document::with_id("a1#chunk0")
            .meta(META_IS_CHUNK, true)
            .meta(META_PARENT_ID, "a1");
        check!(doc.is_chunk());
        check!(doc.parent_id() == Some("a1"));
    }

    #[test]
    fn test_deserializes_with_type_alias() {
        let doc: Document = serde_json::from_value(json!({
            "id": "x",
            "type": "product",
            "content": {"title": "Widget"}
        }))
        .unwrap();
        check!(doc.doc_type.as_deref() == Some("product"));
    }
}
