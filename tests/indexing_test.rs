//! Indexing lifecycle: round-trips, updates, deletes, chunking, and
//! batch failure semantics.

mod common;

use assert2::check;
use common::{TestIndex, doc, doc_with_content, test_index, title_content_fields};
use quarry::{Document, Filter, FilterOp, SearchConfig, SearchQuery};
use rstest::rstest;
use serde_json::json;

/// A stored document comes back intact through an id filter.
#[rstest]
fn round_trip_by_id_filter(mut test_index: TestIndex) {
    let q = &mut test_index.quarry;
    q.create_index_with_fields("idx", title_content_fields())
        .unwrap();
    q.index(
        "idx",
        Document::with_id("a1")
            .field("title", "Round trip")
            .field("content", "The stored body survives unchanged.")
            .meta("shelf", "b3"),
    )
    .unwrap();

    let results = q
        .search(
            "idx",
            &SearchQuery::new("").with_filter(Filter::new("id", FilterOp::Eq, "a1")),
        )
        .unwrap();
    check!(results.total == 1);
    let hit = &results.results[0];
    check!(hit.id == "a1");
    check!(hit.document["title"] == json!("Round trip"));
    check!(hit.document["content"] == json!("The stored body survives unchanged."));
    check!(hit.metadata["shelf"] == json!("b3"));
}

/// Deleting a document removes it and every chunk; counts shrink by
/// exactly `1 + chunks`.
#[test]
fn delete_completeness_with_chunks() {
    let mut config = SearchConfig::default();
    config.indexer.chunk_size = 500;
    config.indexer.chunk_overlap = 50;
    let mut fixture = TestIndex::with_config(config);
    let q = &mut fixture.quarry;
    q.create_index_with_fields("idx", title_content_fields())
        .unwrap();

    let body = (0..60)
        .map(|i| format!("Sentence {i} about starships and their engines."))
        .collect::<Vec<_>>()
        .join(" ");
    q.index("idx", doc_with_content("big", "Starship manual", &body))
        .unwrap();
    q.index("idx", doc("small", "Unrelated note")).unwrap();

    let before = q.stats("idx").unwrap();
    check!(before.chunk_count > 0);

    let removed = q.delete("idx", "big").unwrap();
    check!(removed == 1 + before.chunk_count);

    let after = q.stats("idx").unwrap();
    check!(after.document_count == 1);
    check!(after.chunk_count == 0);

    let results = q
        .search("idx", &SearchQuery::new("starships").with_fuzzy(false))
        .unwrap();
    check!(results.total == 0);
}

/// Updating twice with the same document leaves one identical row.
#[rstest]
fn update_is_idempotent(mut test_index: TestIndex) {
    let q = &mut test_index.quarry;
    q.create_index_with_fields("idx", title_content_fields())
        .unwrap();
    let document = Document::with_id("a")
        .field("title", "Stable title")
        .meta("rev", 7);

    q.index("idx", document.clone()).unwrap();
    q.update("idx", document.clone()).unwrap();
    q.update("idx", document).unwrap();

    check!(q.stats("idx").unwrap().document_count == 1);
    let results = q
        .search("idx", &SearchQuery::new("stable").with_fuzzy(false))
        .unwrap();
    check!(results.total == 1);
    check!(results.results[0].metadata["rev"] == json!(7));
}

/// Update without an id is rejected with a missing-id error.
#[rstest]
fn update_requires_id(mut test_index: TestIndex) {
    let q = &mut test_index.quarry;
    q.create_index_with_fields("idx", title_content_fields())
        .unwrap();
    let err = q
        .update("idx", Document::default().field("title", "No id"))
        .unwrap_err();
    check!(matches!(err, quarry::SearchError::MissingId));
}

/// A phrase buried deep in a chunked document is found, the parent
/// appears exactly once, and its score is positive.
#[test]
fn chunking_recall_deep_phrase() {
    let mut config = SearchConfig::default();
    config.indexer.chunk_size = 1000;
    config.indexer.chunk_overlap = 100;
    let mut fixture = TestIndex::with_config(config);
    let q = &mut fixture.quarry;
    q.create_index_with_fields("idx", title_content_fields())
        .unwrap();

    // ~3,500 bytes; the marker phrase sits near byte 2,300.
    let filler = |n: usize| {
        (0..n)
            .map(|i| format!("Plain sentence {i} fills space with ordinary words."))
            .collect::<Vec<_>>()
            .join(" ")
    };
    let body = format!(
        "{} The kyber crystal resonates here. {}",
        filler(46),
        filler(24)
    );
    check!(body.len() > 3_000);
    q.index("idx", doc_with_content("manual", "Crystal guide", &body))
        .unwrap();

    let results = q
        .search("idx", &SearchQuery::new("kyber crystal").with_fuzzy(false))
        .unwrap();
    let manual_hits = results
        .results
        .iter()
        .filter(|h| h.id == "manual")
        .count();
    check!(manual_hits == 1, "parent must appear exactly once");
    check!(results.results[0].score > 0.0);
    // No raw chunk ids leak into results.
    check!(results.results.iter().all(|h| !h.id.contains("#chunk")));
}

/// Per-document failures in a batch are collected while the rest of the
/// batch goes through.
#[rstest]
fn batch_collects_failures_and_continues(mut test_index: TestIndex) {
    let q = &mut test_index.quarry;
    q.create_index_with_fields("idx", title_content_fields())
        .unwrap();
    let outcome = q
        .index_batch(
            "idx",
            vec![
                doc("ok1", "First fine document"),
                Document::with_id("bad#chunk9").field("title", "Reserved id"),
                doc("ok2", "Second fine document"),
            ],
        )
        .unwrap();

    check!(outcome.indexed == 2);
    check!(outcome.failures.len() == 1);
    check!(outcome.failures[0].0 == "bad#chunk9");
    check!(q.stats("idx").unwrap().document_count == 2);
}

/// Auto-created indices (first write) use the configured default
/// fields and show up in the catalog.
#[rstest]
fn index_auto_creation_on_first_write(mut test_index: TestIndex) {
    let q = &mut test_index.quarry;
    q.index("fresh", doc("a", "First document")).unwrap();

    let indices = q.list_indices().unwrap();
    let entry = indices.iter().find(|i| i.name == "fresh").unwrap();
    check!(entry.document_count == 1);

    let results = q
        .search("fresh", &SearchQuery::new("first").with_fuzzy(false))
        .unwrap();
    check!(results.total == 1);
}

/// clear() empties the index but keeps it usable with the same fields.
#[rstest]
fn clear_keeps_index_usable(mut test_index: TestIndex) {
    let q = &mut test_index.quarry;
    q.create_index_with_fields("idx", title_content_fields())
        .unwrap();
    q.index("idx", doc("a", "Before clear")).unwrap();
    q.clear("idx").unwrap();
    check!(q.stats("idx").unwrap().document_count == 0);

    q.index("idx", doc("b", "Second life")).unwrap();
    let results = q
        .search("idx", &SearchQuery::new("second").with_fuzzy(false))
        .unwrap();
    check!(results.total == 1);
    check!(results.results[0].id == "b");
}

/// rebuild() replaces the whole corpus as one logical operation.
#[rstest]
fn rebuild_replaces_corpus(mut test_index: TestIndex) {
    let q = &mut test_index.quarry;
    q.create_index_with_fields("idx", title_content_fields())
        .unwrap();
    q.index("idx", doc("old", "Obsolete entry")).unwrap();

    let outcome = q
        .rebuild(
            "idx",
            vec![doc("n1", "Fresh entry one"), doc("n2", "Fresh entry two")],
        )
        .unwrap();
    check!(outcome.indexed == 2);

    check!(q.stats("idx").unwrap().document_count == 2);
    let gone = q
        .search("idx", &SearchQuery::new("obsolete").with_fuzzy(false))
        .unwrap();
    check!(gone.total == 0);
}

/// drop_index removes tables and the catalog entry; the name becomes
/// searchable-as-empty again.
#[rstest]
fn drop_index_removes_everything(mut test_index: TestIndex) {
    let q = &mut test_index.quarry;
    q.create_index_with_fields("gone", title_content_fields())
        .unwrap();
    q.index("gone", doc("a", "Ephemeral")).unwrap();
    q.drop_index("gone").unwrap();

    check!(q.list_indices().unwrap().iter().all(|i| i.name != "gone"));
    let results = q.search("gone", &SearchQuery::new("ephemeral")).unwrap();
    check!(results.total == 0);
}

/// Whitespace-only content indexes without error and matches nothing.
#[rstest]
fn whitespace_only_document(mut test_index: TestIndex) {
    let q = &mut test_index.quarry;
    q.create_index_with_fields("idx", title_content_fields())
        .unwrap();
    q.index("idx", doc_with_content("blank", "   ", " \n\t "))
        .unwrap();
    check!(q.stats("idx").unwrap().document_count == 1);
    let results = q.search("idx", &SearchQuery::new("anything")).unwrap();
    check!(results.total == 0);
}

/// A document with none of the configured fields still stores its
/// content and is reachable by filter.
#[rstest]
fn document_without_configured_fields(mut test_index: TestIndex) {
    let q = &mut test_index.quarry;
    q.create_index_with_fields("idx", title_content_fields())
        .unwrap();
    q.index(
        "idx",
        Document::with_id("odd").field("unconfigured", "value"),
    )
    .unwrap();

    let results = q
        .search(
            "idx",
            &SearchQuery::new("").with_filter(Filter::new("id", FilterOp::Eq, "odd")),
        )
        .unwrap();
    check!(results.total == 1);
    check!(results.results[0].document["unconfigured"] == json!("value"));
}
