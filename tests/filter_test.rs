//! Metadata predicates, geo constraints, facets, aggregations, and
//! custom sorts through the public facade.

mod common;

use assert2::check;
use common::{TestIndex, doc, test_index, title_content_fields};
use quarry::{
    Aggregation, AggregationKind, Document, FacetOptions, Filter, FilterOp, GeoBounds, GeoPoint,
    SearchQuery, Sort, SortOrder,
};
use rstest::rstest;
use serde_json::json;

fn product(id: &str, title: &str, price: f64, brand: Option<&str>) -> Document {
    let mut doc = Document::with_id(id)
        .field("title", title)
        .meta("price", price);
    if let Some(brand) = brand {
        doc = doc.meta("brand", brand);
    }
    doc
}

fn seed_products(fixture: &mut TestIndex) {
    let q = &mut fixture.quarry;
    q.create_index_with_fields("products", title_content_fields())
        .unwrap();
    q.index("products", product("cheap", "Basic widget", 150.0, Some("acme")))
        .unwrap();
    q.index(
        "products",
        product("mid", "Standard widget", 299.99, Some("acme")),
    )
    .unwrap();
    q.index("products", product("dear", "Premium widget", 750.0, None))
        .unwrap();
}

#[rstest]
fn numeric_comparison_filters(mut test_index: TestIndex) {
    seed_products(&mut test_index);
    let q = &mut test_index.quarry;

    let under_500 = q
        .search(
            "products",
            &SearchQuery::new("widget")
                .with_fuzzy(false)
                .with_filter(Filter::new("metadata.price", FilterOp::Lt, 500)),
        )
        .unwrap();
    check!(under_500.total == 2);

    let in_set = q
        .search(
            "products",
            &SearchQuery::new("widget")
                .with_fuzzy(false)
                .with_filter(Filter::new(
                    "metadata.price",
                    FilterOp::In,
                    json!([299.99, 750]),
                )),
        )
        .unwrap();
    check!(in_set.total == 2);

    let branded = q
        .search(
            "products",
            &SearchQuery::new("widget")
                .with_fuzzy(false)
                .with_filter(Filter::new(
                    "metadata.brand",
                    FilterOp::Exists,
                    serde_json::Value::Null,
                )),
        )
        .unwrap();
    check!(branded.total == 2);
    check!(branded.results.iter().all(|h| h.metadata.contains_key("brand")));
}

#[rstest]
fn contains_and_like_filters(mut test_index: TestIndex) {
    seed_products(&mut test_index);
    let q = &mut test_index.quarry;

    let contains = q
        .search(
            "products",
            &SearchQuery::new("")
                .with_filter(Filter::new("metadata.brand", FilterOp::Contains, "CM")),
        )
        .unwrap();
    check!(contains.total == 2, "contains is case-insensitive substring");

    let like = q
        .search(
            "products",
            &SearchQuery::new("")
                .with_filter(Filter::new("metadata.brand", FilterOp::Like, "ac%")),
        )
        .unwrap();
    check!(like.total == 2);
}

#[rstest]
fn eq_or_null_is_tri_valued(mut test_index: TestIndex) {
    seed_products(&mut test_index);
    let q = &mut test_index.quarry;

    let results = q
        .search(
            "products",
            &SearchQuery::new("")
                .with_filter(Filter::new("metadata.brand", FilterOp::EqOrNull, "acme")),
        )
        .unwrap();
    // Matches the two acme products plus the brandless one.
    check!(results.total == 3);
}

#[rstest]
fn type_and_timestamp_columns(mut test_index: TestIndex) {
    let q = &mut test_index.quarry;
    q.create_index_with_fields("events", title_content_fields())
        .unwrap();
    let mut old = doc("old", "Old event");
    old.doc_type = Some("meeting".to_string());
    old.timestamp = Some(1_600_000_000);
    let mut new = doc("new", "New event");
    new.doc_type = Some("party".to_string());
    new.timestamp = Some(1_700_000_000);
    q.index("events", old).unwrap();
    q.index("events", new).unwrap();

    let meetings = q
        .search(
            "events",
            &SearchQuery::new("").with_filter(Filter::new("type", FilterOp::Eq, "meeting")),
        )
        .unwrap();
    check!(meetings.total == 1);
    check!(meetings.results[0].id == "old");

    let recent = q
        .search(
            "events",
            &SearchQuery::new("").with_filter(Filter::new(
                "timestamp",
                FilterOp::Gt,
                1_650_000_000,
            )),
        )
        .unwrap();
    check!(recent.total == 1);
    check!(recent.results[0].id == "new");
}

/// Geo near: exact radius semantics and ascending distance order.
#[rstest]
fn geo_near_and_distance_sort(mut test_index: TestIndex) {
    let q = &mut test_index.quarry;
    q.create_index_with_fields("cities", title_content_fields())
        .unwrap();
    let portland = GeoPoint::new(45.5152, -122.6784).unwrap();
    let seattle = GeoPoint::new(47.6062, -122.3321).unwrap();
    q.index("cities", doc("pdx", "Portland").at(portland)).unwrap();
    q.index("cities", doc("sea", "Seattle").at(seattle)).unwrap();

    let close = q
        .search("cities", &SearchQuery::new("").near(portland, 10_000.0))
        .unwrap();
    check!(close.total == 1);
    check!(close.results[0].id == "pdx");

    let wide = q
        .search(
            "cities",
            &SearchQuery::new("")
                .near(portland, 300_000.0)
                .sort_by_distance(portland, SortOrder::Asc),
        )
        .unwrap();
    check!(wide.total == 2);
    check!(wide.results[0].id == "pdx");
    check!(wide.results[1].id == "sea");

    let d0 = wide.results[0].distance.unwrap();
    let d1 = wide.results[1].distance.unwrap();
    check!(d0 < 1_000.0);
    check!((d1 - 233_000.0).abs() < 5_000.0, "Seattle at {d1} m");
}

/// Geo within: R-tree overlap, including a date-line-crossing box.
#[rstest]
fn geo_within_bounds(mut test_index: TestIndex) {
    let q = &mut test_index.quarry;
    q.create_index_with_fields("places", title_content_fields())
        .unwrap();
    let fiji = GeoPoint::new(-17.7134, 178.0650).unwrap();
    let samoa = GeoPoint::new(-13.7590, -172.1046).unwrap();
    let london = GeoPoint::new(51.5074, -0.1278).unwrap();
    q.index("places", doc("fiji", "Fiji").at(fiji)).unwrap();
    q.index("places", doc("samoa", "Samoa").at(samoa)).unwrap();
    q.index("places", doc("london", "London").at(london)).unwrap();

    // Box crossing the antimeridian: 170°E .. 170°W, southern latitudes.
    let mut query = SearchQuery::new("");
    query.geo.within = Some(GeoBounds::new(0.0, -30.0, -170.0, 170.0).unwrap());
    let results = q.search("places", &query).unwrap();

    let ids: Vec<&str> = results.results.iter().map(|h| h.id.as_str()).collect();
    check!(ids.contains(&"fiji"));
    check!(ids.contains(&"samoa"));
    check!(!ids.contains(&"london"));
}

#[rstest]
fn facets_count_metadata_values(mut test_index: TestIndex) {
    seed_products(&mut test_index);
    let q = &mut test_index.quarry;

    let mut query = SearchQuery::new("widget").with_fuzzy(false);
    query
        .facets
        .insert("metadata.brand".to_string(), FacetOptions::default());
    let results = q.search("products", &query).unwrap();

    let brand_facet = &results.facets["metadata.brand"];
    check!(brand_facet.len() == 1);
    check!(brand_facet[0].value == "acme");
    check!(brand_facet[0].count == 2);
}

#[rstest]
fn facet_min_count_prunes_rare_values(mut test_index: TestIndex) {
    seed_products(&mut test_index);
    let q = &mut test_index.quarry;
    q.index(
        "products",
        product("one_off", "Oddball widget", 10.0, Some("nocorp")),
    )
    .unwrap();

    let mut query = SearchQuery::new("widget").with_fuzzy(false);
    query.facets.insert(
        "metadata.brand".to_string(),
        FacetOptions {
            limit: 10,
            min_count: 2,
        },
    );
    let results = q.search("products", &query).unwrap();
    let brand_facet = &results.facets["metadata.brand"];
    check!(brand_facet.iter().all(|v| v.value != "nocorp"));
    check!(brand_facet.iter().any(|v| v.value == "acme"));
}

#[rstest]
fn aggregations_over_numeric_field(mut test_index: TestIndex) {
    seed_products(&mut test_index);
    let q = &mut test_index.quarry;

    let mut query = SearchQuery::new("widget").with_fuzzy(false);
    query.aggregations.insert(
        "max_price".to_string(),
        Aggregation {
            kind: AggregationKind::Max,
            field: "metadata.price".to_string(),
        },
    );
    query.aggregations.insert(
        "avg_price".to_string(),
        Aggregation {
            kind: AggregationKind::Avg,
            field: "metadata.price".to_string(),
        },
    );
    let results = q.search("products", &query).unwrap();

    check!(results.aggregations["max_price"] == json!(750.0));
    let avg = results.aggregations["avg_price"].as_f64().unwrap();
    check!((avg - 400.0).abs() < 1.0);
}

#[rstest]
fn custom_sort_overrides_score_order(mut test_index: TestIndex) {
    seed_products(&mut test_index);
    let q = &mut test_index.quarry;

    let mut query = SearchQuery::new("widget").with_fuzzy(false);
    query.sort = vec![Sort {
        field: "metadata.price".to_string(),
        order: SortOrder::Asc,
    }];
    let results = q.search("products", &query).unwrap();
    let ids: Vec<&str> = results.results.iter().map(|h| h.id.as_str()).collect();
    check!(ids == vec!["cheap", "mid", "dear"]);
}

/// Field projection restricts the returned document map.
#[rstest]
fn field_projection(mut test_index: TestIndex) {
    seed_products(&mut test_index);
    let q = &mut test_index.quarry;

    let mut query = SearchQuery::new("widget").with_fuzzy(false);
    query.fields = vec!["title".to_string()];
    let results = q.search("products", &query).unwrap();
    for hit in &results.results {
        check!(hit.document.contains_key("title"));
        check!(hit.document.len() == 1);
    }
}
