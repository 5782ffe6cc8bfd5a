//! Per-index DDL construction.
//!
//! Each index owns four SQLite objects sharing one namespace:
//! `docs_<idx>` (row store), `fts_<idx>` (FTS5 virtual table),
//! `rtree_<idx>` (R-tree over bounding boxes), and `vocab_<idx>`
//! (fts5vocab view used for fuzzy candidates). Index names and field
//! names are validated identifiers, which is what makes interpolating
//! them into DDL safe — values always bind as parameters.

use crate::types::FieldConfig;
use std::collections::BTreeMap;

/// Name of the catalog table recording every index's configuration.
pub(crate) const CATALOG_TABLE: &str = "quarry_indices";

pub(crate) fn docs_table(index: &str) -> String {
    format!("docs_{index}")
}

pub(crate) fn fts_table(index: &str) -> String {
    format!("fts_{index}")
}

pub(crate) fn rtree_table(index: &str) -> String {
    format!("rtree_{index}")
}

pub(crate) fn vocab_table(index: &str) -> String {
    format!("vocab_{index}")
}

/// Validate a field name for use as an FTS5 column.
pub(crate) fn validate_field_name(name: &str) -> crate::Result<()> {
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
            "field",
            name,
            "must match [a-zA-Z_][a-zA-Z0-9_]*",
        ));
    }
    // Reserved by FTS5 itself.
    if name.eq_ignore_ascii_case("rowid") || name.eq_ignore_ascii_case("rank") {
        return Err(crate::SearchError::invalid_argument(
            "field",
            name,
            "collides with an FTS5 reserved column name",
        ));
    }
    Ok(())
}

/// The indexed (FTS-visible) columns of a field set, in stable order.
pub(crate) fn indexed_fields(fields: &BTreeMap<String, FieldConfig>) -> Vec<&str> {
    fields
        .iter()
        .filter(|(_, cfg)| cfg.index)
        .map(|(name, _)| name.as_str())
        .collect()
}

/// DDL for the catalog table.
pub(crate) fn catalog_ddl() -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {CATALOG_TABLE} (
            name TEXT PRIMARY KEY,
            fields TEXT NOT NULL,
            external_content INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )"
    )
}

/// Full DDL batch creating one index's tables.
pub(crate) fn create_index_ddl(
    index: &str,
    fields: &BTreeMap<String, FieldConfig>,
    external_content: bool,
) -> String {
    let docs = docs_table(index);
    let fts = fts_table(index);
    let rtree = rtree_table(index);
    let vocab = vocab_table(index);

    let fts_columns = indexed_fields(fields).join(", ");
    let fts_ddl = if external_content {
        format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS {fts} USING fts5(
                {fts_columns},
                content='{docs}',
                content_rowid='doc_id',
                tokenize='unicode61'
            );"
        )
    } else {
        format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS {fts} USING fts5(
                {fts_columns},
                tokenize='unicode61'
            );"
        )
    };

    format!(
        "CREATE TABLE IF NOT EXISTS {docs} (
            doc_id INTEGER PRIMARY KEY,
            ext_id TEXT NOT NULL UNIQUE,
            language TEXT,
            type TEXT NOT NULL DEFAULT 'default',
            timestamp INTEGER NOT NULL,
            content TEXT NOT NULL DEFAULT '{{}}',
            metadata TEXT NOT NULL DEFAULT '{{}}',
            index_text TEXT NOT NULL DEFAULT '{{}}',
            geo_lat REAL,
            geo_lng REAL,
            indexed_at INTEGER NOT NULL
        );
        {fts_ddl}
        CREATE VIRTUAL TABLE IF NOT EXISTS {rtree} USING rtree(
            doc_id, min_lat, max_lat, min_lng, max_lng
        );
        CREATE VIRTUAL TABLE IF NOT EXISTS {vocab} USING fts5vocab('{fts}', 'row');"
    )
}

/// DDL batch dropping one index's tables.
pub(crate) fn drop_index_ddl(index: &str) -> String {
    format!(
        "DROP TABLE IF EXISTS {vocab};
         DROP TABLE IF EXISTS {fts};
         DROP TABLE IF EXISTS {rtree};
         DROP TABLE IF EXISTS {docs};",
        vocab = vocab_table(index),
        fts = fts_table(index),
        rtree = rtree_table(index),
        docs = docs_table(index),
    )
}
