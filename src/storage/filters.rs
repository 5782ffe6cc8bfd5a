//! Compilation of metadata predicates into SQL fragments.
//!
//! Field paths resolve either to document-table columns (`id`,
//! `language`, `type`, `timestamp`) or to JSON extraction over the
//! `metadata`/`content` columns. JSON paths are passed to SQLite as
//! bound parameters, never interpolated, so arbitrary client field
//! names are safe.

use crate::query::{Filter, FilterOp};
use rusqlite::types::Value as SqlValue;
use serde_json::Value;

/// A compiled WHERE fragment with its positional parameters.
#[derive(Debug, Default)]
pub(crate) struct SqlPredicate {
    pub clause: String,
    pub params: Vec<SqlValue>,
}

/// Where a filter's field path points.
enum FieldTarget {
    /// A real column on the documents table (alias `d`).
    Column(&'static str),
    /// json_extract over a JSON column with a `$.…` path.
    Json { column: &'static str, path: String },
}

impl FieldTarget {
    /// SQL expression reading the field value. JSON paths bind as a
    /// parameter pushed by the caller.
    fn value_expr(&self) -> String {
        match self {
            Self::Column(col) => format!("d.{col}"),
            Self::Json { column, .. } => format!("json_extract(d.{column}, ?)"),
        }
    }

    fn push_path_param(&self, params: &mut Vec<SqlValue>) {
        if let Self::Json { path, .. } = self {
            params.push(SqlValue::Text(path.clone()));
        }
    }
}

/// Resolve a filter field path.
fn resolve_field(path: &str) -> crate::Result<FieldTarget> {
    match path {
        "id" => return Ok(FieldTarget::Column("ext_id")),
        "language" => return Ok(FieldTarget::Column("language")),
        "type" => return Ok(FieldTarget::Column("type")),
        "timestamp" => return Ok(FieldTarget::Column("timestamp")),
        _ => {}
    }

    let (column, rest) = path
        .split_once('.')
        .filter(|(root, rest)| !rest.is_empty() && matches!(*root, "metadata" | "content"))
        .ok_or_else(|| {
            crate::SearchError::invalid_argument(
                "filter.field",
                path,
                "must be id|language|type|timestamp or start with metadata./content.",
            )
        })?;

    for segment in rest.split('.') {
        let valid = !segment.is_empty()
            && segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(crate::SearchError::invalid_argument(
                "filter.field",
                path,
                format!("path segment '{segment}' contains unsupported characters"),
            ));
        }
    }

    Ok(FieldTarget::Json {
        column: if column == "metadata" { "metadata" } else { "content" },
        path: format!("$.{rest}"),
    })
}

/// Convert a JSON scalar to a bindable SQL value. Booleans become 0/1
/// integers to match SQLite's JSON1 extraction behavior; arrays and
/// objects bind as their JSON text.
fn bind_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqlValue::Integer(i)
            } else {
                SqlValue::Real(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// Compile one filter into a parenthesized SQL condition.
fn compile_filter(filter: &Filter, out: &mut SqlPredicate) -> crate::Result<()> {
    let target = resolve_field(&filter.field)?;
    let expr = target.value_expr();

    let clause = match filter.op {
        FilterOp::Eq => {
            target.push_path_param(&mut out.params);
            out.params.push(bind_value(&filter.value));
            format!("{expr} = ?")
        }
        FilterOp::Ne => {
            target.push_path_param(&mut out.params);
            out.params.push(bind_value(&filter.value));
            format!("{expr} != ?")
        }
        FilterOp::Lt | FilterOp::Le | FilterOp::Gt | FilterOp::Ge => {
            let op = match filter.op {
                FilterOp::Lt => "<",
                FilterOp::Le => "<=",
                FilterOp::Gt => ">",
                _ => ">=",
            };
            target.push_path_param(&mut out.params);
            out.params.push(bind_value(&filter.value));
            format!("CAST({expr} AS REAL) {op} CAST(? AS REAL)")
        }
        FilterOp::In | FilterOp::NotIn => {
            let Value::Array(items) = &filter.value else {
                return Err(crate::SearchError::invalid_argument(
                    "filter.value",
                    &filter.value,
                    "'in'/'not in' require a list operand",
                ));
            };
            if items.is_empty() {
                return Err(crate::SearchError::invalid_argument(
                    "filter.value",
                    &filter.value,
                    "'in'/'not in' require a non-empty list",
                ));
            }
            target.push_path_param(&mut out.params);
            for item in items {
                out.params.push(bind_value(item));
            }
            let placeholders = vec!["?"; items.len()].join(", ");
            let kw = if filter.op == FilterOp::In { "IN" } else { "NOT IN" };
            format!("{expr} {kw} ({placeholders})")
        }
        FilterOp::Contains => {
            target.push_path_param(&mut out.params);
            out.params.push(bind_value(&filter.value));
            format!("instr(lower(CAST({expr} AS TEXT)), lower(?)) > 0")
        }
        FilterOp::Like => {
            target.push_path_param(&mut out.params);
            out.params.push(bind_value(&filter.value));
            format!("{expr} LIKE ?")
        }
        FilterOp::Exists => match &target {
            FieldTarget::Column(_) => format!("{expr} IS NOT NULL"),
            FieldTarget::Json { column, path } => {
                // json_extract is NULL both for an absent path and a JSON
                // null; json_type distinguishes them.
                out.params.push(SqlValue::Text(path.clone()));
                out.params.push(SqlValue::Text(path.clone()));
                format!(
                    "json_type(d.{column}, ?) IS NOT NULL AND json_type(d.{column}, ?) != 'null'"
                )
            }
        },
        FilterOp::EqOrNull => {
            target.push_path_param(&mut out.params);
            out.params.push(bind_value(&filter.value));
            target.push_path_param(&mut out.params);
            format!("({expr} = ? OR {expr} IS NULL)")
        }
    };

    out.clause.push('(');
    out.clause.push_str(&clause);
    out.clause.push(')');
    Ok(())
}

/// SQL expression (plus bound parameters) reading a field value, for
/// facet grouping and aggregations.
pub(crate) fn field_value_expr(path: &str) -> crate::Result<(String, Vec<SqlValue>)> {
    let target = resolve_field(path)?;
    let mut params = Vec::new();
    target.push_path_param(&mut params);
    Ok((target.value_expr(), params))
}

/// Compile a filter list into one AND-joined predicate. An empty list
/// yields an empty clause.
pub(crate) fn compile_filters(filters: &[Filter]) -> crate::Result<SqlPredicate> {
    let mut out = SqlPredicate::default();
    for (i, filter) in filters.iter().enumerate() {
        if i > 0 {
            out.clause.push_str(" AND ");
        }
        compile_filter(filter, &mut out)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::check;
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn test_column_equality() {
        let p = compile_filters(&[Filter::new("type", FilterOp::Eq, "product")]).unwrap();
        check!(p.clause == "(d.type = ?)");
        check!(p.params == vec![SqlValue::Text("product".to_string())]);
    }

    #[test]
    fn test_id_maps_to_ext_id() {
        let p = compile_filters(&[Filter::new("id", FilterOp::Eq, "a1")]).unwrap();
        check!(p.clause.contains("d.ext_id"));
    }

    #[test]
    fn test_metadata_path_binds_as_parameter() {
        let p = compile_filters(&[Filter::new("metadata.price", FilterOp::Lt, 500)]).unwrap();
        check!(p.clause == "(CAST(json_extract(d.metadata, ?) AS REAL) < CAST(? AS REAL))");
        check!(p.params[0] == SqlValue::Text("$.price".to_string()));
        check!(p.params[1] == SqlValue::Integer(500));
    }

    #[test]
    fn test_nested_path() {
        let p =
            compile_filters(&[Filter::new("metadata.specs.weight", FilterOp::Ge, 1.5)]).unwrap();
        check!(p.params[0] == SqlValue::Text("$.specs.weight".to_string()));
        check!(p.params[1] == SqlValue::Real(1.5));
    }

    #[test]
    fn test_in_expands_placeholders() {
        let p = compile_filters(&[Filter::new(
            "metadata.price",
            FilterOp::In,
            json!([299.99, 750]),
        )])
        .unwrap();
        check!(p.clause == "(json_extract(d.metadata, ?) IN (?, ?))");
        check!(p.params.len() == 3);
    }

    #[test]
    fn test_in_requires_list() {
        check!(compile_filters(&[Filter::new("metadata.price", FilterOp::In, 5)]).is_err());
        check!(compile_filters(&[Filter::new("metadata.price", FilterOp::In, json!([]))]).is_err());
    }

    #[test]
    fn test_exists_uses_json_type() {
        let p = compile_filters(&[Filter::new(
            "metadata.brand",
            FilterOp::Exists,
            Value::Null,
        )])
        .unwrap();
        check!(p.clause.contains("json_type"));
        check!(p.clause.contains("!= 'null'"));
    }

    #[test]
    fn test_eq_or_null() {
        let p = compile_filters(&[Filter::new("metadata.stock", FilterOp::EqOrNull, 0)]).unwrap();
        check!(p.clause.contains("IS NULL"));
        // Path bound twice: once per json_extract occurrence.
        check!(p.params.len() == 3);
    }

    #[test]
    fn test_multiple_filters_join_with_and() {
        let p = compile_filters(&[
            Filter::new("type", FilterOp::Eq, "product"),
            Filter::new("metadata.price", FilterOp::Gt, 10),
        ])
        .unwrap();
        check!(p.clause.contains(") AND ("));
    }

    #[rstest]
    #[case("unknown_root")]
    #[case("metadata.")]
    #[case("metadata.bad segment")]
    #[case("metadata.inj'ect")]
    #[case("secrets.key")]
    fn test_invalid_paths_rejected(#[case] path: &str) {
        check!(compile_filters(&[Filter::new(path, FilterOp::Eq, 1)]).is_err());
    }

    #[test]
    fn test_bool_binds_as_integer() {
        let p = compile_filters(&[Filter::new("metadata.active", FilterOp::Eq, true)]).unwrap();
        check!(p.params[1] == SqlValue::Integer(1));
    }
}
