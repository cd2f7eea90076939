//! Sort resolution against live field mappings.
//!
//! Analyzed text fields cannot be sorted or aggregated on, so a requested
//! sort or terms aggregation on such a field is redirected to its
//! not-analyzed `.keyword` sibling.

use catalog_search_shared::Sort;
use serde_json::{json, Map, Value};

use crate::errors::SearchIndexError;
use crate::interfaces::SearchBackend;
use crate::query::keyword_field;

/// Resolve a sort against the current mapping of the index.
///
/// Performs one field mapping round-trip. The result is not cached since
/// mappings can change at any time.
pub async fn resolve_sort(
    backend: &dyn SearchBackend,
    index: &str,
    sort: &Sort,
) -> Result<Vec<Value>, SearchIndexError> {
    if sort.is_empty() {
        return Ok(Vec::new());
    }
    let fields: Vec<String> = sort.fields().map(str::to_string).collect();
    let mapping = backend.get_field_mapping(index, &fields).await?;
    Ok(resolve_sort_with_mapping(sort, &mapping))
}

/// Field to run a terms aggregation on for `field`: its `.keyword` sibling
/// when the index maps it as text.
pub async fn not_analyzed_field(
    backend: &dyn SearchBackend,
    index: &str,
    field: &str,
) -> Result<String, SearchIndexError> {
    let mapping = backend.get_field_mapping(index, &[field.to_string()]).await?;
    Ok(if is_text_field(&mapping, field) {
        keyword_field(field)
    } else {
        field.to_string()
    })
}

/// Build the native sort clauses, suffixing text fields with `.keyword`.
///
/// Requested order and directions are preserved. Fields that are not mapped,
/// or mapped with another type, are used as given.
pub fn resolve_sort_with_mapping(sort: &Sort, mapping: &Value) -> Vec<Value> {
    sort.orders
        .iter()
        .map(|order| {
            let field = if is_text_field(mapping, &order.field) {
                keyword_field(&order.field)
            } else {
                order.field.clone()
            };
            let mut clause = Map::new();
            clause.insert(
                field,
                json!({ "order": if order.ascending { "asc" } else { "desc" } }),
            );
            Value::Object(clause)
        })
        .collect()
}

/// Returns true if any index of the mapping response maps `field` as text.
fn is_text_field(mapping: &Value, field: &str) -> bool {
    let Some(indices) = mapping.as_object() else {
        return false;
    };
    let leaf = field.rsplit('.').next().unwrap_or(field);
    indices.values().any(|index| {
        index
            .get("mappings")
            .and_then(|mappings| mappings.get(field))
            .and_then(|field_mapping| field_mapping.get("mapping"))
            .and_then(|mapping| mapping.get(leaf))
            .and_then(|leaf_mapping| leaf_mapping.get("type"))
            .and_then(Value::as_str)
            == Some("text")
    })
}
