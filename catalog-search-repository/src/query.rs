//! Translation of criterion trees into the OpenSearch query DSL.

use std::ops::Bound;

use catalog_search_shared::{fields, Criterion, MatchType, StringMatchType};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};

/// Translate a criterion tree into a native query.
///
/// Total over every criterion variant. Composites translate their children
/// first and combine them with a `bool` query.
pub fn translate(criterion: &Criterion) -> Value {
    match criterion {
        Criterion::Empty => json!({ "match_all": {} }),
        Criterion::Not(inner) => json!({ "bool": { "must_not": [translate(inner)] } }),
        Criterion::And(children) => {
            let must: Vec<Value> = children.iter().map(translate).collect();
            json!({ "bool": { "must": must } })
        }
        Criterion::Or(children) => {
            let should: Vec<Value> = children.iter().map(translate).collect();
            json!({ "bool": { "should": should, "minimum_should_match": 1 } })
        }
        Criterion::StringMatch {
            field,
            value,
            match_type,
            string_type,
        } => string_match(field, value, *match_type, *string_type),
        Criterion::StringMatchAny {
            field,
            values,
            match_type,
            string_type,
        } => string_match_any(field, values, *match_type, *string_type),
        Criterion::StringMultiMatch { fields, value } => json!({
            "multi_match": { "query": value, "fields": fields }
        }),
        Criterion::IntMatch { field, value } => term(field, json!(value)),
        Criterion::LongMatch { field, value } => term(field, json!(value)),
        Criterion::BooleanMatch { field, value } => term(field, json!(value)),
        Criterion::DateMatch { field, value } => term(field, json!(format_date(value))),
        Criterion::Range {
            field,
            lower,
            upper,
        } => range(field, lower.as_ref().map(|v| json!(v)), upper.as_ref().map(|v| json!(v))),
        Criterion::DateRange {
            field,
            lower,
            upper,
        } => range(
            field,
            lower.as_ref().map(|d| json!(format_date(d))),
            upper.as_ref().map(|d| json!(format_date(d))),
        ),
        Criterion::Polygon { field, coordinates } => geo_shape(
            field,
            json!({ "type": "polygon", "coordinates": coordinates }),
        ),
        Criterion::BoundaryBox {
            field,
            min_x,
            min_y,
            max_x,
            max_y,
        } => geo_shape(
            field,
            json!({ "type": "envelope", "coordinates": [[min_x, max_y], [max_x, min_y]] }),
        ),
        Criterion::Circle {
            field,
            center,
            radius,
        } => geo_shape(
            field,
            json!({ "type": "circle", "coordinates": center, "radius": radius }),
        ),
        Criterion::FieldExists { field } => json!({ "exists": { "field": field } }),
    }
}

/// Build the full query for a search restricted to some document types.
///
/// The criterion is used as a non-scoring filter next to `match_all`.
pub fn filtered_query(criterion: &Criterion, types: &[String]) -> Value {
    let mut filter = Vec::with_capacity(2);
    if !criterion.is_empty() {
        filter.push(translate(criterion));
    }
    if !types.is_empty() {
        filter.push(single("terms", fields::TYPE, json!(types)));
    }
    json!({
        "bool": {
            "must": [{ "match_all": {} }],
            "filter": filter
        }
    })
}

/// RFC 3339 representation used for dates on the wire.
pub fn format_date(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Name of the not-analyzed sibling of a text field.
pub fn keyword_field(field: &str) -> String {
    format!("{}{}", field, fields::KEYWORD_SUFFIX)
}

fn string_match(field: &str, value: &str, match_type: MatchType, string_type: StringMatchType) -> Value {
    match string_type {
        StringMatchType::Keyword => {
            let target = keyword_field(field);
            match match_type {
                MatchType::Equals => term(&target, json!(value)),
                MatchType::StartsWith => single("prefix", &target, json!(value)),
                MatchType::EndsWith => wildcard(&target, format!("*{}", escape_wildcard(value))),
                MatchType::Contains => wildcard(&target, format!("*{}*", escape_wildcard(value))),
                MatchType::Regexp => single("regexp", &target, json!(value)),
            }
        }
        StringMatchType::FullText => match match_type {
            MatchType::Equals => single("match_phrase", field, json!(value)),
            MatchType::StartsWith => single("match_phrase_prefix", field, json!(value)),
            MatchType::Contains => single("match", field, json!(value)),
            MatchType::EndsWith => wildcard(field, format!("*{}", escape_wildcard(value))),
            MatchType::Regexp => single("regexp", field, json!(value)),
        },
    }
}

fn string_match_any(
    field: &str,
    values: &[String],
    match_type: MatchType,
    string_type: StringMatchType,
) -> Value {
    if values.is_empty() {
        return json!({ "match_none": {} });
    }
    if match_type == MatchType::Equals && string_type == StringMatchType::Keyword {
        return single("terms", &keyword_field(field), json!(values));
    }
    let should: Vec<Value> = values
        .iter()
        .map(|value| string_match(field, value, match_type, string_type))
        .collect();
    json!({ "bool": { "should": should, "minimum_should_match": 1 } })
}

fn single(kind: &str, field: &str, value: Value) -> Value {
    let mut inner = Map::new();
    inner.insert(field.to_string(), value);
    let mut outer = Map::new();
    outer.insert(kind.to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn term(field: &str, value: Value) -> Value {
    single("term", field, value)
}

fn wildcard(field: &str, pattern: String) -> Value {
    single("wildcard", field, json!({ "value": pattern }))
}

fn range(field: &str, lower: Bound<Value>, upper: Bound<Value>) -> Value {
    let mut bounds = Map::new();
    match lower {
        Bound::Included(v) => {
            bounds.insert("gte".to_string(), v);
        }
        Bound::Excluded(v) => {
            bounds.insert("gt".to_string(), v);
        }
        Bound::Unbounded => {}
    }
    match upper {
        Bound::Included(v) => {
            bounds.insert("lte".to_string(), v);
        }
        Bound::Excluded(v) => {
            bounds.insert("lt".to_string(), v);
        }
        Bound::Unbounded => {}
    }
    single("range", field, Value::Object(bounds))
}

fn geo_shape(field: &str, shape: Value) -> Value {
    single(
        "geo_shape",
        field,
        json!({ "shape": shape, "relation": "intersects" }),
    )
}

fn escape_wildcard(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '*' | '?' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
