//! Facet aggregation building and decoding.
//!
//! String facets are a single terms aggregation. Numeric and date facets take
//! two passes: the first asks for the 10th..90th percentiles of the field, the
//! second asks for a range aggregation whose bucket edges are those
//! percentiles, which yields buckets of roughly equal population whatever the
//! distribution of the values.

use std::collections::BTreeMap;
use std::ops::Bound;

use catalog_search_shared::{DateFacet, Facet, FacetRange, FacetType, NumericFacet, StringFacet};
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::query::keyword_field;

/// Percentiles requested during the first pass.
pub const PERCENTS: [f64; 9] = [10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0, 90.0];

const TERMS_SUFFIX: &str = "_terms";
const PERCENTS_SUFFIX: &str = "_percents";
const RANGE_SUFFIX: &str = "_range";

pub fn terms_name(attribute: &str) -> String {
    format!("{}{}", attribute, TERMS_SUFFIX)
}

pub fn percents_name(attribute: &str) -> String {
    format!("{}{}", attribute, PERCENTS_SUFFIX)
}

pub fn range_name(attribute: &str) -> String {
    format!("{}{}", attribute, RANGE_SUFFIX)
}

/// Returns true if any requested facet needs the range pass.
pub fn needs_second_pass(facets: &BTreeMap<String, FacetType>) -> bool {
    facets.values().any(FacetType::is_two_pass)
}

/// Aggregations of the first pass: terms for strings, percentiles otherwise.
pub fn first_pass_aggregations(
    facets: &BTreeMap<String, FacetType>,
    string_facet_size: usize,
) -> Map<String, Value> {
    let mut aggs = Map::new();
    for (attribute, facet_type) in facets {
        match facet_type {
            FacetType::String => {
                aggs.insert(
                    terms_name(attribute),
                    json!({
                        "terms": { "field": keyword_field(attribute), "size": string_facet_size }
                    }),
                );
            }
            FacetType::Numeric | FacetType::Date => {
                aggs.insert(
                    percents_name(attribute),
                    json!({ "percentiles": { "field": attribute, "percents": PERCENTS } }),
                );
            }
            FacetType::Range => {
                debug!(attribute = %attribute, "Range facets cannot be requested directly, ignoring");
            }
        }
    }
    aggs
}

/// Range aggregations of the second pass, built from first-pass percentiles.
///
/// Attributes whose percentiles are all missing get no aggregation.
pub fn second_pass_aggregations(
    facets: &BTreeMap<String, FacetType>,
    first_pass: &Value,
) -> Map<String, Value> {
    let mut aggs = Map::new();
    for (attribute, facet_type) in facets {
        if !facet_type.is_two_pass() {
            continue;
        }
        let Some(percentiles) = first_pass.get(percents_name(attribute)) else {
            continue;
        };
        let breakpoints = percentile_breakpoints(percentiles);
        if breakpoints.is_empty() {
            debug!(attribute = %attribute, "No percentile values, skipping facet");
            continue;
        }
        aggs.insert(
            range_name(attribute),
            json!({ "range": { "field": attribute, "ranges": ranges_from_breakpoints(&breakpoints) } }),
        );
    }
    aggs
}

/// Ordered, deduplicated percentile values of a percentiles aggregation.
///
/// Accepts both the keyed (`{"values": {"10.0": v}}`) and the array
/// (`{"values": [{"key": 10.0, "value": v}]}`) response formats. Missing and
/// not-a-number values are dropped, and a value equal to its predecessor is
/// collapsed since it would only produce an empty bucket.
pub fn percentile_breakpoints(aggregation: &Value) -> Vec<f64> {
    let mut keyed: Vec<(f64, f64)> = match aggregation.get("values") {
        Some(Value::Object(values)) => values
            .iter()
            .filter_map(|(key, value)| Some((key.parse::<f64>().ok()?, as_finite(value)?)))
            .collect(),
        Some(Value::Array(values)) => values
            .iter()
            .filter_map(|entry| {
                Some((
                    entry.get("key").and_then(Value::as_f64)?,
                    as_finite(entry.get("value")?)?,
                ))
            })
            .collect(),
        _ => Vec::new(),
    };
    keyed.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut breakpoints: Vec<f64> = Vec::with_capacity(keyed.len());
    for (_, value) in keyed {
        if breakpoints.last().is_some_and(|last| *last >= value) {
            continue;
        }
        breakpoints.push(value);
    }
    breakpoints
}

/// Range aggregation entries `(-inf, b0), [b0, b1), .., [bn, +inf)`.
pub fn ranges_from_breakpoints(breakpoints: &[f64]) -> Vec<Value> {
    let mut ranges = Vec::with_capacity(breakpoints.len() + 1);
    let Some((first, _)) = breakpoints.split_first() else {
        return ranges;
    };
    ranges.push(json!({ "to": first }));
    for pair in breakpoints.windows(2) {
        ranges.push(json!({ "from": pair[0], "to": pair[1] }));
    }
    if let Some(last) = breakpoints.last() {
        ranges.push(json!({ "from": last }));
    }
    ranges
}

/// Decode the requested facets from both passes.
///
/// String facets come from the first pass, numeric and date facets from the
/// second one. Facets with no buckets, or with a not-a-number bucket bound,
/// are omitted.
pub fn decode_facets(
    facets: &BTreeMap<String, FacetType>,
    first_pass: Option<&Value>,
    second_pass: Option<&Value>,
) -> Vec<Facet> {
    let mut decoded = Vec::new();
    for (attribute, facet_type) in facets {
        let facet = match facet_type {
            FacetType::String => first_pass
                .and_then(|aggs| aggs.get(terms_name(attribute)))
                .and_then(|agg| decode_string_facet(attribute, agg)),
            FacetType::Numeric => second_pass
                .and_then(|aggs| aggs.get(range_name(attribute)))
                .and_then(|agg| decode_numeric_facet(attribute, agg)),
            FacetType::Date => second_pass
                .and_then(|aggs| aggs.get(range_name(attribute)))
                .and_then(|agg| decode_date_facet(attribute, agg)),
            FacetType::Range => None,
        };
        if let Some(facet) = facet {
            decoded.push(facet);
        }
    }
    decoded
}

fn decode_string_facet(attribute: &str, aggregation: &Value) -> Option<Facet> {
    let buckets = aggregation.get("buckets")?.as_array()?;
    if buckets.is_empty() {
        return None;
    }
    let values = buckets
        .iter()
        .filter_map(|bucket| {
            let key = match bucket.get("key")? {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            Some((key, bucket.get("doc_count").and_then(Value::as_u64).unwrap_or(0)))
        })
        .collect();
    Some(Facet::String(StringFacet {
        attribute_name: attribute.to_string(),
        values,
    }))
}

fn decode_numeric_facet(attribute: &str, aggregation: &Value) -> Option<Facet> {
    let values = decode_range_buckets(aggregation, Some)?;
    Some(Facet::Numeric(NumericFacet {
        attribute_name: attribute.to_string(),
        values,
    }))
}

fn decode_date_facet(attribute: &str, aggregation: &Value) -> Option<Facet> {
    let values = decode_range_buckets(aggregation, |millis| {
        DateTime::<Utc>::from_timestamp_millis(millis as i64)
    })?;
    Some(Facet::Date(DateFacet {
        attribute_name: attribute.to_string(),
        values,
    }))
}

/// Decode range buckets as `[from, to)` intervals.
///
/// Returns `None` when there is no bucket or when a bound is not a number,
/// which the backend reports when the field has no value at all.
fn decode_range_buckets<T, F>(aggregation: &Value, convert: F) -> Option<Vec<(FacetRange<T>, u64)>>
where
    T: PartialOrd,
    F: Fn(f64) -> Option<T>,
{
    let buckets = aggregation.get("buckets")?.as_array()?;
    if buckets.is_empty() {
        return None;
    }
    let mut values = Vec::with_capacity(buckets.len());
    for bucket in buckets {
        let lower = match bucket.get("from") {
            None | Some(Value::Null) => Bound::Unbounded,
            Some(value) => Bound::Included(convert(as_finite(value)?)?),
        };
        let upper = match bucket.get("to") {
            None | Some(Value::Null) => Bound::Unbounded,
            Some(value) => Bound::Excluded(convert(as_finite(value)?)?),
        };
        let count = bucket.get("doc_count").and_then(Value::as_u64).unwrap_or(0);
        values.push((FacetRange::new(lower, upper), count));
    }
    Some(values)
}

/// Numeric value of a JSON number or numeric string, `None` if not finite.
fn as_finite(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.parse::<f64>().ok()?,
        _ => return None,
    };
    number.is_finite().then_some(number)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facets(entries: &[(&str, FacetType)]) -> BTreeMap<String, FacetType> {
        entries
            .iter()
            .map(|(name, kind)| (name.to_string(), *kind))
            .collect()
    }

    #[test]
    fn test_first_pass_aggregations() {
        let requested = facets(&[("label", FacetType::String), ("altitude", FacetType::Numeric)]);
        let aggs = first_pass_aggregations(&requested, 50);

        assert_eq!(
            aggs["label_terms"],
            json!({ "terms": { "field": "label.keyword", "size": 50 } })
        );
        assert_eq!(
            aggs["altitude_percents"]["percentiles"]["field"],
            json!("altitude")
        );
        assert_eq!(aggs.len(), 2);
    }

    #[test]
    fn test_breakpoints_collapse_duplicates_and_drop_nan() {
        let aggregation = json!({
            "values": {
                "10.0": 1.0, "20.0": 1.0, "30.0": 1.0, "40.0": 1.0, "50.0": 1.0,
                "60.0": 1.0, "70.0": 1.0, "80.0": 200.8, "90.0": 1400.0
            }
        });
        assert_eq!(percentile_breakpoints(&aggregation), vec![1.0, 200.8, 1400.0]);

        let empty = json!({ "values": { "10.0": null, "20.0": "NaN" } });
        assert!(percentile_breakpoints(&empty).is_empty());
    }

    #[test]
    fn test_breakpoints_are_ordered_by_percent() {
        let aggregation = json!({
            "values": [
                { "key": 90.0, "value": 9.0 },
                { "key": 10.0, "value": 1.0 },
                { "key": 50.0, "value": 5.0 }
            ]
        });
        assert_eq!(percentile_breakpoints(&aggregation), vec![1.0, 5.0, 9.0]);
    }

    #[test]
    fn test_ranges_from_breakpoints() {
        assert_eq!(
            ranges_from_breakpoints(&[1.0, 2.0]),
            vec![json!({ "to": 1.0 }), json!({ "from": 1.0, "to": 2.0 }), json!({ "from": 2.0 })]
        );
        assert!(ranges_from_breakpoints(&[]).is_empty());
    }

    #[test]
    fn test_second_pass_skips_attributes_without_values() {
        let requested = facets(&[("altitude", FacetType::Numeric), ("start", FacetType::Date)]);
        let first = json!({
            "altitude_percents": { "values": { "10.0": 3.0, "90.0": 8.0 } },
            "start_percents": { "values": { "10.0": null } }
        });
        let aggs = second_pass_aggregations(&requested, &first);
        assert!(aggs.contains_key("altitude_range"));
        assert!(!aggs.contains_key("start_range"));
    }

    #[test]
    fn test_decode_all_facet_kinds() {
        let requested = facets(&[
            ("label", FacetType::String),
            ("altitude", FacetType::Numeric),
            ("start", FacetType::Date),
        ]);
        let first = json!({
            "label_terms": { "buckets": [
                { "key": "b", "doc_count": 5 },
                { "key": "a", "doc_count": 2 }
            ] }
        });
        let second = json!({
            "altitude_range": { "buckets": [
                { "key": "*-1.0", "to": 1.0, "doc_count": 0 },
                { "key": "1.0-*", "from": 1.0, "doc_count": 7 }
            ] },
            "start_range": { "buckets": [
                { "to": 1_700_000_000_000.0_f64, "doc_count": 1 },
                { "from": 1_700_000_000_000.0_f64, "doc_count": 2 }
            ] }
        });

        let decoded = decode_facets(&requested, Some(&first), Some(&second));
        assert_eq!(decoded.len(), 3);

        let Facet::Numeric(altitude) = &decoded[0] else {
            panic!("expected numeric facet first");
        };
        assert_eq!(altitude.values[0].0.upper, Bound::Excluded(1.0));
        assert_eq!(altitude.values[1].0.lower, Bound::Included(1.0));
        assert_eq!(altitude.values[1].0.upper, Bound::Unbounded);

        let Facet::String(label) = &decoded[1] else {
            panic!("expected string facet second");
        };
        assert_eq!(label.values, vec![("b".to_string(), 5), ("a".to_string(), 2)]);

        let Facet::Date(start) = &decoded[2] else {
            panic!("expected date facet third");
        };
        assert_eq!(
            start.values[0].0.upper,
            Bound::Excluded(DateTime::<Utc>::from_timestamp_millis(1_700_000_000_000).unwrap())
        );
    }

    #[test]
    fn test_nan_bound_drops_facet() {
        let requested = facets(&[("altitude", FacetType::Numeric)]);
        let second = json!({
            "altitude_range": { "buckets": [ { "from": "NaN", "doc_count": 0 } ] }
        });
        assert!(decode_facets(&requested, None, Some(&second)).is_empty());
    }

    #[test]
    fn test_empty_terms_drop_facet() {
        let requested = facets(&[("label", FacetType::String)]);
        let first = json!({ "label_terms": { "buckets": [] } });
        assert!(decode_facets(&requested, Some(&first), None).is_empty());
    }
}
