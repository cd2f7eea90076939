//! Facet types returned alongside search results.
//!
//! Facets are built once per search call and never mutated afterwards.

use std::ops::Bound;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of facet requested for an attribute.
///
/// `Range` is never requested by callers: it is the second-pass aggregation
/// that numeric and date facets are turned into.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FacetType {
    String,
    Numeric,
    Date,
    Range,
}

impl FacetType {
    /// Returns true if this facet needs a percentile pass followed by a range pass.
    pub fn is_two_pass(&self) -> bool {
        matches!(self, FacetType::Numeric | FacetType::Date)
    }
}

/// Half-open interval of facet values; either end may be unbounded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FacetRange<T> {
    pub lower: Bound<T>,
    pub upper: Bound<T>,
}

impl<T: PartialOrd> FacetRange<T> {
    pub fn new(lower: Bound<T>, upper: Bound<T>) -> Self {
        Self { lower, upper }
    }

    /// Returns true if `value` lies inside the interval.
    pub fn contains(&self, value: &T) -> bool {
        let above = match &self.lower {
            Bound::Included(l) => value >= l,
            Bound::Excluded(l) => value > l,
            Bound::Unbounded => true,
        };
        let below = match &self.upper {
            Bound::Included(u) => value <= u,
            Bound::Excluded(u) => value < u,
            Bound::Unbounded => true,
        };
        above && below
    }
}

/// Term counts of a string attribute, in descending count order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StringFacet {
    pub attribute_name: String,
    pub values: Vec<(String, u64)>,
}

/// Document counts per numeric interval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NumericFacet {
    pub attribute_name: String,
    pub values: Vec<(FacetRange<f64>, u64)>,
}

/// Document counts per date interval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DateFacet {
    pub attribute_name: String,
    pub values: Vec<(FacetRange<DateTime<Utc>>, u64)>,
}

/// A facet computed over one attribute.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Facet {
    String(StringFacet),
    Numeric(NumericFacet),
    Date(DateFacet),
}

impl Facet {
    pub fn attribute_name(&self) -> &str {
        match self {
            Facet::String(f) => &f.attribute_name,
            Facet::Numeric(f) => &f.attribute_name,
            Facet::Date(f) => &f.attribute_name,
        }
    }

    pub fn facet_type(&self) -> FacetType {
        match self {
            Facet::String(_) => FacetType::String,
            Facet::Numeric(_) => FacetType::Numeric,
            Facet::Date(_) => FacetType::Date,
        }
    }

    /// Total number of documents counted by the facet buckets.
    pub fn total_count(&self) -> u64 {
        match self {
            Facet::String(f) => f.values.iter().map(|(_, c)| c).sum(),
            Facet::Numeric(f) => f.values.iter().map(|(_, c)| c).sum(),
            Facet::Date(f) => f.values.iter().map(|(_, c)| c).sum(),
        }
    }
}
