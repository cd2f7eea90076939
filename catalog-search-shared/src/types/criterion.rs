//! Criterion tree used to express catalog search filters.
//!
//! A `Criterion` is an immutable predicate tree. Leaves always carry a field
//! name and composites always carry at least one child when built through the
//! constructor functions of this module. Trees built by hand or decoded from
//! JSON are checked with [`Criterion::validate`] before they are run. Trees
//! are shared freely between queries; "changing" a query means building a new
//! tree.

use std::ops::Bound;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::document::fields;

/// Structural errors of a criterion tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CriterionError {
    #[error("{0} criterion without children")]
    EmptyComposite(&'static str),

    #[error("{0} criterion without field name")]
    MissingField(&'static str),
}

/// How a string value is compared against a field.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchType {
    /// Whole value equality.
    #[default]
    Equals,
    /// The field starts with the value.
    StartsWith,
    /// The field ends with the value.
    EndsWith,
    /// The field contains the value.
    Contains,
    /// The value is a regular expression the field must match.
    Regexp,
}

/// Which representation of a string field a match targets.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StringMatchType {
    /// The not-analyzed (exact) sibling of the field.
    #[default]
    Keyword,
    /// The analyzed full-text field.
    FullText,
}

/// A node of the search predicate tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "kind", content = "args", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Criterion {
    /// Matches every document.
    #[default]
    Empty,
    /// Negation of the child criterion.
    Not(Box<Criterion>),
    /// All children must match.
    And(Vec<Criterion>),
    /// At least one child must match.
    Or(Vec<Criterion>),
    StringMatch {
        field: String,
        value: String,
        match_type: MatchType,
        string_type: StringMatchType,
    },
    /// One value matched against several fields.
    StringMultiMatch { fields: Vec<String>, value: String },
    /// The field matches any of the values.
    StringMatchAny {
        field: String,
        values: Vec<String>,
        match_type: MatchType,
        string_type: StringMatchType,
    },
    IntMatch { field: String, value: i32 },
    LongMatch { field: String, value: i64 },
    DateMatch { field: String, value: DateTime<Utc> },
    Range {
        field: String,
        lower: Bound<f64>,
        upper: Bound<f64>,
    },
    DateRange {
        field: String,
        lower: Bound<DateTime<Utc>>,
        upper: Bound<DateTime<Utc>>,
    },
    BooleanMatch { field: String, value: bool },
    /// Intersection with a polygon given as rings of `[lon, lat]` points.
    Polygon {
        field: String,
        coordinates: Vec<Vec<[f64; 2]>>,
    },
    /// Intersection with a `[left, bottom, right, top]` box.
    BoundaryBox {
        field: String,
        min_x: f64,
        min_y: f64,
        max_x: f64,
        max_y: f64,
    },
    /// Intersection with a circle; the radius carries its unit (e.g. `"50km"`).
    Circle {
        field: String,
        center: [f64; 2],
        radius: String,
    },
    FieldExists { field: String },
}

impl Criterion {
    /// Criterion matching every document.
    pub fn all() -> Self {
        Criterion::Empty
    }

    /// Conjunction of the given criteria.
    ///
    /// An empty input yields [`Criterion::Empty`] and a single criterion is
    /// returned as-is, so an `And` node always has at least two children.
    pub fn and(criteria: impl IntoIterator<Item = Criterion>) -> Self {
        Self::composite(criteria.into_iter().collect(), Criterion::And)
    }

    /// Disjunction of the given criteria, collapsed like [`Criterion::and`].
    pub fn or(criteria: impl IntoIterator<Item = Criterion>) -> Self {
        Self::composite(criteria.into_iter().collect(), Criterion::Or)
    }

    fn composite(mut criteria: Vec<Criterion>, build: fn(Vec<Criterion>) -> Criterion) -> Self {
        match criteria.len() {
            0 => Criterion::Empty,
            1 => criteria.remove(0),
            _ => build(criteria),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(criterion: Criterion) -> Self {
        Criterion::Not(Box::new(criterion))
    }

    pub fn eq_str(field: impl Into<String>, value: impl Into<String>, string_type: StringMatchType) -> Self {
        Self::string_match(field, value, MatchType::Equals, string_type)
    }

    pub fn starts_with(field: impl Into<String>, value: impl Into<String>, string_type: StringMatchType) -> Self {
        Self::string_match(field, value, MatchType::StartsWith, string_type)
    }

    pub fn ends_with(field: impl Into<String>, value: impl Into<String>, string_type: StringMatchType) -> Self {
        Self::string_match(field, value, MatchType::EndsWith, string_type)
    }

    pub fn contains(field: impl Into<String>, value: impl Into<String>, string_type: StringMatchType) -> Self {
        Self::string_match(field, value, MatchType::Contains, string_type)
    }

    pub fn regexp(field: impl Into<String>, value: impl Into<String>, string_type: StringMatchType) -> Self {
        Self::string_match(field, value, MatchType::Regexp, string_type)
    }

    pub fn string_match(
        field: impl Into<String>,
        value: impl Into<String>,
        match_type: MatchType,
        string_type: StringMatchType,
    ) -> Self {
        Criterion::StringMatch {
            field: field.into(),
            value: value.into(),
            match_type,
            string_type,
        }
    }

    /// The field is equal to any of the given values.
    pub fn in_values<I, S>(field: impl Into<String>, values: I, string_type: StringMatchType) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Criterion::StringMatchAny {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
            match_type: MatchType::Equals,
            string_type,
        }
    }

    pub fn multi_match<I, S>(fields: I, value: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Criterion::StringMultiMatch {
            fields: fields.into_iter().map(Into::into).collect(),
            value: value.into(),
        }
    }

    pub fn eq_int(field: impl Into<String>, value: i32) -> Self {
        Criterion::IntMatch {
            field: field.into(),
            value,
        }
    }

    pub fn eq_long(field: impl Into<String>, value: i64) -> Self {
        Criterion::LongMatch {
            field: field.into(),
            value,
        }
    }

    pub fn eq_date(field: impl Into<String>, value: DateTime<Utc>) -> Self {
        Criterion::DateMatch {
            field: field.into(),
            value,
        }
    }

    pub fn eq_bool(field: impl Into<String>, value: bool) -> Self {
        Criterion::BooleanMatch {
            field: field.into(),
            value,
        }
    }

    pub fn is_true(field: impl Into<String>) -> Self {
        Self::eq_bool(field, true)
    }

    pub fn is_false(field: impl Into<String>) -> Self {
        Self::eq_bool(field, false)
    }

    /// Numeric range with explicit bounds.
    pub fn range(field: impl Into<String>, lower: Bound<f64>, upper: Bound<f64>) -> Self {
        Criterion::Range {
            field: field.into(),
            lower,
            upper,
        }
    }

    /// Inclusive numeric range.
    pub fn between(field: impl Into<String>, lower: f64, upper: f64) -> Self {
        Self::range(field, Bound::Included(lower), Bound::Included(upper))
    }

    pub fn gt(field: impl Into<String>, value: f64) -> Self {
        Self::range(field, Bound::Excluded(value), Bound::Unbounded)
    }

    pub fn ge(field: impl Into<String>, value: f64) -> Self {
        Self::range(field, Bound::Included(value), Bound::Unbounded)
    }

    pub fn lt(field: impl Into<String>, value: f64) -> Self {
        Self::range(field, Bound::Unbounded, Bound::Excluded(value))
    }

    pub fn le(field: impl Into<String>, value: f64) -> Self {
        Self::range(field, Bound::Unbounded, Bound::Included(value))
    }

    pub fn date_range(
        field: impl Into<String>,
        lower: Bound<DateTime<Utc>>,
        upper: Bound<DateTime<Utc>>,
    ) -> Self {
        Criterion::DateRange {
            field: field.into(),
            lower,
            upper,
        }
    }

    pub fn date_between(field: impl Into<String>, lower: DateTime<Utc>, upper: DateTime<Utc>) -> Self {
        Self::date_range(field, Bound::Included(lower), Bound::Included(upper))
    }

    pub fn date_le(field: impl Into<String>, value: DateTime<Utc>) -> Self {
        Self::date_range(field, Bound::Unbounded, Bound::Included(value))
    }

    pub fn date_ge(field: impl Into<String>, value: DateTime<Utc>) -> Self {
        Self::date_range(field, Bound::Included(value), Bound::Unbounded)
    }

    pub fn intersects_polygon(coordinates: Vec<Vec<[f64; 2]>>) -> Self {
        Criterion::Polygon {
            field: fields::GEOMETRY.to_string(),
            coordinates,
        }
    }

    pub fn intersects_bbox(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Criterion::BoundaryBox {
            field: fields::GEOMETRY.to_string(),
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn intersects_circle(center: [f64; 2], radius: impl Into<String>) -> Self {
        Criterion::Circle {
            field: fields::GEOMETRY.to_string(),
            center,
            radius: radius.into(),
        }
    }

    pub fn exists(field: impl Into<String>) -> Self {
        Criterion::FieldExists {
            field: field.into(),
        }
    }

    /// Field targeted by a leaf criterion; `None` for composites and multi-field matches.
    pub fn field(&self) -> Option<&str> {
        match self {
            Criterion::StringMatch { field, .. }
            | Criterion::StringMatchAny { field, .. }
            | Criterion::IntMatch { field, .. }
            | Criterion::LongMatch { field, .. }
            | Criterion::DateMatch { field, .. }
            | Criterion::Range { field, .. }
            | Criterion::DateRange { field, .. }
            | Criterion::BooleanMatch { field, .. }
            | Criterion::Polygon { field, .. }
            | Criterion::BoundaryBox { field, .. }
            | Criterion::Circle { field, .. }
            | Criterion::FieldExists { field } => Some(field),
            Criterion::Empty
            | Criterion::Not(_)
            | Criterion::And(_)
            | Criterion::Or(_)
            | Criterion::StringMultiMatch { .. } => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Criterion::Empty)
    }

    /// Check that composites have children and leaves name their field.
    pub fn validate(&self) -> Result<(), CriterionError> {
        match self {
            Criterion::Empty => Ok(()),
            Criterion::Not(inner) => inner.validate(),
            Criterion::And(children) | Criterion::Or(children) => {
                if children.is_empty() {
                    return Err(CriterionError::EmptyComposite(self.kind()));
                }
                children.iter().try_for_each(Criterion::validate)
            }
            Criterion::StringMultiMatch { fields, .. } => {
                if fields.is_empty() || fields.iter().any(|f| f.trim().is_empty()) {
                    return Err(CriterionError::MissingField(self.kind()));
                }
                Ok(())
            }
            leaf => match leaf.field() {
                Some(field) if !field.trim().is_empty() => Ok(()),
                _ => Err(CriterionError::MissingField(leaf.kind())),
            },
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Criterion::Empty => "EMPTY",
            Criterion::Not(_) => "NOT",
            Criterion::And(_) => "AND",
            Criterion::Or(_) => "OR",
            Criterion::StringMatch { .. } => "STRING_MATCH",
            Criterion::StringMultiMatch { .. } => "STRING_MULTI_MATCH",
            Criterion::StringMatchAny { .. } => "STRING_MATCH_ANY",
            Criterion::IntMatch { .. } => "INT_MATCH",
            Criterion::LongMatch { .. } => "LONG_MATCH",
            Criterion::DateMatch { .. } => "DATE_MATCH",
            Criterion::Range { .. } => "RANGE",
            Criterion::DateRange { .. } => "DATE_RANGE",
            Criterion::BooleanMatch { .. } => "BOOLEAN_MATCH",
            Criterion::Polygon { .. } => "POLYGON",
            Criterion::BoundaryBox { .. } => "BOUNDARY_BOX",
            Criterion::Circle { .. } => "CIRCLE",
            Criterion::FieldExists { .. } => "FIELD_EXISTS",
        }
    }
}
