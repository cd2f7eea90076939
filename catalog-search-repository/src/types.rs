//! Request and response types exchanged with the search backend.

use catalog_search_shared::EntityUrn;
use serde_json::Value;

use crate::errors::SearchIndexError;

/// Outcome of a single successful document write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The document did not exist before the write.
    Created,
    /// An existing document was replaced.
    Updated,
}

/// Per-document result of a bulk write.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkItemOutcome {
    /// The document id.
    pub id: String,
    /// The write outcome, or the failure reason reported by the backend.
    pub result: Result<WriteOutcome, String>,
}

impl BulkItemOutcome {
    pub fn created(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            result: Ok(WriteOutcome::Created),
        }
    }

    pub fn updated(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            result: Ok(WriteOutcome::Updated),
        }
    }

    pub fn failed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            result: Err(reason.into()),
        }
    }
}

/// One hit of a search response.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// The document id.
    pub id: String,
    /// The stored document, possibly filtered.
    pub source: Value,
    /// Sort values of the hit when the search was sorted.
    pub sort: Vec<Value>,
}

/// Decoded search (or scroll page) response.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SearchResponse {
    /// Total number of matching documents.
    pub total: u64,
    /// Whether the backend reported the query as timed out.
    pub timed_out: bool,
    /// Hits of the current page.
    pub hits: Vec<SearchHit>,
    /// Cursor id when the response belongs to a scroll.
    pub scroll_id: Option<String>,
    /// Raw aggregation results keyed by aggregation name.
    pub aggregations: Option<Value>,
}

impl SearchResponse {
    /// Decode the JSON body returned by a search or scroll request.
    ///
    /// Accepts both the object (`{"value": n}`) and the legacy numeric form of
    /// `hits.total`.
    pub fn from_json(body: Value) -> Result<Self, SearchIndexError> {
        let Value::Object(mut body) = body else {
            return Err(SearchIndexError::parse("search response is not an object"));
        };

        let timed_out = body
            .get("timed_out")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let scroll_id = body
            .get("_scroll_id")
            .and_then(Value::as_str)
            .map(str::to_string);
        let aggregations = body.remove("aggregations");

        let hits_section = body
            .remove("hits")
            .ok_or_else(|| SearchIndexError::parse("search response without hits section"))?;

        let total = match hits_section.get("total") {
            Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
            Some(total) => total.get("value").and_then(Value::as_u64).unwrap_or(0),
            None => 0,
        };

        let raw_hits = match hits_section.get("hits") {
            Some(Value::Array(hits)) => hits.clone(),
            _ => Vec::new(),
        };

        let mut hits = Vec::with_capacity(raw_hits.len());
        for mut hit in raw_hits {
            let id = hit
                .get("_id")
                .and_then(Value::as_str)
                .ok_or_else(|| SearchIndexError::parse("search hit without _id"))?
                .to_string();
            let source = hit
                .get_mut("_source")
                .map(Value::take)
                .unwrap_or(Value::Null);
            let sort = match hit.get_mut("sort").map(Value::take) {
                Some(Value::Array(values)) => values,
                _ => Vec::new(),
            };
            hits.push(SearchHit { id, source, sort });
        }

        Ok(Self {
            total,
            timed_out,
            hits,
            scroll_id,
            aggregations,
        })
    }

    /// Raw aggregation result for the given name.
    pub fn aggregation(&self, name: &str) -> Option<&Value> {
        self.aggregations.as_ref().and_then(|aggs| aggs.get(name))
    }
}

/// An indexed entity as seen by the versioning rewriter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedEntity {
    /// Precise identifier of this version.
    pub id: EntityUrn,
    /// Virtual identifier shared by every version of the entity.
    pub virtual_id: EntityUrn,
    /// Whether this version is the latest one.
    pub last: bool,
}
