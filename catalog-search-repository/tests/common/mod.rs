//! In-memory search backend shared by the integration tests.
//!
//! It evaluates the subset of the query DSL the repository emits, computes
//! terms, percentiles, range, stats and metric aggregations, pages with
//! `search_after` and serves scrolls page by page. Test hooks allow
//! simulating timed out searches and scroll opens, rejected bulk items and
//! differently ordered scrolls.

#![allow(dead_code)]

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use catalog_search_repository::{
    BulkItemOutcome, SearchBackend, SearchHit, SearchIndexError, SearchResponse, WriteOutcome,
};
use chrono::DateTime;
use regex::Regex;
use serde_json::{json, Map, Value};

const KEYWORD_SUFFIX: &str = ".keyword";

struct Cursor {
    pending: VecDeque<SearchHit>,
    page_size: usize,
    total: u64,
}

#[derive(Default)]
struct State {
    indices: BTreeMap<String, BTreeMap<String, Value>>,
    cursors: HashMap<String, Cursor>,
    released: Vec<String>,
    rejected_ids: HashSet<String>,
    last_search: Option<Value>,
}

#[derive(Default)]
pub struct InMemoryBackend {
    state: Mutex<State>,
    pending_timeouts: AtomicUsize,
    pending_scroll_timeouts: AtomicUsize,
    shuffle_scrolls: AtomicBool,
    scroll_sequence: AtomicUsize,
    pub search_calls: AtomicUsize,
    pub scroll_opens: AtomicUsize,
    pub bulk_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub mapping_calls: AtomicUsize,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report the next `count` searches as timed out.
    pub fn time_out_next_searches(&self, count: usize) {
        self.pending_timeouts.store(count, Ordering::SeqCst);
    }

    /// Report the next `count` scroll opens as timed out. The cursor of a
    /// timed out open is created and handed back like a real one.
    pub fn time_out_next_scroll_opens(&self, count: usize) {
        self.pending_scroll_timeouts.store(count, Ordering::SeqCst);
    }

    /// Make the bulk items with these ids fail.
    pub fn reject_ids<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.lock();
        state.rejected_ids.extend(ids.into_iter().map(Into::into));
    }

    /// Serve every new scroll in a different hit order.
    pub fn shuffle_scrolls(&self, shuffle: bool) {
        self.shuffle_scrolls.store(shuffle, Ordering::SeqCst);
    }

    pub fn open_cursors(&self) -> usize {
        self.lock().cursors.len()
    }

    pub fn released_cursors(&self) -> usize {
        self.lock().released.len()
    }

    pub fn document_count(&self, index: &str) -> usize {
        self.lock().indices.get(index).map_or(0, BTreeMap::len)
    }

    /// Body of the most recent search request.
    pub fn last_search_body(&self) -> Option<Value> {
        self.lock().last_search.clone()
    }

    pub fn searches(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn matching(&self, index: &str, query: &Value) -> Result<Vec<SearchHit>, SearchIndexError> {
        let state = self.lock();
        let documents = state
            .indices
            .get(index)
            .ok_or_else(|| SearchIndexError::index_not_found(index))?;
        Ok(documents
            .iter()
            .filter(|(_, source)| matches(query, source))
            .map(|(id, source)| SearchHit {
                id: id.clone(),
                source: source.clone(),
                sort: Vec::new(),
            })
            .collect())
    }
}

#[async_trait]
impl SearchBackend for InMemoryBackend {
    async fn create_index(&self, index: &str, _settings: &Value) -> Result<bool, SearchIndexError> {
        let mut state = self.lock();
        if state.indices.contains_key(index) {
            return Ok(false);
        }
        state.indices.insert(index.to_string(), BTreeMap::new());
        Ok(true)
    }

    async fn delete_index(&self, index: &str) -> Result<bool, SearchIndexError> {
        Ok(self.lock().indices.remove(index).is_some())
    }

    async fn index_exists(&self, index: &str) -> Result<bool, SearchIndexError> {
        Ok(self.lock().indices.contains_key(index))
    }

    async fn refresh(&self, _index: &str) -> Result<(), SearchIndexError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn put_mapping(&self, index: &str, _mapping: &Value) -> Result<(), SearchIndexError> {
        if self.lock().indices.contains_key(index) {
            Ok(())
        } else {
            Err(SearchIndexError::index_not_found(index))
        }
    }

    async fn get_field_mapping(
        &self,
        index: &str,
        fields: &[String],
    ) -> Result<Value, SearchIndexError> {
        self.mapping_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.lock();
        let documents = state
            .indices
            .get(index)
            .ok_or_else(|| SearchIndexError::index_not_found(index))?;

        let mut mappings = Map::new();
        for field in fields {
            let sample = documents
                .values()
                .flat_map(|source| field_values(source, field))
                .next();
            let Some(field_type) = sample.and_then(mapping_type) else {
                continue;
            };
            let leaf = field.rsplit('.').next().unwrap_or(field);
            mappings.insert(
                field.clone(),
                json!({ "full_name": field, "mapping": { (leaf): { "type": field_type } } }),
            );
        }
        Ok(json!({ (index): { "mappings": mappings } }))
    }

    async fn index_document(
        &self,
        index: &str,
        id: &str,
        source: &Value,
    ) -> Result<WriteOutcome, SearchIndexError> {
        let mut state = self.lock();
        let documents = state.indices.entry(index.to_string()).or_default();
        match documents.insert(id.to_string(), source.clone()) {
            Some(_) => Ok(WriteOutcome::Updated),
            None => Ok(WriteOutcome::Created),
        }
    }

    async fn bulk_index(
        &self,
        index: &str,
        documents: Vec<(String, Value)>,
    ) -> Result<Vec<BulkItemOutcome>, SearchIndexError> {
        self.bulk_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();
        let rejected = state.rejected_ids.clone();
        let stored = state.indices.entry(index.to_string()).or_default();
        Ok(documents
            .into_iter()
            .map(|(id, source)| {
                if rejected.contains(&id) {
                    return BulkItemOutcome::failed(id, "mapper_parsing_exception");
                }
                match stored.insert(id.clone(), source) {
                    Some(_) => BulkItemOutcome::updated(id),
                    None => BulkItemOutcome::created(id),
                }
            })
            .collect())
    }

    async fn get_document(&self, index: &str, id: &str) -> Result<Option<Value>, SearchIndexError> {
        Ok(self
            .lock()
            .indices
            .get(index)
            .and_then(|documents| documents.get(id))
            .cloned())
    }

    async fn delete_document(&self, index: &str, id: &str) -> Result<bool, SearchIndexError> {
        Ok(self
            .lock()
            .indices
            .get_mut(index)
            .is_some_and(|documents| documents.remove(id).is_some()))
    }

    async fn delete_by_query(&self, index: &str, query: &Value) -> Result<u64, SearchIndexError> {
        let query = query.get("query").unwrap_or(query);
        let ids: Vec<String> = self
            .matching(index, query)?
            .into_iter()
            .map(|hit| hit.id)
            .collect();
        let mut state = self.lock();
        if let Some(documents) = state.indices.get_mut(index) {
            for id in &ids {
                documents.remove(id);
            }
        }
        Ok(ids.len() as u64)
    }

    async fn update_document(
        &self,
        index: &str,
        id: &str,
        partial: &Value,
    ) -> Result<(), SearchIndexError> {
        let mut state = self.lock();
        let document = state
            .indices
            .get_mut(index)
            .and_then(|documents| documents.get_mut(id))
            .ok_or_else(|| SearchIndexError::document_not_found(index, id))?;
        merge_into(document, partial);
        Ok(())
    }

    async fn search(&self, index: &str, body: &Value) -> Result<SearchResponse, SearchIndexError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        self.lock().last_search = Some(body.clone());
        let timed_out = self
            .pending_timeouts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if timed_out {
            return Ok(SearchResponse {
                timed_out: true,
                ..SearchResponse::default()
            });
        }

        let mut hits = self.matching(index, body.get("query").unwrap_or(&json!({ "match_all": {} })))?;
        let total = hits.len() as u64;
        let aggregations = body
            .get("aggs")
            .and_then(Value::as_object)
            .map(|aggs| aggregate(aggs, &hits));

        let orders = sort_orders(body.get("sort"));
        sort_hits(&mut hits, &orders);
        if let Some(after) = body.get("search_after").and_then(Value::as_array) {
            hits.retain(|hit| compare_keys(&hit.sort, after, &orders) == CmpOrdering::Greater);
        }
        let from = body.get("from").and_then(Value::as_u64).unwrap_or(0) as usize;
        let size = body.get("size").and_then(Value::as_u64).unwrap_or(10) as usize;
        let hits = hits
            .into_iter()
            .skip(from)
            .take(size)
            .map(|hit| filter_source(hit, body.get("_source")))
            .collect();

        Ok(SearchResponse {
            total,
            timed_out: false,
            hits,
            scroll_id: None,
            aggregations,
        })
    }

    async fn scroll_open(
        &self,
        index: &str,
        body: &Value,
        _keep_alive: &str,
    ) -> Result<SearchResponse, SearchIndexError> {
        self.scroll_opens.fetch_add(1, Ordering::SeqCst);
        let mut hits = self.matching(index, body.get("query").unwrap_or(&json!({ "match_all": {} })))?;
        sort_hits(&mut hits, &sort_orders(body.get("sort")));

        let sequence = self.scroll_sequence.fetch_add(1, Ordering::SeqCst);
        if self.shuffle_scrolls.load(Ordering::SeqCst) && !hits.is_empty() {
            let len = hits.len();
            hits.rotate_left((sequence * 7 + 3) % len);
            if sequence % 2 == 1 {
                hits.reverse();
            }
        }

        let total = hits.len() as u64;
        let page_size = body.get("size").and_then(Value::as_u64).unwrap_or(10).max(1) as usize;
        let pending: VecDeque<SearchHit> = hits
            .into_iter()
            .map(|hit| filter_source(hit, body.get("_source")))
            .collect();

        let scroll_id = format!("scroll-{}", sequence);
        self.lock().cursors.insert(
            scroll_id.clone(),
            Cursor {
                pending,
                page_size,
                total,
            },
        );
        let timed_out = self
            .pending_scroll_timeouts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if timed_out {
            return Ok(SearchResponse {
                timed_out: true,
                scroll_id: Some(scroll_id),
                ..SearchResponse::default()
            });
        }
        self.scroll_next(&scroll_id, "1m").await
    }

    async fn scroll_next(
        &self,
        scroll_id: &str,
        _keep_alive: &str,
    ) -> Result<SearchResponse, SearchIndexError> {
        let mut state = self.lock();
        let cursor = state
            .cursors
            .get_mut(scroll_id)
            .ok_or_else(|| SearchIndexError::backend(format!("unknown scroll {}", scroll_id)))?;
        let take = cursor.page_size.min(cursor.pending.len());
        let hits = cursor.pending.drain(..take).collect();
        Ok(SearchResponse {
            total: cursor.total,
            timed_out: false,
            hits,
            scroll_id: Some(scroll_id.to_string()),
            aggregations: None,
        })
    }

    async fn clear_scroll(&self, scroll_id: &str) -> Result<(), SearchIndexError> {
        let mut state = self.lock();
        if state.cursors.remove(scroll_id).is_some() {
            state.released.push(scroll_id.to_string());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Query evaluation
// ---------------------------------------------------------------------------

fn matches(query: &Value, source: &Value) -> bool {
    let Some((kind, args)) = query.as_object().and_then(|q| q.iter().next()) else {
        return true;
    };
    match kind.as_str() {
        "match_all" => true,
        "match_none" => false,
        "bool" => matches_bool(args, source),
        "term" => field_clause(args).is_some_and(|(field, value)| {
            let value = value.get("value").unwrap_or(value);
            field_values(source, field).iter().any(|v| same_value(v, value))
        }),
        "terms" => field_clause(args).is_some_and(|(field, values)| {
            let values = values.as_array().cloned().unwrap_or_default();
            field_values(source, field)
                .iter()
                .any(|v| values.iter().any(|q| same_value(v, q)))
        }),
        "prefix" => field_clause(args).is_some_and(|(field, value)| {
            let prefix = clause_text(value, "value");
            strings(source, field).iter().any(|s| s.starts_with(&prefix))
        }),
        "wildcard" => field_clause(args).is_some_and(|(field, value)| {
            let pattern = wildcard_regex(&clause_text(value, "value"));
            strings(source, field).iter().any(|s| pattern.is_match(s))
        }),
        "regexp" => field_clause(args).is_some_and(|(field, value)| {
            let Ok(pattern) = Regex::new(&format!("^(?:{})$", clause_text(value, "value"))) else {
                return false;
            };
            strings(source, field).iter().any(|s| pattern.is_match(s))
        }),
        "match_phrase" => field_clause(args).is_some_and(|(field, value)| {
            let phrase = tokens(&clause_text(value, "query"));
            strings(source, field)
                .iter()
                .any(|s| contains_phrase(&tokens(s), &phrase, false))
        }),
        "match_phrase_prefix" => field_clause(args).is_some_and(|(field, value)| {
            let phrase = tokens(&clause_text(value, "query"));
            strings(source, field)
                .iter()
                .any(|s| contains_phrase(&tokens(s), &phrase, true))
        }),
        "match" => field_clause(args).is_some_and(|(field, value)| {
            matches_any_token(source, field, &clause_text(value, "query"))
        }),
        "multi_match" => {
            let query = args.get("query").and_then(Value::as_str).unwrap_or_default();
            args.get("fields")
                .and_then(Value::as_array)
                .is_some_and(|fields| {
                    fields
                        .iter()
                        .filter_map(Value::as_str)
                        .any(|field| matches_any_token(source, field, query))
                })
        }
        "range" => field_clause(args).is_some_and(|(field, bounds)| {
            field_values(source, field)
                .iter()
                .filter_map(|v| numeric(v))
                .any(|v| in_range(v, bounds))
        }),
        "exists" => args
            .get("field")
            .and_then(Value::as_str)
            .is_some_and(|field| !field_values(source, field).is_empty()),
        _ => false,
    }
}

fn matches_bool(args: &Value, source: &Value) -> bool {
    let clauses = |name: &str| -> Vec<Value> {
        match args.get(name) {
            Some(Value::Array(items)) => items.clone(),
            Some(item @ Value::Object(_)) => vec![item.clone()],
            _ => Vec::new(),
        }
    };
    let must = clauses("must");
    let filter = clauses("filter");
    let should = clauses("should");
    let must_not = clauses("must_not");

    if !must.iter().chain(filter.iter()).all(|q| matches(q, source)) {
        return false;
    }
    if must_not.iter().any(|q| matches(q, source)) {
        return false;
    }
    let default_minimum = if must.is_empty() && filter.is_empty() { 1 } else { 0 };
    let minimum = args
        .get("minimum_should_match")
        .and_then(Value::as_u64)
        .unwrap_or(default_minimum) as usize;
    if should.is_empty() {
        return true;
    }
    should.iter().filter(|q| matches(q, source)).count() >= minimum
}

fn field_clause(args: &Value) -> Option<(&str, &Value)> {
    args.as_object()
        .and_then(|clause| clause.iter().next())
        .map(|(field, value)| (field.as_str(), value))
}

fn clause_text(value: &Value, key: &str) -> String {
    let value = value.get(key).unwrap_or(value);
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Values of a dotted field, flattening arrays at every level.
fn field_values(source: &Value, field: &str) -> Vec<Value> {
    let field = field.strip_suffix(KEYWORD_SUFFIX).unwrap_or(field);
    let mut current = vec![source.clone()];
    for part in field.split('.') {
        let mut next = Vec::new();
        for value in current {
            collect(value.get(part), &mut next);
        }
        current = next;
    }
    current
}

fn collect(value: Option<&Value>, into: &mut Vec<Value>) {
    match value {
        None | Some(Value::Null) => {}
        Some(Value::Array(items)) => {
            for item in items {
                collect(Some(item), into);
            }
        }
        Some(other) => into.push(other.clone()),
    }
}

fn strings(source: &Value, field: &str) -> Vec<String> {
    field_values(source, field)
        .into_iter()
        .map(|v| match v {
            Value::String(s) => s,
            other => other.to_string(),
        })
        .collect()
}

fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn contains_phrase(text: &[String], phrase: &[String], last_is_prefix: bool) -> bool {
    if phrase.is_empty() {
        return false;
    }
    text.windows(phrase.len()).any(|window| {
        window.iter().zip(phrase).enumerate().all(|(i, (t, p))| {
            if last_is_prefix && i == phrase.len() - 1 {
                t.starts_with(p.as_str())
            } else {
                t == p
            }
        })
    })
}

fn matches_any_token(source: &Value, field: &str, query: &str) -> bool {
    let wanted = tokens(query);
    strings(source, field)
        .iter()
        .any(|s| tokens(s).iter().any(|t| wanted.contains(t)))
}

fn wildcard_regex(pattern: &str) -> Regex {
    let mut expression = String::from("^");
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => expression.push_str(".*"),
            '?' => expression.push('.'),
            '\\' => {
                if let Some(escaped) = chars.next() {
                    expression.push_str(&regex::escape(&escaped.to_string()));
                }
            }
            other => expression.push_str(&regex::escape(&other.to_string())),
        }
    }
    expression.push('$');
    Regex::new(&expression).unwrap_or_else(|_| Regex::new("^$").unwrap())
}

fn same_value(stored: &Value, queried: &Value) -> bool {
    match (stored, queried) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Value::String(a), Value::String(b)) => {
            a == b || matches!((date_millis(a), date_millis(b)), (Some(x), Some(y)) if x == y)
        }
        (a, b) => a == b,
    }
}

fn date_millis(text: &str) -> Option<f64> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|d| d.timestamp_millis() as f64)
}

/// Numeric view of a value; dates become epoch milliseconds.
fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => date_millis(s).or_else(|| s.parse().ok()),
        _ => None,
    }
}

fn in_range(value: f64, bounds: &Value) -> bool {
    let bound = |key: &str| bounds.get(key).and_then(numeric);
    bound("gte").is_none_or(|b| value >= b)
        && bound("gt").is_none_or(|b| value > b)
        && bound("lte").is_none_or(|b| value <= b)
        && bound("lt").is_none_or(|b| value < b)
}

fn mapping_type(value: Value) -> Option<&'static str> {
    match value {
        Value::String(s) if date_millis(&s).is_some() => Some("date"),
        Value::String(_) => Some("text"),
        Value::Number(_) => Some("double"),
        Value::Bool(_) => Some("boolean"),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Sorting and source filtering
// ---------------------------------------------------------------------------

fn sort_orders(sort: Option<&Value>) -> Vec<(String, bool)> {
    sort.and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|clause| {
            let (field, order) = clause.as_object()?.iter().next()?;
            let ascending = order.get("order").and_then(Value::as_str) != Some("desc");
            Some((field.clone(), ascending))
        })
        .collect()
}

/// Sort hits and attach their sort values, missing values sorting last.
fn sort_hits(hits: &mut [SearchHit], orders: &[(String, bool)]) {
    if orders.is_empty() {
        return;
    }
    for hit in hits.iter_mut() {
        hit.sort = orders
            .iter()
            .map(|(field, _)| {
                field_values(&hit.source, field)
                    .into_iter()
                    .next()
                    .unwrap_or(Value::Null)
            })
            .collect();
    }
    hits.sort_by(|a, b| compare_keys(&a.sort, &b.sort, orders));
}

fn compare_keys(left: &[Value], right: &[Value], orders: &[(String, bool)]) -> CmpOrdering {
    for (i, (_, ascending)) in orders.iter().enumerate() {
        let ordering = match (left.get(i).unwrap_or(&Value::Null), right.get(i).unwrap_or(&Value::Null)) {
            (Value::Null, Value::Null) => CmpOrdering::Equal,
            (Value::Null, _) => CmpOrdering::Greater,
            (_, Value::Null) => CmpOrdering::Less,
            (l, r) => {
                let ordering = compare_values(l, r);
                if *ascending {
                    ordering
                } else {
                    ordering.reverse()
                }
            }
        };
        if ordering != CmpOrdering::Equal {
            return ordering;
        }
    }
    CmpOrdering::Equal
}

fn compare_values(left: &Value, right: &Value) -> CmpOrdering {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => l
            .as_f64()
            .unwrap_or(0.0)
            .total_cmp(&r.as_f64().unwrap_or(0.0)),
        (Value::String(l), Value::String(r)) => l.cmp(r),
        (l, r) => l.to_string().cmp(&r.to_string()),
    }
}

fn filter_source(hit: SearchHit, includes: Option<&Value>) -> SearchHit {
    if includes == Some(&Value::Bool(false)) {
        return SearchHit {
            source: Value::Object(Map::new()),
            ..hit
        };
    }
    let Some(paths) = includes.and_then(Value::as_array) else {
        return hit;
    };
    let mut filtered = Value::Object(Map::new());
    for path in paths.iter().filter_map(Value::as_str) {
        let parts: Vec<&str> = path.split('.').collect();
        if let Some(kept) = keep_path(&hit.source, &parts) {
            merge_into(&mut filtered, &kept);
        }
    }
    SearchHit {
        id: hit.id,
        source: filtered,
        sort: hit.sort,
    }
}

fn keep_path(value: &Value, parts: &[&str]) -> Option<Value> {
    let Some((first, rest)) = parts.split_first() else {
        return Some(value.clone());
    };
    match value {
        Value::Object(object) => {
            let kept = keep_path(object.get(*first)?, rest)?;
            Some(json!({ (*first): kept }))
        }
        Value::Array(items) => {
            let kept: Vec<Value> = items.iter().filter_map(|item| keep_path(item, parts)).collect();
            (!kept.is_empty()).then_some(Value::Array(kept))
        }
        _ => None,
    }
}

fn merge_into(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        merge_into(existing, value)
                    }
                    _ => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

// ---------------------------------------------------------------------------
// Aggregations
// ---------------------------------------------------------------------------

fn aggregate(aggs: &Map<String, Value>, hits: &[SearchHit]) -> Value {
    let mut results = Map::new();
    for (name, definition) in aggs {
        let Some((kind, args)) = definition.as_object().and_then(|d| d.iter().next()) else {
            continue;
        };
        let field = args.get("field").and_then(Value::as_str).unwrap_or_default();
        let result = match kind.as_str() {
            "terms" => terms(
                hits,
                field,
                args.get("size").and_then(Value::as_u64).unwrap_or(10),
                args.get("order").and_then(|order| order.get("_key")).is_some(),
            ),
            "percentiles" => percentiles(hits, field, args.get("percents")),
            "range" => ranges(hits, field, args.get("ranges")),
            "min" => metric(hits, field, |values| values.iter().copied().reduce(f64::min)),
            "max" => metric(hits, field, |values| values.iter().copied().reduce(f64::max)),
            "sum" => metric(hits, field, |values| Some(values.iter().sum())),
            "stats" => stats(hits, field),
            _ => continue,
        };
        results.insert(name.clone(), result);
    }
    Value::Object(results)
}

fn numbers(hits: &[SearchHit], field: &str) -> Vec<f64> {
    hits.iter()
        .flat_map(|hit| field_values(&hit.source, field))
        .filter_map(|v| numeric(&v))
        .collect()
}

fn terms(hits: &[SearchHit], field: &str, size: u64, by_key: bool) -> Value {
    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    for hit in hits {
        let unique: HashSet<String> = strings(&hit.source, field).into_iter().collect();
        for value in unique {
            *counts.entry(value).or_default() += 1;
        }
    }
    let mut buckets: Vec<(String, u64)> = counts.into_iter().collect();
    if !by_key {
        buckets.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    }
    let buckets: Vec<Value> = buckets
        .into_iter()
        .take(size as usize)
        .map(|(key, count)| json!({ "key": key, "doc_count": count }))
        .collect();
    json!({ "buckets": buckets })
}

/// Linearly interpolated percentiles, keyed like the backend response.
fn percentiles(hits: &[SearchHit], field: &str, percents: Option<&Value>) -> Value {
    let mut values = numbers(hits, field);
    values.sort_by(f64::total_cmp);
    let mut keyed = Map::new();
    for percent in percents
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_f64)
    {
        keyed.insert(format!("{:?}", percent), json!(percentile(&values, percent)));
    }
    json!({ "values": keyed })
}

pub fn percentile(sorted: &[f64], percent: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let rank = percent / 100.0 * last as f64;
    let below = rank.floor() as usize;
    let above = rank.ceil() as usize;
    let weight = rank - below as f64;
    Some(sorted[below] + (sorted[above] - sorted[below]) * weight)
}

fn ranges(hits: &[SearchHit], field: &str, definitions: Option<&Value>) -> Value {
    let buckets: Vec<Value> = definitions
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .map(|range| {
            let from = range.get("from").and_then(Value::as_f64);
            let to = range.get("to").and_then(Value::as_f64);
            let count = hits
                .iter()
                .filter(|hit| {
                    field_values(&hit.source, field)
                        .iter()
                        .filter_map(numeric)
                        .any(|v| from.is_none_or(|f| v >= f) && to.is_none_or(|t| v < t))
                })
                .count();
            let mut bucket = Map::new();
            if let Some(from) = from {
                bucket.insert("from".to_string(), json!(from));
            }
            if let Some(to) = to {
                bucket.insert("to".to_string(), json!(to));
            }
            bucket.insert("doc_count".to_string(), json!(count));
            Value::Object(bucket)
        })
        .collect();
    json!({ "buckets": buckets })
}

fn metric(hits: &[SearchHit], field: &str, compute: impl Fn(&[f64]) -> Option<f64>) -> Value {
    let values = numbers(hits, field);
    json!({ "value": compute(&values) })
}

fn stats(hits: &[SearchHit], field: &str) -> Value {
    let values = numbers(hits, field);
    if values.is_empty() {
        return json!({ "count": 0, "min": null, "max": null, "avg": null, "sum": 0.0 });
    }
    let sum: f64 = values.iter().sum();
    json!({
        "count": values.len(),
        "min": values.iter().copied().reduce(f64::min),
        "max": values.iter().copied().reduce(f64::max),
        "avg": sum / values.len() as f64,
        "sum": sum,
    })
}
