//! Search repository implementation.
//!
//! This module provides the main entry point of the search layer. Application
//! code uses it to manage catalog indices, save documents and run criterion
//! based searches, facets, scrolls and aggregates.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use catalog_search_shared::{
    fields, AttributeStats, Criterion, DocFilesSummary, Facet, FacetPage, FacetType, Indexable,
    Page, PageRequest, SearchKey, Sort,
};
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::bulk::{BulkSaveLightResult, BulkSaveResult};
use crate::cache::{CacheKey, Clock, ForwardingCache, SystemClock};
use crate::config::SearchRepositoryConfig;
use crate::errors::SearchIndexError;
use crate::facets;
use crate::interfaces::SearchBackend;
use crate::opensearch::{get_index_settings, IndexConfig};
use crate::paging::{SearchAfterReminders, SearchPosition};
use crate::query::{filtered_query, keyword_field};
use crate::retry::TimeoutRetry;
use crate::scroll::{extract_path, for_each_hit};
use crate::sort::{not_analyzed_field, resolve_sort};
use crate::summary::{FileLocation, FilesSummaryBuilder};
use crate::types::{SearchHit, SearchResponse, WriteOutcome};

/// The main repository for interacting with catalog indices.
///
/// This is the high-level API application code should use. It validates
/// documents, translates criteria, runs the facet passes, drives scrolls and
/// retries timed out searches, delegating every backend round-trip to a
/// `SearchBackend`.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use catalog_search_repository::{OpenSearchBackend, SearchRepository};
/// use catalog_search_shared::{Criterion, PageRequest, SearchKey};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = Arc::new(OpenSearchBackend::new("http://localhost:9200").await?);
/// let repository = SearchRepository::new(backend);
///
/// let key: SearchKey<serde_json::Value> = SearchKey::new("project1", ["DATA"]);
/// let page = repository
///     .search_all_limited(&key, &Criterion::exists("label"), &PageRequest::of(0, 20))
///     .await?;
/// println!("{} matches", page.total);
/// # Ok(())
/// # }
/// ```
pub struct SearchRepository {
    backend: Arc<dyn SearchBackend>,
    config: SearchRepositoryConfig,
    cache: ForwardingCache,
    reminders: SearchAfterReminders,
}

/// Terms aggregation size standing for "every value".
const ALL_TERMS: usize = i32::MAX as usize;
const TERMS_AGGREGATION: &str = "terms";

impl SearchRepository {
    /// Create a new SearchRepository with default configuration.
    pub fn new(backend: Arc<dyn SearchBackend>) -> Self {
        Self::with_config(backend, SearchRepositoryConfig::default())
    }

    /// Create a new SearchRepository with custom configuration.
    pub fn with_config(backend: Arc<dyn SearchBackend>, config: SearchRepositoryConfig) -> Self {
        Self::with_clock(backend, config, Arc::new(SystemClock))
    }

    /// Create a new SearchRepository whose forwarding cache uses `clock`.
    pub fn with_clock(
        backend: Arc<dyn SearchBackend>,
        config: SearchRepositoryConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let reminders = SearchAfterReminders::new(config.scroll_keep_alive, Arc::clone(&clock));
        let cache = ForwardingCache::with_clock(config.cache_ttl, clock);
        Self {
            backend,
            config,
            cache,
            reminders,
        }
    }

    pub fn config(&self) -> &SearchRepositoryConfig {
        &self.config
    }

    pub fn forwarding_cache(&self) -> &ForwardingCache {
        &self.cache
    }

    // ---------------------------------------------------------------------
    // Index management
    // ---------------------------------------------------------------------

    /// Create an index with the catalog settings and mappings.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - If the index was created
    /// * `Ok(false)` - If it already existed
    pub async fn create_index(&self, index: &str) -> Result<bool, SearchIndexError> {
        let config = IndexConfig::default().with_max_result_window(self.config.max_result_window);
        self.create_index_with(index, &get_index_settings(&config)).await
    }

    /// Create an index with explicit settings and mappings.
    pub async fn create_index_with(
        &self,
        index: &str,
        settings: &Value,
    ) -> Result<bool, SearchIndexError> {
        self.backend.create_index(&index_name(index), settings).await
    }

    pub async fn delete_index(&self, index: &str) -> Result<bool, SearchIndexError> {
        let index = index_name(index);
        self.cache.invalidate_index(&index);
        self.reminders.invalidate_index(&index);
        self.backend.delete_index(&index).await
    }

    pub async fn index_exists(&self, index: &str) -> Result<bool, SearchIndexError> {
        self.backend.index_exists(&index_name(index)).await
    }

    pub async fn refresh(&self, index: &str) -> Result<(), SearchIndexError> {
        self.backend.refresh(&index_name(index)).await
    }

    /// Add field mappings to an existing index.
    pub async fn put_mappings(&self, index: &str, mapping: &Value) -> Result<(), SearchIndexError> {
        self.backend.put_mapping(&index_name(index), mapping).await
    }

    // ---------------------------------------------------------------------
    // Documents
    // ---------------------------------------------------------------------

    /// Create or replace one document.
    ///
    /// The document must have a non-empty id and type; otherwise it is
    /// rejected before any backend call.
    pub async fn save<T>(&self, index: &str, document: &T) -> Result<WriteOutcome, SearchIndexError>
    where
        T: Indexable + Serialize + Sync,
    {
        validate_document(document)?;
        let source = to_source(document)?;
        self.backend
            .index_document(&index_name(index), document.doc_id(), &source)
            .await
    }

    /// Save documents in bulk and account for every outcome.
    pub async fn save_bulk<T>(
        &self,
        index: &str,
        documents: &[T],
    ) -> Result<BulkSaveResult, SearchIndexError>
    where
        T: Indexable + Serialize + Sync,
    {
        let result = BulkSaveResult::new();
        self.save_bulk_into(index, documents, &result).await?;
        Ok(result)
    }

    /// Save documents in bulk, recording outcomes into an existing result.
    ///
    /// Every document is validated first: a single malformed document fails
    /// the call before anything is sent. Documents that cannot be serialized
    /// or that the backend rejects are recorded as failures without failing
    /// the call. Batches larger than `max_batch_size` are sent as concurrent
    /// chunks.
    #[instrument(skip(self, documents, result), fields(documents = documents.len()))]
    pub async fn save_bulk_into<T>(
        &self,
        index: &str,
        documents: &[T],
        result: &BulkSaveResult,
    ) -> Result<(), SearchIndexError>
    where
        T: Indexable + Serialize + Sync,
    {
        for document in documents {
            validate_document(document)?;
        }
        if documents.is_empty() {
            return Ok(());
        }

        let index = index_name(index);
        let chunk_size = self.config.max_batch_size.unwrap_or(documents.len()).max(1);
        try_join_all(
            documents
                .chunks(chunk_size)
                .map(|chunk| self.save_chunk(&index, chunk, result)),
        )
        .await?;

        if self.config.refresh_after_bulk {
            self.backend.refresh(&index).await?;
        }

        info!(
            saved = result.saved_docs_count(),
            in_error = result.in_error_docs_count(),
            "Bulk save completed"
        );
        Ok(())
    }

    async fn save_chunk<T>(
        &self,
        index: &str,
        chunk: &[T],
        result: &BulkSaveResult,
    ) -> Result<(), SearchIndexError>
    where
        T: Indexable + Serialize + Sync,
    {
        let mut sessions: HashMap<&str, (Option<&str>, Option<&str>)> = HashMap::new();
        let mut sources = Vec::with_capacity(chunk.len());
        for document in chunk {
            match to_source(document) {
                Ok(source) => {
                    sessions.insert(
                        document.doc_id(),
                        (document.session(), document.session_owner()),
                    );
                    sources.push((document.doc_id().to_string(), source));
                }
                Err(e) => {
                    warn!(doc_id = %document.doc_id(), error = %e, "Document cannot be serialized");
                    result.record_failure(
                        document.doc_id(),
                        e,
                        document.session(),
                        document.session_owner(),
                    );
                }
            }
        }
        if sources.is_empty() {
            return Ok(());
        }

        let outcomes = self.backend.bulk_index(index, sources).await?;
        for outcome in outcomes {
            let (session, owner) = sessions.get(outcome.id.as_str()).copied().unwrap_or_default();
            match outcome.result {
                Ok(write) => result.record_success(&outcome.id, write, session, owner),
                Err(reason) => {
                    warn!(doc_id = %outcome.id, reason = %reason, "Document rejected by backend");
                    result.record_failure(&outcome.id, SearchIndexError::index(reason), session, owner);
                }
            }
        }
        Ok(())
    }

    /// Save documents in bulk and only return the two counters.
    pub async fn save_bulk_light<T>(
        &self,
        index: &str,
        documents: &[T],
    ) -> Result<BulkSaveLightResult, SearchIndexError>
    where
        T: Indexable + Serialize + Sync,
    {
        let result = self.save_bulk(index, documents).await?;
        Ok(BulkSaveLightResult::from(&result))
    }

    /// Save documents in bulk and return how many were saved.
    pub async fn save_bulk_count<T>(&self, index: &str, documents: &[T]) -> Result<usize, SearchIndexError>
    where
        T: Indexable + Serialize + Sync,
    {
        let result = self.save_bulk(index, documents).await?;
        Ok(result.saved_docs_count())
    }

    /// Get a document by id, `None` if it does not exist.
    pub async fn get<T: DeserializeOwned>(
        &self,
        index: &str,
        id: &str,
    ) -> Result<Option<T>, SearchIndexError> {
        let source = self.backend.get_document(&index_name(index), id).await?;
        source.map(|source| decode_source(id, source)).transpose()
    }

    /// Delete a document by id. Returns `false` if it did not exist.
    pub async fn delete(&self, index: &str, id: &str) -> Result<bool, SearchIndexError> {
        self.backend.delete_document(&index_name(index), id).await
    }

    /// Delete every document matching `criterion`.
    pub async fn delete_by_query(
        &self,
        index: &str,
        criterion: &Criterion,
    ) -> Result<u64, SearchIndexError> {
        let deleted = self
            .backend
            .delete_by_query(&index_name(index), &checked_query(criterion, &[])?)
            .await?;
        debug!(index = %index, deleted, "Deleted by query");
        Ok(deleted)
    }

    /// Delete every document of an index, keeping the index itself.
    pub async fn delete_all(&self, index: &str) -> Result<u64, SearchIndexError> {
        self.delete_by_query(index, &Criterion::Empty).await
    }

    /// Merge some fields into an existing document.
    ///
    /// A key of the form `parent.child` updates `child` inside the `parent`
    /// sub-object; only the first dot is interpreted.
    pub async fn merge(
        &self,
        index: &str,
        id: &str,
        fields: &BTreeMap<String, Value>,
    ) -> Result<(), SearchIndexError> {
        if fields.is_empty() {
            return Ok(());
        }
        self.backend
            .update_document(&index_name(index), id, &nest_dotted_fields(fields))
            .await
    }

    // ---------------------------------------------------------------------
    // Searches
    // ---------------------------------------------------------------------

    /// Offset-paged search, bounded by the backend result window.
    pub async fn search_all_limited<T: DeserializeOwned>(
        &self,
        key: &SearchKey<T>,
        criterion: &Criterion,
        page: &PageRequest,
    ) -> Result<Page<T>, SearchIndexError> {
        let response = self.search_page(key, criterion, page, None).await?;
        let content = decode_hits(response.hits)?;
        Ok(Page::new(content, page.clone(), response.total))
    }

    /// Paged search with optional facets.
    ///
    /// Pages inside the backend result window are fetched directly. Pages
    /// past it are reached with `search_after`, one window at a time, from
    /// the closest position a previous call reached; a page no larger than
    /// the window is required. Numeric and date facets cost a second
    /// round-trip. Facets are only computed when at least one document
    /// matches.
    pub async fn search<T: DeserializeOwned>(
        &self,
        key: &SearchKey<T>,
        criterion: &Criterion,
        page: &PageRequest,
        facets: &BTreeMap<String, FacetType>,
    ) -> Result<FacetPage<T>, SearchIndexError> {
        let first_aggs = (!facets.is_empty())
            .then(|| facets::first_pass_aggregations(facets, self.config.string_facet_size));
        let first = self.fetch_page(key, criterion, page, first_aggs).await?;
        let computed = self
            .compute_facets(key, criterion, facets, first.total, first.aggregations.as_ref())
            .await?;

        let content = decode_hits(first.hits)?;
        Ok(FacetPage::new(
            Page::new(content, page.clone(), first.total),
            computed,
        ))
    }

    /// Decode facets from first-pass results, running the range pass when a
    /// numeric or date facet needs it.
    async fn compute_facets<Q, R>(
        &self,
        key: &SearchKey<Q, R>,
        criterion: &Criterion,
        facets: &BTreeMap<String, FacetType>,
        total: u64,
        first_aggs: Option<&Value>,
    ) -> Result<Vec<Facet>, SearchIndexError> {
        if facets.is_empty() || total == 0 {
            return Ok(Vec::new());
        }
        let mut second = None;
        if facets::needs_second_pass(facets) {
            let first_values = first_aggs.cloned().unwrap_or(Value::Null);
            let second_aggs = facets::second_pass_aggregations(facets, &first_values);
            if !second_aggs.is_empty() {
                let body = json!({
                    "query": checked_query(criterion, key.search_types())?,
                    "size": 0,
                    "aggs": second_aggs,
                });
                second = Some(self.execute_search(key.index(), &body).await?);
            }
        }
        Ok(facets::decode_facets(
            facets,
            first_aggs,
            second.as_ref().and_then(|r| r.aggregations.as_ref()),
        ))
    }

    /// Every value of `attribute` over all matches, deduplicated and in a
    /// stable order.
    ///
    /// Results are cached per (key, criterion, attribute) and reused until
    /// they have not been asked for during the cache time-to-live.
    pub async fn search_projected<Q, R: DeserializeOwned>(
        &self,
        key: &SearchKey<Q, R>,
        criterion: &Criterion,
        attribute: &str,
    ) -> Result<Vec<R>, SearchIndexError> {
        let values = self.projected_values(key, criterion, attribute).await?;
        values.iter().cloned().map(decode_value).collect()
    }

    /// One page of [`SearchRepository::search_projected`].
    pub async fn search_projected_page<Q, R: DeserializeOwned>(
        &self,
        key: &SearchKey<Q, R>,
        criterion: &Criterion,
        attribute: &str,
        page: &PageRequest,
    ) -> Result<Page<R>, SearchIndexError> {
        let values = self.projected_values(key, criterion, attribute).await?;
        let start = page.offset().min(values.len());
        let end = start.saturating_add(page.size).min(values.len());
        let content = values[start..end]
            .iter()
            .cloned()
            .map(decode_value)
            .collect::<Result<Vec<R>, _>>()?;
        Ok(Page::new(content, page.clone(), values.len() as u64))
    }

    /// Projected values kept by `filter` and mapped through `transform`,
    /// with facets over the projected attribute.
    ///
    /// Values come from the forwarding cache like
    /// [`SearchRepository::search_projected`]. Facet names are attribute
    /// paths relative to `attribute`, and so are the returned facets.
    pub async fn search_projected_with_facets<Q, R, U, P, M>(
        &self,
        key: &SearchKey<Q, R>,
        criterion: &Criterion,
        attribute: &str,
        filter: P,
        transform: M,
        facets: &BTreeMap<String, FacetType>,
    ) -> Result<(Vec<U>, Vec<Facet>), SearchIndexError>
    where
        R: DeserializeOwned,
        P: Fn(&R) -> bool,
        M: Fn(R) -> U,
    {
        let values = self.projected_values(key, criterion, attribute).await?;
        let mut results = Vec::new();
        for value in values.iter() {
            let value: R = decode_value(value.clone())?;
            if filter(&value) {
                results.push(transform(value));
            }
        }

        let prefix = format!("{}.", attribute);
        let prefixed: BTreeMap<String, FacetType> = facets
            .iter()
            .map(|(name, facet_type)| (format!("{}{}", prefix, name), *facet_type))
            .collect();
        let mut computed = Vec::new();
        if !prefixed.is_empty() {
            let first_aggs = facets::first_pass_aggregations(&prefixed, self.config.string_facet_size);
            let first = self.aggregate(key, criterion, first_aggs).await?;
            computed = self
                .compute_facets(key, criterion, &prefixed, first.total, first.aggregations.as_ref())
                .await?;
        }
        let computed = computed
            .into_iter()
            .map(|facet| strip_facet_prefix(facet, &prefix))
            .collect();
        Ok((results, computed))
    }

    async fn projected_values<Q, R>(
        &self,
        key: &SearchKey<Q, R>,
        criterion: &Criterion,
        attribute: &str,
    ) -> Result<Arc<Vec<Value>>, SearchIndexError> {
        let cache_key = CacheKey::new(key, criterion, attribute)?;
        self.cache
            .get_or_load(cache_key, move || async move {
                let mut values = Vec::new();
                self.scroll_projected(key, criterion, attribute, |value| {
                    values.push(value);
                    Ok(())
                })
                .await?;
                Ok(values)
            })
            .await
    }

    /// Search one value across several fields.
    pub async fn multi_fields_search<T: DeserializeOwned>(
        &self,
        key: &SearchKey<T>,
        value: &str,
        fields: &[&str],
        page: &PageRequest,
    ) -> Result<Page<T>, SearchIndexError> {
        let criterion = Criterion::multi_match(fields.iter().copied(), value);
        self.search_all_limited(key, &criterion, page).await
    }

    /// Number of documents matching `criterion`.
    pub async fn count<Q, R>(
        &self,
        key: &SearchKey<Q, R>,
        criterion: &Criterion,
    ) -> Result<u64, SearchIndexError> {
        let response = self.aggregate(key, criterion, Map::new()).await?;
        Ok(response.total)
    }

    /// Sum of a numeric attribute over the matches; 0 when nothing matches.
    pub async fn sum<Q, R>(
        &self,
        key: &SearchKey<Q, R>,
        criterion: &Criterion,
        attribute: &str,
    ) -> Result<f64, SearchIndexError> {
        let value = self.scalar_aggregation(key, criterion, "sum", attribute).await?;
        Ok(value.unwrap_or(0.0))
    }

    /// Earliest value of a date attribute over the matches.
    pub async fn min_date<Q, R>(
        &self,
        key: &SearchKey<Q, R>,
        criterion: &Criterion,
        attribute: &str,
    ) -> Result<Option<DateTime<Utc>>, SearchIndexError> {
        let millis = self.scalar_aggregation(key, criterion, "min", attribute).await?;
        Ok(millis.and_then(|m| DateTime::<Utc>::from_timestamp_millis(m as i64)))
    }

    /// Latest value of a date attribute over the matches.
    pub async fn max_date<Q, R>(
        &self,
        key: &SearchKey<Q, R>,
        criterion: &Criterion,
        attribute: &str,
    ) -> Result<Option<DateTime<Utc>>, SearchIndexError> {
        let millis = self.scalar_aggregation(key, criterion, "max", attribute).await?;
        Ok(millis.and_then(|m| DateTime::<Utc>::from_timestamp_millis(m as i64)))
    }

    /// Distinct values of `attribute` over the matches.
    ///
    /// Text attributes are aggregated on their `.keyword` sibling.
    pub async fn unique<Q, R>(
        &self,
        key: &SearchKey<Q, R>,
        criterion: &Criterion,
        attribute: &str,
    ) -> Result<BTreeSet<String>, SearchIndexError> {
        let terms = self.terms(key, criterion, attribute, ALL_TERMS, false).await?;
        Ok(terms.into_iter().collect())
    }

    /// The `max_count` alphabetically first distinct values of `attribute`.
    pub async fn unique_alpha_sorted<Q, R>(
        &self,
        key: &SearchKey<Q, R>,
        criterion: &Criterion,
        attribute: &str,
        max_count: usize,
    ) -> Result<BTreeSet<String>, SearchIndexError> {
        if max_count == 0 {
            return Ok(BTreeSet::new());
        }
        let terms = self.terms(key, criterion, attribute, max_count, true).await?;
        Ok(terms.into_iter().collect())
    }

    async fn terms<Q, R>(
        &self,
        key: &SearchKey<Q, R>,
        criterion: &Criterion,
        attribute: &str,
        size: usize,
        alphabetical: bool,
    ) -> Result<Vec<String>, SearchIndexError> {
        let field = not_analyzed_field(self.backend.as_ref(), key.index(), attribute).await?;
        let mut terms = json!({ "field": field, "size": size });
        if alphabetical {
            terms["order"] = json!({ "_key": "asc" });
        }
        let mut aggs = Map::new();
        aggs.insert(TERMS_AGGREGATION.to_string(), json!({ "terms": terms }));
        let response = self.aggregate(key, criterion, aggs).await?;

        let buckets = response
            .aggregation(TERMS_AGGREGATION)
            .and_then(|agg| agg.get("buckets"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(buckets.iter().filter_map(bucket_key).collect())
    }

    /// Count, min, max, average and sum of each attribute over the matches.
    ///
    /// Attributes must be numeric or dates.
    pub async fn stats<Q, R>(
        &self,
        key: &SearchKey<Q, R>,
        criterion: &Criterion,
        attributes: &[&str],
    ) -> Result<BTreeMap<String, AttributeStats>, SearchIndexError> {
        let aggs: Map<String, Value> = attributes
            .iter()
            .map(|attribute| (attribute.to_string(), json!({ "stats": { "field": attribute } })))
            .collect();
        let response = self.get_aggregations(key, criterion, aggs).await?;
        Ok(attributes
            .iter()
            .map(|attribute| (attribute.to_string(), decode_stats(response.get(*attribute))))
            .collect())
    }

    /// Run native aggregations over the matches and return their raw results.
    pub async fn get_aggregations<Q, R>(
        &self,
        key: &SearchKey<Q, R>,
        criterion: &Criterion,
        aggs: Map<String, Value>,
    ) -> Result<Value, SearchIndexError> {
        let response = self.aggregate(key, criterion, aggs).await?;
        Ok(response
            .aggregations
            .unwrap_or_else(|| Value::Object(Map::new())))
    }

    /// Add the internally stored files of the matches to `summary`.
    ///
    /// Only files with a strictly positive size count; their sizes are
    /// summed. Sub-summaries are keyed by the values of `discriminant`
    /// fully matching the `discriminant_include` pattern, if any.
    pub async fn compute_internal_data_files_summary<Q, R>(
        &self,
        key: &SearchKey<Q, R>,
        criterion: &Criterion,
        discriminant: &str,
        discriminant_include: Option<&str>,
        summary: &mut DocFilesSummary,
        file_types: &[&str],
    ) -> Result<(), SearchIndexError> {
        let builder =
            FilesSummaryBuilder::new(FileLocation::Internal, discriminant, discriminant_include, file_types)?;
        self.compute_files_summary(key, criterion, builder, summary).await
    }

    /// Add the externally referenced files of the matches to `summary`.
    ///
    /// Only files with an http or https uri count; no size is summed.
    pub async fn compute_external_data_files_summary<Q, R>(
        &self,
        key: &SearchKey<Q, R>,
        criterion: &Criterion,
        discriminant: &str,
        discriminant_include: Option<&str>,
        summary: &mut DocFilesSummary,
        file_types: &[&str],
    ) -> Result<(), SearchIndexError> {
        let builder =
            FilesSummaryBuilder::new(FileLocation::External, discriminant, discriminant_include, file_types)?;
        self.compute_files_summary(key, criterion, builder, summary).await
    }

    #[instrument(skip(self, key, criterion, builder, summary), fields(index = %key.index()))]
    async fn compute_files_summary<Q, R>(
        &self,
        key: &SearchKey<Q, R>,
        criterion: &Criterion,
        mut builder: FilesSummaryBuilder,
        summary: &mut DocFilesSummary,
    ) -> Result<(), SearchIndexError> {
        let body = json!({
            "query": checked_query(criterion, key.search_types())?,
            "size": self.config.scroll_page_size,
            "sort": ["_doc"],
            "_source": builder.source_paths(),
        });
        let documents = for_each_hit(
            self.backend.as_ref(),
            &self.timeout_retry(),
            key.index(),
            &body,
            &self.config.keep_alive_param(),
            |hit| {
                builder.record(&hit.source);
                Ok(())
            },
        )
        .await?;
        builder.merge_into(summary);
        debug!(documents, files = summary.files_count, "Data files summary computed");
        Ok(())
    }

    /// Call `on_document` once per matching document, whatever their number.
    ///
    /// A document that cannot be decoded, or an error returned by the
    /// callback, stops the iteration and is returned.
    ///
    /// # Returns
    ///
    /// * `Ok(u64)` - The number of documents passed to the callback
    #[instrument(skip(self, key, criterion, on_document), fields(index = %key.index()))]
    pub async fn search_all<T, F>(
        &self,
        key: &SearchKey<T>,
        criterion: &Criterion,
        mut on_document: F,
    ) -> Result<u64, SearchIndexError>
    where
        T: DeserializeOwned,
        F: FnMut(T) -> Result<(), SearchIndexError>,
    {
        let body = json!({
            "query": checked_query(criterion, key.search_types())?,
            "size": self.config.scroll_page_size,
            "sort": ["_doc"],
        });
        for_each_hit(
            self.backend.as_ref(),
            &self.timeout_retry(),
            key.index(),
            &body,
            &self.config.keep_alive_param(),
            |hit| on_document(decode_source(&hit.id, hit.source)?),
        )
        .await
    }

    /// Call `on_value` once per value of `attribute` over all matches.
    ///
    /// Array-valued attributes yield one call per element. Values are not
    /// deduplicated.
    ///
    /// # Returns
    ///
    /// * `Ok(u64)` - The number of values passed to the callback
    pub async fn search_all_projected<Q, R, F>(
        &self,
        key: &SearchKey<Q, R>,
        criterion: &Criterion,
        attribute: &str,
        mut on_value: F,
    ) -> Result<u64, SearchIndexError>
    where
        R: DeserializeOwned,
        F: FnMut(R) -> Result<(), SearchIndexError>,
    {
        self.scroll_projected(key, criterion, attribute, |value| on_value(decode_value(value)?))
            .await
    }

    #[instrument(skip(self, key, criterion, on_value), fields(index = %key.index()))]
    async fn scroll_projected<Q, R, F>(
        &self,
        key: &SearchKey<Q, R>,
        criterion: &Criterion,
        attribute: &str,
        mut on_value: F,
    ) -> Result<u64, SearchIndexError>
    where
        F: FnMut(Value) -> Result<(), SearchIndexError>,
    {
        let body = json!({
            "query": checked_query(criterion, key.search_types())?,
            "size": self.config.scroll_page_size,
            "sort": ["_doc"],
            "_source": [attribute],
        });
        let mut values = 0u64;
        for_each_hit(
            self.backend.as_ref(),
            &self.timeout_retry(),
            key.index(),
            &body,
            &self.config.keep_alive_param(),
            |hit: SearchHit| {
                for value in extract_path(&hit.source, attribute) {
                    on_value(value)?;
                    values += 1;
                }
                Ok(())
            },
        )
        .await?;
        Ok(values)
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    /// One page of hits, going past the result window when needed.
    async fn fetch_page<Q, R>(
        &self,
        key: &SearchKey<Q, R>,
        criterion: &Criterion,
        page: &PageRequest,
        aggs: Option<Map<String, Value>>,
    ) -> Result<SearchResponse, SearchIndexError> {
        let window = self.config.max_result_window;
        let offset = page.offset();
        if offset.saturating_add(page.size) <= window {
            return self.search_page(key, criterion, page, aggs).await;
        }
        if page.size > window {
            return Err(SearchIndexError::result_window_exceeded(offset, page.size, window));
        }
        self.deep_page(key, criterion, page, aggs).await
    }

    #[instrument(skip(self, key, criterion, page, aggs), fields(index = %key.index(), offset = page.offset()))]
    async fn deep_page<Q, R>(
        &self,
        key: &SearchKey<Q, R>,
        criterion: &Criterion,
        page: &PageRequest,
        aggs: Option<Map<String, Value>>,
    ) -> Result<SearchResponse, SearchIndexError> {
        let window = self.config.max_result_window;
        let target = page.offset();
        let query = checked_query(criterion, key.search_types())?;
        let sort = self.search_after_sort(key.index(), page.sort.as_ref()).await?;
        let position = SearchPosition::new(key, criterion, &sort)?;

        let (mut reached, mut after) = match self.reminders.closest(&position, target, window) {
            Some((offset, sort_values)) => (offset, Some(sort_values)),
            None => (0, None),
        };
        let mut exhausted = false;
        while reached < target {
            let step = window.min(target - reached);
            let mut body = json!({
                "query": query,
                "size": step,
                "sort": sort,
                "_source": false,
            });
            if let Some(sort_values) = &after {
                body["search_after"] = Value::Array(sort_values.clone());
            }
            let response = self.execute_search(key.index(), &body).await?;
            let fetched = response.hits.len();
            let Some(last) = response.hits.into_iter().last() else {
                exhausted = true;
                break;
            };
            if last.sort.is_empty() {
                return Err(SearchIndexError::parse("sorted search hit without sort values"));
            }
            reached += fetched;
            self.reminders.remember(&position, reached, last.sort.clone());
            after = Some(last.sort);
            if fetched < step {
                exhausted = true;
                break;
            }
        }
        debug!(reached, exhausted, "Advanced with search after");

        let mut body = json!({
            "query": query,
            "size": if exhausted { 0 } else { page.size },
            "sort": sort,
            "track_total_hits": true,
        });
        if let Some(sort_values) = after {
            body["search_after"] = Value::Array(sort_values);
        }
        if let Some(aggs) = aggs.filter(|aggs| !aggs.is_empty()) {
            body["aggs"] = Value::Object(aggs);
        }
        let response = self.execute_search(key.index(), &body).await?;
        if let Some(last) = response.hits.last() {
            self.reminders
                .remember(&position, target + response.hits.len(), last.sort.clone());
        }
        Ok(response)
    }

    /// Resolved sort of a deep page, ending with the document id so that
    /// every hit has a distinct position.
    async fn search_after_sort(
        &self,
        index: &str,
        sort: Option<&Sort>,
    ) -> Result<Vec<Value>, SearchIndexError> {
        let mut clauses = match sort.filter(|sort| !sort.is_empty()) {
            Some(sort) => resolve_sort(self.backend.as_ref(), index, sort).await?,
            None => Vec::new(),
        };
        let id_keyword = keyword_field(fields::DOC_ID);
        let sorted_by_id = clauses
            .iter()
            .any(|clause| clause.get(fields::DOC_ID).is_some() || clause.get(&id_keyword).is_some());
        if !sorted_by_id {
            clauses.push(json!({ (fields::DOC_ID): { "order": "asc" } }));
        }
        Ok(clauses)
    }

    async fn search_page<Q, R>(
        &self,
        key: &SearchKey<Q, R>,
        criterion: &Criterion,
        page: &PageRequest,
        aggs: Option<Map<String, Value>>,
    ) -> Result<SearchResponse, SearchIndexError> {
        let offset = page.offset();
        if offset.saturating_add(page.size) > self.config.max_result_window {
            return Err(SearchIndexError::result_window_exceeded(
                offset,
                page.size,
                self.config.max_result_window,
            ));
        }

        let mut body = json!({
            "query": checked_query(criterion, key.search_types())?,
            "from": offset,
            "size": page.size,
            "track_total_hits": true,
        });
        if let Some(sort) = page.sort.as_ref().filter(|sort| !sort.is_empty()) {
            let clauses = resolve_sort(self.backend.as_ref(), key.index(), sort).await?;
            body["sort"] = Value::Array(clauses);
        }
        if let Some(aggs) = aggs.filter(|aggs| !aggs.is_empty()) {
            body["aggs"] = Value::Object(aggs);
        }
        self.execute_search(key.index(), &body).await
    }

    async fn aggregate<Q, R>(
        &self,
        key: &SearchKey<Q, R>,
        criterion: &Criterion,
        aggs: Map<String, Value>,
    ) -> Result<SearchResponse, SearchIndexError> {
        let mut body = json!({
            "query": checked_query(criterion, key.search_types())?,
            "size": 0,
            "track_total_hits": true,
        });
        if !aggs.is_empty() {
            body["aggs"] = Value::Object(aggs);
        }
        self.execute_search(key.index(), &body).await
    }

    /// Value of a single-value metric aggregation; `None` when not finite.
    async fn scalar_aggregation<Q, R>(
        &self,
        key: &SearchKey<Q, R>,
        criterion: &Criterion,
        kind: &str,
        attribute: &str,
    ) -> Result<Option<f64>, SearchIndexError> {
        let mut aggs = Map::new();
        aggs.insert(kind.to_string(), json!({ (kind): { "field": attribute } }));
        let response = self.aggregate(key, criterion, aggs).await?;
        Ok(response
            .aggregation(kind)
            .and_then(|agg| agg.get("value"))
            .and_then(Value::as_f64)
            .filter(|value| value.is_finite()))
    }

    /// Run a search, retrying while the backend reports a timeout.
    async fn execute_search(&self, index: &str, body: &Value) -> Result<SearchResponse, SearchIndexError> {
        let backend = self.backend.as_ref();
        self.timeout_retry()
            .run(index, || backend.search(index, body))
            .await
    }

    fn timeout_retry(&self) -> TimeoutRetry {
        TimeoutRetry::from_config(&self.config)
    }
}

fn index_name(index: &str) -> String {
    index.to_lowercase()
}

/// Translate a criterion after checking its tree is well formed.
fn checked_query(criterion: &Criterion, search_types: &[String]) -> Result<Value, SearchIndexError> {
    criterion.validate()?;
    Ok(filtered_query(criterion, search_types))
}

fn bucket_key(bucket: &Value) -> Option<String> {
    if let Some(text) = bucket.get("key_as_string").and_then(Value::as_str) {
        return Some(text.to_string());
    }
    match bucket.get("key")? {
        Value::String(text) => Some(text.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn decode_stats(aggregation: Option<&Value>) -> AttributeStats {
    let Some(aggregation) = aggregation else {
        return AttributeStats::default();
    };
    let finite = |name: &str| {
        aggregation
            .get(name)
            .and_then(Value::as_f64)
            .filter(|value| value.is_finite())
    };
    AttributeStats {
        count: aggregation.get("count").and_then(Value::as_u64).unwrap_or(0),
        min: finite("min"),
        max: finite("max"),
        avg: finite("avg"),
        sum: finite("sum").unwrap_or(0.0),
    }
}

/// Make a facet name relative again by removing `prefix`.
fn strip_facet_prefix(facet: Facet, prefix: &str) -> Facet {
    let strip = |name: String| match name.strip_prefix(prefix) {
        Some(relative) => relative.to_string(),
        None => name,
    };
    match facet {
        Facet::String(mut f) => {
            f.attribute_name = strip(f.attribute_name);
            Facet::String(f)
        }
        Facet::Numeric(mut f) => {
            f.attribute_name = strip(f.attribute_name);
            Facet::Numeric(f)
        }
        Facet::Date(mut f) => {
            f.attribute_name = strip(f.attribute_name);
            Facet::Date(f)
        }
    }
}

fn validate_document<T: Indexable>(document: &T) -> Result<(), SearchIndexError> {
    if document.doc_id().trim().is_empty() {
        return Err(SearchIndexError::validation("document id is required"));
    }
    if document.doc_type().trim().is_empty() {
        return Err(SearchIndexError::validation(format!(
            "document type is required (id: {})",
            document.doc_id()
        )));
    }
    Ok(())
}

/// Serialize a document, making sure it carries its id and type fields.
fn to_source<T: Indexable + Serialize>(document: &T) -> Result<Value, SearchIndexError> {
    let mut source = serde_json::to_value(document)
        .map_err(|e| SearchIndexError::serialization(format!("{}: {}", document.doc_id(), e)))?;
    let Some(object) = source.as_object_mut() else {
        return Err(SearchIndexError::serialization(format!(
            "{}: document is not a JSON object",
            document.doc_id()
        )));
    };
    object
        .entry(catalog_search_shared::fields::DOC_ID)
        .or_insert_with(|| Value::String(document.doc_id().to_string()));
    object
        .entry(catalog_search_shared::fields::TYPE)
        .or_insert_with(|| Value::String(document.doc_type().to_string()));
    Ok(source)
}

fn decode_source<T: DeserializeOwned>(id: &str, source: Value) -> Result<T, SearchIndexError> {
    serde_json::from_value(source)
        .map_err(|e| SearchIndexError::parse(format!("document {}: {}", id, e)))
}

fn decode_value<T: DeserializeOwned>(value: Value) -> Result<T, SearchIndexError> {
    serde_json::from_value(value).map_err(|e| SearchIndexError::parse(e.to_string()))
}

fn decode_hits<T: DeserializeOwned>(hits: Vec<SearchHit>) -> Result<Vec<T>, SearchIndexError> {
    hits.into_iter()
        .map(|hit| decode_source(&hit.id, hit.source))
        .collect()
}

/// Turn `{"a.b": 1, "c": 2}` into `{"a": {"b": 1}, "c": 2}`.
fn nest_dotted_fields(fields: &BTreeMap<String, Value>) -> Value {
    let mut root = Map::new();
    for (key, value) in fields {
        match key.split_once('.') {
            Some((parent, child)) => {
                let entry = root
                    .entry(parent.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                if !entry.is_object() {
                    *entry = Value::Object(Map::new());
                }
                if let Value::Object(children) = entry {
                    children.insert(child.to_string(), value.clone());
                }
            }
            None => {
                root.insert(key.clone(), value.clone());
            }
        }
    }
    Value::Object(root)
}
