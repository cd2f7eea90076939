//! Search backend trait definition.
//!
//! This module defines the abstract interface the repository runs its
//! algorithms on, allowing for different document-search engines (OpenSearch,
//! Elasticsearch, an in-memory engine for tests, etc.).

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::SearchIndexError;
use crate::types::{BulkItemOutcome, SearchResponse, WriteOutcome};

/// Abstracts the underlying document-search engine.
///
/// Implementations are injected into `SearchRepository`. Query and aggregation
/// bodies use the OpenSearch query DSL as JSON. Index names are lower-cased by
/// the repository before they reach the backend.
///
/// All methods return `Result<T, SearchIndexError>` for consistent error
/// handling across different backend implementations.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Create an index with the given settings and mappings.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - If the index was created
    /// * `Ok(false)` - If the index already existed
    /// * `Err(SearchIndexError)` - If creation fails
    async fn create_index(&self, index: &str, settings: &Value) -> Result<bool, SearchIndexError>;

    /// Delete an index. Returns `false` if it did not exist.
    async fn delete_index(&self, index: &str) -> Result<bool, SearchIndexError>;

    async fn index_exists(&self, index: &str) -> Result<bool, SearchIndexError>;

    /// Make every write performed so far visible to searches.
    async fn refresh(&self, index: &str) -> Result<(), SearchIndexError>;

    /// Add field mappings to an existing index.
    async fn put_mapping(&self, index: &str, mapping: &Value) -> Result<(), SearchIndexError>;

    /// Get the live mapping of the given fields.
    ///
    /// The response follows the OpenSearch field mapping format:
    /// `{ "<index>": { "mappings": { "<field>": { "mapping": { "<leaf>": { "type": .. } } } } } }`.
    async fn get_field_mapping(
        &self,
        index: &str,
        fields: &[String],
    ) -> Result<Value, SearchIndexError>;

    /// Index a single document, creating or replacing it.
    async fn index_document(
        &self,
        index: &str,
        id: &str,
        source: &Value,
    ) -> Result<WriteOutcome, SearchIndexError>;

    /// Index several documents in one request.
    ///
    /// # Returns
    ///
    /// * `Ok(Vec<BulkItemOutcome>)` - One outcome per document; individual
    ///   failures do not fail the call
    /// * `Err(SearchIndexError)` - If the request as a whole fails
    async fn bulk_index(
        &self,
        index: &str,
        documents: Vec<(String, Value)>,
    ) -> Result<Vec<BulkItemOutcome>, SearchIndexError>;

    /// Get a stored document, `None` if it does not exist.
    async fn get_document(&self, index: &str, id: &str) -> Result<Option<Value>, SearchIndexError>;

    /// Delete a document. Returns `false` if it did not exist.
    async fn delete_document(&self, index: &str, id: &str) -> Result<bool, SearchIndexError>;

    /// Delete every document matching the query, returning how many were deleted.
    async fn delete_by_query(&self, index: &str, query: &Value) -> Result<u64, SearchIndexError>;

    /// Merge a partial document into an existing one.
    async fn update_document(
        &self,
        index: &str,
        id: &str,
        partial: &Value,
    ) -> Result<(), SearchIndexError>;

    /// Execute a search request body.
    async fn search(&self, index: &str, body: &Value) -> Result<SearchResponse, SearchIndexError>;

    /// Execute a search request body and open a scroll cursor on its results.
    async fn scroll_open(
        &self,
        index: &str,
        body: &Value,
        keep_alive: &str,
    ) -> Result<SearchResponse, SearchIndexError>;

    /// Fetch the next page of an open scroll cursor.
    async fn scroll_next(
        &self,
        scroll_id: &str,
        keep_alive: &str,
    ) -> Result<SearchResponse, SearchIndexError>;

    /// Release a scroll cursor.
    async fn clear_scroll(&self, scroll_id: &str) -> Result<(), SearchIndexError>;
}
