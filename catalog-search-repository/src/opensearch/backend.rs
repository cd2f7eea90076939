//! OpenSearch backend implementation.
//!
//! This module provides the concrete implementation of `SearchBackend` using
//! the OpenSearch Rust crate.

use async_trait::async_trait;
use opensearch::{
    http::{
        request::JsonBody,
        response::Response,
        transport::{SingleNodeConnectionPool, TransportBuilder},
    },
    indices::{
        IndicesCreateParts, IndicesDeleteParts, IndicesExistsParts, IndicesGetFieldMappingParts,
        IndicesPutMappingParts, IndicesRefreshParts,
    },
    BulkParts, ClearScrollParts, DeleteByQueryParts, DeleteParts, GetParts, IndexParts, OpenSearch,
    ScrollParts, SearchParts, UpdateParts,
};
use serde_json::{json, Value};
use tracing::{debug, error, info};
use url::Url;

use crate::errors::SearchIndexError;
use crate::interfaces::SearchBackend;
use crate::types::{BulkItemOutcome, SearchResponse, WriteOutcome};

/// OpenSearch backend implementation.
///
/// # Example
///
/// ```ignore
/// use catalog_search_repository::OpenSearchBackend;
///
/// let backend = OpenSearchBackend::new("http://localhost:9200").await?;
/// backend.ping().await?;
/// ```
pub struct OpenSearchBackend {
    client: OpenSearch,
}

impl OpenSearchBackend {
    /// Create a new OpenSearch backend connected to the specified URL.
    ///
    /// # Arguments
    ///
    /// * `url` - The OpenSearch server URL (e.g., "http://localhost:9200")
    ///
    /// # Returns
    ///
    /// * `Ok(OpenSearchBackend)` - A new backend instance
    /// * `Err(SearchIndexError)` - If connection setup fails
    pub async fn new(url: &str) -> Result<Self, SearchIndexError> {
        let parsed_url =
            Url::parse(url).map_err(|e| SearchIndexError::connection(e.to_string()))?;

        let conn_pool = SingleNodeConnectionPool::new(parsed_url);
        let transport = TransportBuilder::new(conn_pool)
            .disable_proxy()
            .build()
            .map_err(|e| SearchIndexError::connection(e.to_string()))?;

        let client = OpenSearch::new(transport);

        info!(url = %url, "Created OpenSearch backend");

        Ok(Self { client })
    }

    /// Check that the cluster answers.
    pub async fn ping(&self) -> Result<(), SearchIndexError> {
        let response = self.client.ping().send().await?;
        let status = response.status_code();
        if !status.is_success() {
            return Err(SearchIndexError::connection(format!(
                "Ping failed with status {}",
                status
            )));
        }
        Ok(())
    }
}

/// Fail with `make_error` when the response status is not a success.
async fn ensure_success(
    response: Response,
    action: &str,
    make_error: fn(String) -> SearchIndexError,
) -> Result<Response, SearchIndexError> {
    let status = response.status_code();
    if status.is_success() {
        return Ok(response);
    }
    let error_body = response.text().await.unwrap_or_default();
    error!(status = %status, body = %error_body, action = action, "Request failed");
    Err(make_error(format!(
        "{} failed with status {}: {}",
        action, status, error_body
    )))
}

fn write_outcome(result: Option<&str>) -> WriteOutcome {
    match result {
        Some("created") => WriteOutcome::Created,
        _ => WriteOutcome::Updated,
    }
}

#[async_trait]
impl SearchBackend for OpenSearchBackend {
    async fn create_index(&self, index: &str, settings: &Value) -> Result<bool, SearchIndexError> {
        if self.index_exists(index).await? {
            debug!(index = %index, "Index already exists");
            return Ok(false);
        }

        let response = self
            .client
            .indices()
            .create(IndicesCreateParts::Index(index))
            .body(settings)
            .send()
            .await?;
        ensure_success(response, "Create index", SearchIndexError::IndexCreationError).await?;

        info!(index = %index, "Created index");
        Ok(true)
    }

    async fn delete_index(&self, index: &str) -> Result<bool, SearchIndexError> {
        let response = self
            .client
            .indices()
            .delete(IndicesDeleteParts::Index(&[index]))
            .send()
            .await?;

        // 404 is acceptable - index may not exist
        if response.status_code().as_u16() == 404 {
            return Ok(false);
        }
        ensure_success(response, "Delete index", SearchIndexError::DeleteError).await?;

        info!(index = %index, "Deleted index");
        Ok(true)
    }

    async fn index_exists(&self, index: &str) -> Result<bool, SearchIndexError> {
        let response = self
            .client
            .indices()
            .exists(IndicesExistsParts::Index(&[index]))
            .send()
            .await?;
        Ok(response.status_code().is_success())
    }

    async fn refresh(&self, index: &str) -> Result<(), SearchIndexError> {
        let response = self
            .client
            .indices()
            .refresh(IndicesRefreshParts::Index(&[index]))
            .send()
            .await?;
        ensure_success(response, "Refresh", SearchIndexError::BackendError).await?;
        Ok(())
    }

    async fn put_mapping(&self, index: &str, mapping: &Value) -> Result<(), SearchIndexError> {
        let response = self
            .client
            .indices()
            .put_mapping(IndicesPutMappingParts::Index(&[index]))
            .body(mapping)
            .send()
            .await?;
        ensure_success(response, "Put mapping", SearchIndexError::IndexCreationError).await?;
        Ok(())
    }

    async fn get_field_mapping(
        &self,
        index: &str,
        fields: &[String],
    ) -> Result<Value, SearchIndexError> {
        let fields: Vec<&str> = fields.iter().map(String::as_str).collect();
        let response = self
            .client
            .indices()
            .get_field_mapping(IndicesGetFieldMappingParts::IndexFields(&[index], &fields))
            .send()
            .await?;

        if response.status_code().as_u16() == 404 {
            return Err(SearchIndexError::index_not_found(index));
        }
        let response = ensure_success(response, "Get field mapping", SearchIndexError::BackendError).await?;
        Ok(response.json::<Value>().await?)
    }

    async fn index_document(
        &self,
        index: &str,
        id: &str,
        source: &Value,
    ) -> Result<WriteOutcome, SearchIndexError> {
        let response = self
            .client
            .index(IndexParts::IndexId(index, id))
            .body(source)
            .send()
            .await?;
        let response = ensure_success(response, "Index document", SearchIndexError::IndexError).await?;

        let body = response.json::<Value>().await?;
        let outcome = write_outcome(body.get("result").and_then(Value::as_str));
        debug!(index = %index, doc_id = %id, outcome = ?outcome, "Document indexed");
        Ok(outcome)
    }

    async fn bulk_index(
        &self,
        index: &str,
        documents: Vec<(String, Value)>,
    ) -> Result<Vec<BulkItemOutcome>, SearchIndexError> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let mut body: Vec<JsonBody<Value>> = Vec::with_capacity(documents.len() * 2);
        for (id, source) in documents {
            body.push(json!({ "index": { "_id": id } }).into());
            body.push(source.into());
        }

        let response = self
            .client
            .bulk(BulkParts::Index(index))
            .body(body)
            .send()
            .await?;
        let response = ensure_success(response, "Bulk index", SearchIndexError::BulkIndexError).await?;

        let body = response.json::<Value>().await?;
        let items = body
            .get("items")
            .and_then(Value::as_array)
            .ok_or_else(|| SearchIndexError::parse("bulk response without items"))?;

        let mut outcomes = Vec::with_capacity(items.len());
        for item in items {
            let action = item.get("index").unwrap_or(item);
            let id = action
                .get("_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            match action.get("error") {
                Some(error) => {
                    let reason = error
                        .get("reason")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| error.to_string());
                    outcomes.push(BulkItemOutcome::failed(id, reason));
                }
                None => {
                    let outcome = write_outcome(action.get("result").and_then(Value::as_str));
                    outcomes.push(BulkItemOutcome {
                        id,
                        result: Ok(outcome),
                    });
                }
            }
        }
        Ok(outcomes)
    }

    async fn get_document(&self, index: &str, id: &str) -> Result<Option<Value>, SearchIndexError> {
        let response = self.client.get(GetParts::IndexId(index, id)).send().await?;

        if response.status_code().as_u16() == 404 {
            return Ok(None);
        }
        let response = ensure_success(response, "Get document", SearchIndexError::BackendError).await?;

        let mut body = response.json::<Value>().await?;
        if body.get("found").and_then(Value::as_bool) == Some(false) {
            return Ok(None);
        }
        Ok(body.get_mut("_source").map(Value::take))
    }

    async fn delete_document(&self, index: &str, id: &str) -> Result<bool, SearchIndexError> {
        let response = self
            .client
            .delete(DeleteParts::IndexId(index, id))
            .send()
            .await?;

        // 404 is acceptable - document may not exist
        if response.status_code().as_u16() == 404 {
            return Ok(false);
        }
        ensure_success(response, "Delete document", SearchIndexError::DeleteError).await?;

        debug!(index = %index, doc_id = %id, "Document deleted");
        Ok(true)
    }

    async fn delete_by_query(&self, index: &str, query: &Value) -> Result<u64, SearchIndexError> {
        let response = self
            .client
            .delete_by_query(DeleteByQueryParts::Index(&[index]))
            .body(json!({ "query": query }))
            .send()
            .await?;
        let response = ensure_success(response, "Delete by query", SearchIndexError::DeleteError).await?;

        let body = response.json::<Value>().await?;
        Ok(body.get("deleted").and_then(Value::as_u64).unwrap_or(0))
    }

    async fn update_document(
        &self,
        index: &str,
        id: &str,
        partial: &Value,
    ) -> Result<(), SearchIndexError> {
        let response = self
            .client
            .update(UpdateParts::IndexId(index, id))
            .body(json!({ "doc": partial }))
            .send()
            .await?;

        if response.status_code().as_u16() == 404 {
            return Err(SearchIndexError::document_not_found(index, id));
        }
        ensure_success(response, "Update", SearchIndexError::UpdateError).await?;

        debug!(index = %index, doc_id = %id, "Document merged");
        Ok(())
    }

    async fn search(&self, index: &str, body: &Value) -> Result<SearchResponse, SearchIndexError> {
        let response = self
            .client
            .search(SearchParts::Index(&[index]))
            .body(body)
            .send()
            .await?;

        if response.status_code().as_u16() == 404 {
            return Err(SearchIndexError::index_not_found(index));
        }
        let response = ensure_success(response, "Search", SearchIndexError::BackendError).await?;
        SearchResponse::from_json(response.json::<Value>().await?)
    }

    async fn scroll_open(
        &self,
        index: &str,
        body: &Value,
        keep_alive: &str,
    ) -> Result<SearchResponse, SearchIndexError> {
        let response = self
            .client
            .search(SearchParts::Index(&[index]))
            .scroll(keep_alive)
            .body(body)
            .send()
            .await?;

        if response.status_code().as_u16() == 404 {
            return Err(SearchIndexError::index_not_found(index));
        }
        let response = ensure_success(response, "Scroll open", SearchIndexError::BackendError).await?;
        SearchResponse::from_json(response.json::<Value>().await?)
    }

    async fn scroll_next(
        &self,
        scroll_id: &str,
        keep_alive: &str,
    ) -> Result<SearchResponse, SearchIndexError> {
        let response = self
            .client
            .scroll(ScrollParts::None)
            .body(json!({ "scroll": keep_alive, "scroll_id": scroll_id }))
            .send()
            .await?;
        let response = ensure_success(response, "Scroll", SearchIndexError::BackendError).await?;
        SearchResponse::from_json(response.json::<Value>().await?)
    }

    async fn clear_scroll(&self, scroll_id: &str) -> Result<(), SearchIndexError> {
        let response = self
            .client
            .clear_scroll(ClearScrollParts::None)
            .body(json!({ "scroll_id": [scroll_id] }))
            .send()
            .await?;

        // 404 means the cursor already expired
        if response.status_code().as_u16() == 404 {
            return Ok(());
        }
        ensure_success(response, "Clear scroll", SearchIndexError::BackendError).await?;
        Ok(())
    }
}
