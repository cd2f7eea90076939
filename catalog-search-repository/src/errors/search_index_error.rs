//! Search index error types.
//!
//! This module defines the unified error type for all search repository
//! operations, including both low-level backend errors and caller contract
//! violations.

use catalog_search_shared::CriterionError;
use thiserror::Error;

/// Unified errors from search repository operations.
///
/// Used by the `SearchBackend` trait and `SearchRepository` for all
/// operations. The type is `Clone` so that bulk results can keep the cause of
/// every failed document.
#[derive(Debug, Clone, Error)]
pub enum SearchIndexError {
    /// Validation error (e.g., document without id or type).
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Failed to establish connection to the search backend.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Failed to index a document.
    #[error("Index error: {0}")]
    IndexError(String),

    /// Bulk request failed as a whole.
    #[error("Bulk index error: {0}")]
    BulkIndexError(String),

    /// Failed to update (merge) a document.
    #[error("Update error: {0}")]
    UpdateError(String),

    /// Failed to delete a document or an index.
    #[error("Delete error: {0}")]
    DeleteError(String),

    /// Failed to create an index or put its mappings.
    #[error("Index creation error: {0}")]
    IndexCreationError(String),

    /// Failed to decode a backend response or a stored document.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Failed to serialize data for the search backend.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Document not found.
    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    /// Index not found.
    #[error("Index not found: {0}")]
    IndexNotFound(String),

    /// The backend kept reporting a timeout.
    #[error("Search timed out after {attempts} attempts")]
    Timeout { attempts: usize },

    /// Offset paging past the backend result window.
    #[error("Result window exceeded: offset {offset} + size {size} > {max}")]
    ResultWindowExceeded {
        offset: usize,
        size: usize,
        max: usize,
    },

    /// The backend answered with an unexpected status.
    #[error("Backend error: {0}")]
    BackendError(String),

    /// Unknown error.
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl SearchIndexError {
    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::ConnectionError(msg.into())
    }

    /// Create an index error.
    pub fn index(msg: impl Into<String>) -> Self {
        Self::IndexError(msg.into())
    }

    /// Create a bulk index error.
    pub fn bulk_index(msg: impl Into<String>) -> Self {
        Self::BulkIndexError(msg.into())
    }

    /// Create an update error.
    pub fn update(msg: impl Into<String>) -> Self {
        Self::UpdateError(msg.into())
    }

    /// Create a delete error.
    pub fn delete(msg: impl Into<String>) -> Self {
        Self::DeleteError(msg.into())
    }

    /// Create an index creation error.
    pub fn index_creation(msg: impl Into<String>) -> Self {
        Self::IndexCreationError(msg.into())
    }

    /// Create a parse error.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::ParseError(msg.into())
    }

    /// Create a serialization error.
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::SerializationError(msg.into())
    }

    /// Create a document not found error.
    pub fn document_not_found(index: &str, doc_id: &str) -> Self {
        Self::DocumentNotFound(format!("index={}, id={}", index, doc_id))
    }

    /// Create an index not found error.
    pub fn index_not_found(index: impl Into<String>) -> Self {
        Self::IndexNotFound(index.into())
    }

    /// Create a timeout error.
    pub fn timeout(attempts: usize) -> Self {
        Self::Timeout { attempts }
    }

    /// Create a result window error.
    pub fn result_window_exceeded(offset: usize, size: usize, max: usize) -> Self {
        Self::ResultWindowExceeded { offset, size, max }
    }

    /// Create a backend error.
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::BackendError(msg.into())
    }

    /// Create an unknown error.
    pub fn unknown(msg: impl Into<String>) -> Self {
        Self::Unknown(msg.into())
    }

    /// Returns true if the error is a backend timeout worth retrying.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<CriterionError> for SearchIndexError {
    fn from(err: CriterionError) -> Self {
        Self::ValidationError(err.to_string())
    }
}

impl From<serde_json::Error> for SearchIndexError {
    fn from(err: serde_json::Error) -> Self {
        Self::ParseError(err.to_string())
    }
}

impl From<opensearch::Error> for SearchIndexError {
    fn from(err: opensearch::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout { attempts: 1 };
        }
        Self::ConnectionError(err.to_string())
    }
}
