//! # Catalog Search
//!
//! Bootstrap binary for the catalog search layer. It connects to OpenSearch
//! and makes sure the catalog indices exist with their mappings before the
//! repository is used.
//!
//! ## Modules
//!
//! - [`config`]: Environment configuration and dependency initialization

pub mod config;

pub use config::{BootstrapConfig, ConnectionMode, Dependencies};

use catalog_search_repository::SearchIndexError;
use thiserror::Error;

/// Errors that can occur during bootstrap.
#[derive(Error, Debug)]
pub enum BootstrapError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Error returned by the search repository.
    #[error("Search error: {0}")]
    SearchError(#[from] SearchIndexError),
}

impl BootstrapError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}
