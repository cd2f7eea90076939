//! OpenSearch implementation of the search backend.
//!
//! This module provides a concrete implementation of `SearchBackend`
//! using OpenSearch, and the settings catalog indices are created with.

mod backend;
mod index_config;

pub use backend::OpenSearchBackend;
pub use index_config::{get_index_settings, IndexConfig};
