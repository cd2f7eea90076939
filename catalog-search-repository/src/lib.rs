//! # Catalog Search Repository
//!
//! This crate provides the search layer of the catalog: a repository that
//! saves documents into search indices and answers criterion-based searches,
//! facets, scrolls, aggregates and data files summaries over them. It
//! includes definitions for errors, the backend interface, and a concrete
//! implementation for OpenSearch.

pub mod bulk;
pub mod cache;
pub mod config;
pub mod errors;
pub mod facets;
pub mod interfaces;
pub mod opensearch;
pub mod paging;
pub mod query;
pub mod retry;
pub mod scroll;
pub mod service;
pub mod sort;
pub mod summary;
pub mod types;
pub mod versioning;

pub use bulk::{BulkSaveLightResult, BulkSaveResult};
pub use cache::{CacheKey, Clock, ForwardingCache, ManualClock, SystemClock};
pub use config::SearchRepositoryConfig;
pub use errors::SearchIndexError;
pub use interfaces::{EntityLookup, SearchBackend};
pub use opensearch::{IndexConfig, OpenSearchBackend};
pub use paging::{SearchAfterReminders, SearchPosition};
pub use retry::TimeoutRetry;
pub use service::SearchRepository;
pub use summary::{FileLocation, FilesSummaryBuilder};
pub use types::{BulkItemOutcome, SearchHit, SearchResponse, VersionedEntity, WriteOutcome};
pub use versioning::{RepositoryEntityLookup, VersioningRewriter};
