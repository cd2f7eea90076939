//! Interface definitions for the search layer.
//!
//! This module defines the abstract `SearchBackend` trait that allows for
//! dependency injection and swappable search engines, and the `EntityLookup`
//! trait the versioning rewriter resolves identifiers through.

mod entity_lookup;
mod search_backend;

pub use entity_lookup::EntityLookup;
pub use search_backend::SearchBackend;
