//! This module defines the core data structures used across the catalog search layer.

pub mod criterion;
pub mod document;
pub mod facet;
pub mod page;
pub mod search_key;
pub mod summary;
pub mod urn;
