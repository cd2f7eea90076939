//! # Catalog Search Shared
//!
//! This crate defines the data structures shared by the catalog search layer:
//! the criterion tree used to express queries, search keys, facets, paging
//! types, aggregated summaries, the indexable document contract and
//! versioned entity identifiers.

pub mod types;

pub use types::criterion::{Criterion, CriterionError, MatchType, StringMatchType};
pub use types::document::{fields, Indexable};
pub use types::facet::{DateFacet, Facet, FacetRange, FacetType, NumericFacet, StringFacet};
pub use types::page::{FacetPage, Page, PageRequest, Sort, SortOrder};
pub use types::search_key::SearchKey;
pub use types::summary::{AttributeStats, DocFilesSubSummary, DocFilesSummary, FilesSummary};
pub use types::urn::{EntityUrn, UrnError, UrnVersion};
