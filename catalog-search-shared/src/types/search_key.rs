//! Search keys: where to search and what to decode.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Identifies the index and the logical document types a search runs on.
///
/// `Q` is the type of the queried documents and `R` the type results are
/// decoded into. They are the same for plain searches; projecting searches
/// decode an inner attribute of `Q` into `R`.
pub struct SearchKey<Q, R = Q> {
    index: String,
    search_types: Vec<String>,
    _marker: PhantomData<fn() -> (Q, R)>,
}

impl<Q, R> SearchKey<Q, R> {
    /// Create a key on `index` restricted to the given document types.
    ///
    /// The index name is lower-cased. An empty type list searches every type.
    pub fn new<I, S>(index: impl AsRef<str>, search_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            index: index.as_ref().to_lowercase(),
            search_types: search_types.into_iter().map(Into::into).collect(),
            _marker: PhantomData,
        }
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn search_types(&self) -> &[String] {
        &self.search_types
    }

    /// Same index and types, decoding into another result type.
    pub fn project<U>(&self) -> SearchKey<Q, U> {
        SearchKey {
            index: self.index.clone(),
            search_types: self.search_types.clone(),
            _marker: PhantomData,
        }
    }
}

impl<Q, R> Clone for SearchKey<Q, R> {
    fn clone(&self) -> Self {
        Self {
            index: self.index.clone(),
            search_types: self.search_types.clone(),
            _marker: PhantomData,
        }
    }
}

impl<Q, R> fmt::Debug for SearchKey<Q, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchKey")
            .field("index", &self.index)
            .field("search_types", &self.search_types)
            .finish()
    }
}

impl<Q, R> PartialEq for SearchKey<Q, R> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.search_types == other.search_types
    }
}

impl<Q, R> Eq for SearchKey<Q, R> {}

impl<Q, R> Hash for SearchKey<Q, R> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.search_types.hash(state);
    }
}
