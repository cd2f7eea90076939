//! Paging and sorting types.

use serde::{Deserialize, Serialize};

use crate::types::facet::Facet;

/// Sort direction of one field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SortOrder {
    pub field: String,
    pub ascending: bool,
}

/// Ordered list of sort keys; the first key is the primary one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct Sort {
    pub orders: Vec<SortOrder>,
}

impl Sort {
    pub fn asc(field: impl Into<String>) -> Self {
        Self::default().and_asc(field)
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self::default().and_desc(field)
    }

    pub fn and_asc(mut self, field: impl Into<String>) -> Self {
        self.orders.push(SortOrder {
            field: field.into(),
            ascending: true,
        });
        self
    }

    pub fn and_desc(mut self, field: impl Into<String>) -> Self {
        self.orders.push(SortOrder {
            field: field.into(),
            ascending: false,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.orders.iter().map(|o| o.field.as_str())
    }
}

/// Offset-based page request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PageRequest {
    /// Zero-based page number.
    pub page: usize,
    /// Page size, at least 1.
    pub size: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<Sort>,
}

impl PageRequest {
    pub fn of(page: usize, size: usize) -> Self {
        Self {
            page,
            size: size.max(1),
            sort: None,
        }
    }

    pub fn sorted(page: usize, size: usize, sort: Sort) -> Self {
        Self {
            sort: Some(sort),
            ..Self::of(page, size)
        }
    }

    pub fn offset(&self) -> usize {
        self.page * self.size
    }

    pub fn next(&self) -> Self {
        Self {
            page: self.page + 1,
            ..self.clone()
        }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::of(0, 20)
    }
}

/// One page of results.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Page<T> {
    pub content: Vec<T>,
    pub page_request: PageRequest,
    /// Total number of matching documents, not only those of this page.
    pub total: u64,
}

impl<T> Page<T> {
    pub fn new(content: Vec<T>, page_request: PageRequest, total: u64) -> Self {
        Self {
            content,
            page_request,
            total,
        }
    }

    pub fn empty(page_request: PageRequest) -> Self {
        Self::new(Vec::new(), page_request, 0)
    }

    /// Slice an already materialized list.
    pub fn from_slice(items: &[T], page_request: PageRequest) -> Self
    where
        T: Clone,
    {
        let content = items
            .iter()
            .skip(page_request.offset())
            .take(page_request.size)
            .cloned()
            .collect();
        Self::new(content, page_request, items.len() as u64)
    }

    pub fn total_pages(&self) -> u64 {
        self.total.div_ceil(self.page_request.size as u64)
    }

    pub fn has_next(&self) -> bool {
        ((self.page_request.page + 1) as u64) < self.total_pages()
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            content: self.content.into_iter().map(f).collect(),
            page_request: self.page_request,
            total: self.total,
        }
    }
}

/// A page of results with the facets computed over every matching document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FacetPage<T> {
    pub page: Page<T>,
    pub facets: Vec<Facet>,
}

impl<T> FacetPage<T> {
    pub fn new(page: Page<T>, facets: Vec<Facet>) -> Self {
        Self { page, facets }
    }

    pub fn facet(&self, attribute_name: &str) -> Option<&Facet> {
        self.facets
            .iter()
            .find(|f| f.attribute_name() == attribute_name)
    }
}
