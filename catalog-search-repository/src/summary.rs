//! Data files summaries of matching documents.
//!
//! Documents carry their files under `files.<file type>` as lists of file
//! objects (`size`, `uri`, `reference`). A summary counts files per file
//! type, overall and per value of a discriminant attribute. Files are
//! selected one by one, so the figures are computed from the documents
//! themselves while scrolling rather than by document-level aggregations.

use std::collections::{BTreeMap, BTreeSet};

use catalog_search_shared::{fields, DocFilesSubSummary, DocFilesSummary, FilesSummary};
use regex::Regex;
use serde_json::Value;

use crate::errors::SearchIndexError;
use crate::scroll::extract_path;

/// Which files a summary counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileLocation {
    /// Files stored by the catalog, with a strictly positive size. Counted
    /// and summed.
    Internal,
    /// Files referenced through an http or https uri. Counted only.
    External,
}

impl FileLocation {
    fn is_referenced(self) -> bool {
        self == FileLocation::External
    }

    /// Size of `file` when it is selected, `None` otherwise.
    fn selected_size(self, file: &Value) -> Option<u64> {
        let referenced = file.get("reference").and_then(Value::as_bool).unwrap_or(false);
        match self {
            FileLocation::Internal if !referenced => {
                file.get("size").and_then(Value::as_u64).filter(|size| *size > 0)
            }
            FileLocation::External if referenced => file
                .get("uri")
                .and_then(Value::as_str)
                .filter(|uri| uri.starts_with("http://") || uri.starts_with("https://"))
                .map(|_| 0),
            _ => None,
        }
    }
}

/// Accumulates one summary computation over scrolled documents.
pub struct FilesSummaryBuilder {
    location: FileLocation,
    discriminant: String,
    include: Option<Regex>,
    file_types: Vec<String>,
    documents_count: u64,
    totals: FilesSummary,
    sub_summaries: BTreeMap<String, DocFilesSubSummary>,
}

impl FilesSummaryBuilder {
    /// `include` is a regular expression the whole discriminant value must
    /// match for a sub-summary to be kept.
    pub fn new(
        location: FileLocation,
        discriminant: &str,
        include: Option<&str>,
        file_types: &[&str],
    ) -> Result<Self, SearchIndexError> {
        if file_types.is_empty() {
            return Err(SearchIndexError::validation("at least one file type is required"));
        }
        if discriminant.trim().is_empty() {
            return Err(SearchIndexError::validation("discriminant attribute is required"));
        }
        let include = include
            .map(|pattern| Regex::new(&format!("^(?:{})$", pattern)))
            .transpose()
            .map_err(|e| SearchIndexError::validation(format!("invalid discriminant pattern: {}", e)))?;
        Ok(Self {
            location,
            discriminant: discriminant.to_string(),
            include,
            file_types: file_types.iter().map(|t| t.to_string()).collect(),
            documents_count: 0,
            totals: FilesSummary::default(),
            sub_summaries: BTreeMap::new(),
        })
    }

    /// Paths of the document source the computation needs.
    pub fn source_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .file_types
            .iter()
            .map(|file_type| files_path(file_type))
            .collect();
        paths.push(self.discriminant.clone());
        paths
    }

    pub fn record(&mut self, source: &Value) {
        self.documents_count += 1;
        let discriminants: BTreeSet<String> = extract_path(source, &self.discriminant)
            .into_iter()
            .filter_map(value_text)
            .filter(|value| self.include.as_ref().is_none_or(|include| include.is_match(value)))
            .collect();
        for value in &discriminants {
            self.sub_summaries.entry(value.clone()).or_default().documents_count += 1;
        }

        for file_type in &self.file_types {
            let (count, size) = extract_path(source, &files_path(file_type))
                .iter()
                .filter_map(|file| self.location.selected_size(file))
                .fold((0u64, 0u64), |(count, total), size| (count + 1, total + size));
            self.totals.add(count, size);
            for value in &discriminants {
                if let Some(sub_summary) = self.sub_summaries.get_mut(value) {
                    sub_summary.add_files(file_type, self.location.is_referenced(), count, size);
                }
            }
        }
    }

    /// Fold the computed figures into `summary`.
    ///
    /// File figures add up; document counts keep the largest value since
    /// successive computations over one query count the same documents.
    pub fn merge_into(self, summary: &mut DocFilesSummary) {
        summary.documents_count = summary.documents_count.max(self.documents_count);
        summary.files_count += self.totals.files_count;
        summary.files_size += self.totals.files_size;
        for (value, computed) in self.sub_summaries {
            let target = summary.sub_summaries.entry(value).or_default();
            target.documents_count = target.documents_count.max(computed.documents_count);
            target.files_count += computed.files_count;
            target.files_size += computed.files_size;
            for (file_type, files) in computed.file_types {
                target
                    .file_types
                    .entry(file_type)
                    .or_default()
                    .add(files.files_count, files.files_size);
            }
        }
    }
}

fn files_path(file_type: &str) -> String {
    format!("{}.{}", fields::FILES, file_type)
}

fn value_text(value: Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}
