//! Aggregated figures over search matches: attribute statistics and data
//! files summaries.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Statistics of one numeric or date attribute over the matches.
///
/// `min`, `max` and `avg` are `None` when no match carries the attribute.
/// Dates are expressed in epoch milliseconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AttributeStats {
    pub count: u64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub avg: Option<f64>,
    pub sum: f64,
}

/// Count and total size of some files.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilesSummary {
    pub files_count: u64,
    pub files_size: u64,
}

impl FilesSummary {
    pub fn new(files_count: u64, files_size: u64) -> Self {
        Self {
            files_count,
            files_size,
        }
    }

    pub fn add(&mut self, files_count: u64, files_size: u64) {
        self.files_count += files_count;
        self.files_size += files_size;
    }
}

/// Files of the documents sharing one discriminant value.
///
/// `file_types` is keyed by file type. Each file type also gets a
/// `<type>_!ref` entry for files stored internally and a `<type>_ref` entry
/// for externally referenced files.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocFilesSubSummary {
    pub documents_count: u64,
    pub files_count: u64,
    pub files_size: u64,
    pub file_types: BTreeMap<String, FilesSummary>,
}

/// Files of every matching document, with one sub-summary per
/// discriminant value.
///
/// A summary is filled by successive computations (internal files, then
/// external ones): file figures add up, while document counts keep the
/// largest count seen since both computations count the same documents.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocFilesSummary {
    pub documents_count: u64,
    pub files_count: u64,
    pub files_size: u64,
    pub sub_summaries: BTreeMap<String, DocFilesSubSummary>,
}

/// Suffix of the per-type entry of externally referenced files.
pub const REFERENCED_SUFFIX: &str = "_ref";
/// Suffix of the per-type entry of internally stored files.
pub const STORED_SUFFIX: &str = "_!ref";

impl DocFilesSubSummary {
    /// Add files of `file_type` to this sub-summary.
    pub fn add_files(&mut self, file_type: &str, referenced: bool, files_count: u64, files_size: u64) {
        self.files_count += files_count;
        self.files_size += files_size;
        let suffix = if referenced { REFERENCED_SUFFIX } else { STORED_SUFFIX };
        self.file_types
            .entry(format!("{}{}", file_type, suffix))
            .or_default()
            .add(files_count, files_size);
        self.file_types
            .entry(file_type.to_string())
            .or_default()
            .add(files_count, files_size);
    }
}
