//! Accounting of bulk save outcomes.
//!
//! A `BulkSaveResult` is filled concurrently by every chunk of one bulk save
//! and keeps, besides the saved ids and failure causes, how many documents
//! were created or failed per session owner and session.

use std::collections::{BTreeMap, HashMap};

use dashmap::{DashMap, DashSet};

use crate::errors::SearchIndexError;
use crate::types::WriteOutcome;

type SessionCounts = DashMap<String, DashMap<String, u64>>;

/// Detailed result of a bulk save.
///
/// All recording methods take `&self` and can be called from several tasks
/// at once without external locking.
#[derive(Debug, Default)]
pub struct BulkSaveResult {
    saved_ids: DashSet<String>,
    errors: DashMap<String, SearchIndexError>,
    saved_per_session: SessionCounts,
    errors_per_session: SessionCounts,
}

impl BulkSaveResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successfully written document.
    ///
    /// Only created documents count for their session: an update means the
    /// session already reported this document.
    pub fn record_success(
        &self,
        doc_id: &str,
        outcome: WriteOutcome,
        session: Option<&str>,
        session_owner: Option<&str>,
    ) {
        self.saved_ids.insert(doc_id.to_string());
        if outcome == WriteOutcome::Created {
            increment(&self.saved_per_session, session, session_owner, 1);
        }
    }

    /// Record a document that could not be written.
    pub fn record_failure(
        &self,
        doc_id: &str,
        cause: SearchIndexError,
        session: Option<&str>,
        session_owner: Option<&str>,
    ) {
        self.errors.insert(doc_id.to_string(), cause);
        increment(&self.errors_per_session, session, session_owner, 1);
    }

    /// Merge another result into this one.
    ///
    /// Ids are unioned, causes of `other` win on id collision and session
    /// counts are summed per (owner, session).
    pub fn append(&self, other: &BulkSaveResult) -> &Self {
        if std::ptr::eq(self, other) {
            return self;
        }
        // No guard on `other` may be held while `self` is written.
        let ids: Vec<String> = other.saved_ids.iter().map(|id| id.key().clone()).collect();
        let errors: Vec<(String, SearchIndexError)> = other
            .errors
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        for id in ids {
            self.saved_ids.insert(id);
        }
        for (id, cause) in errors {
            self.errors.insert(id, cause);
        }
        merge_counts(&self.saved_per_session, &other.saved_per_session);
        merge_counts(&self.errors_per_session, &other.errors_per_session);
        self
    }

    pub fn saved_docs_count(&self) -> usize {
        self.saved_ids.len()
    }

    pub fn in_error_docs_count(&self) -> usize {
        self.errors.len()
    }

    pub fn saved_doc_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.saved_ids.iter().map(|id| id.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn in_error_doc_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.errors.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn in_error_doc_cause(&self, doc_id: &str) -> Option<SearchIndexError> {
        self.errors.get(doc_id).map(|cause| cause.value().clone())
    }

    pub fn is_saved(&self, doc_id: &str) -> bool {
        self.saved_ids.contains(doc_id)
    }

    pub fn saved_count_for(&self, session_owner: &str, session: &str) -> u64 {
        count_for(&self.saved_per_session, session_owner, session)
    }

    pub fn in_error_count_for(&self, session_owner: &str, session: &str) -> u64 {
        count_for(&self.errors_per_session, session_owner, session)
    }

    /// Snapshot of owner -> session -> created documents.
    pub fn saved_per_session(&self) -> BTreeMap<String, BTreeMap<String, u64>> {
        snapshot(&self.saved_per_session)
    }

    /// Snapshot of owner -> session -> failed documents.
    pub fn errors_per_session(&self) -> BTreeMap<String, BTreeMap<String, u64>> {
        snapshot(&self.errors_per_session)
    }

    /// One line per failed document with its cause, sorted by id.
    pub fn detailed_error_message(&self) -> String {
        let causes: HashMap<String, String> = self
            .errors
            .iter()
            .map(|e| (e.key().clone(), e.value().to_string()))
            .collect();
        let mut ids: Vec<&String> = causes.keys().collect();
        ids.sort();
        ids.into_iter()
            .map(|id| format!("Document {}: {}", id, causes[id]))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn increment(counts: &SessionCounts, session: Option<&str>, session_owner: Option<&str>, by: u64) {
    let (Some(session), Some(owner)) = (session, session_owner) else {
        return;
    };
    let sessions = counts.entry(owner.to_string()).or_default();
    *sessions.entry(session.to_string()).or_default() += by;
}

fn merge_counts(target: &SessionCounts, source: &SessionCounts) {
    let entries: Vec<(String, String, u64)> = source
        .iter()
        .flat_map(|owner| {
            owner
                .value()
                .iter()
                .map(|session| (owner.key().clone(), session.key().clone(), *session.value()))
                .collect::<Vec<_>>()
        })
        .collect();
    for (owner, session, count) in entries {
        increment(target, Some(&session), Some(&owner), count);
    }
}

fn count_for(counts: &SessionCounts, session_owner: &str, session: &str) -> u64 {
    counts
        .get(session_owner)
        .and_then(|sessions| sessions.get(session).map(|count| *count))
        .unwrap_or(0)
}

fn snapshot(counts: &SessionCounts) -> BTreeMap<String, BTreeMap<String, u64>> {
    counts
        .iter()
        .map(|owner| {
            let sessions = owner
                .value()
                .iter()
                .map(|session| (session.key().clone(), *session.value()))
                .collect();
            (owner.key().clone(), sessions)
        })
        .collect()
}

/// Flat view of a bulk save: only the two counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkSaveLightResult {
    pub saved_docs_count: usize,
    pub in_error_docs_count: usize,
}

impl BulkSaveLightResult {
    pub fn new(saved_docs_count: usize, in_error_docs_count: usize) -> Self {
        Self {
            saved_docs_count,
            in_error_docs_count,
        }
    }

    pub fn append(&mut self, other: BulkSaveLightResult) -> &mut Self {
        self.saved_docs_count += other.saved_docs_count;
        self.in_error_docs_count += other.in_error_docs_count;
        self
    }
}

impl From<&BulkSaveResult> for BulkSaveLightResult {
    fn from(result: &BulkSaveResult) -> Self {
        Self::new(result.saved_docs_count(), result.in_error_docs_count())
    }
}
