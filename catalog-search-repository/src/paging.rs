//! Positions reached while paging past the backend result window.
//!
//! Offsets beyond `max_result_window` are reached with `search_after`, one
//! window at a time. Every position reached is remembered, keyed by the
//! search it belongs to, so that asking for the next page restarts from the
//! closest known position instead of from the first document.

use std::sync::Arc;
use std::time::{Duration, Instant};

use catalog_search_shared::{Criterion, SearchKey};
use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;

use crate::cache::Clock;
use crate::errors::SearchIndexError;

/// Identity of a sorted search: index, types, criterion and sort clauses.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SearchPosition {
    index: String,
    search_types: Vec<String>,
    criterion: String,
    sort: String,
}

impl SearchPosition {
    pub fn new<Q, R>(
        search_key: &SearchKey<Q, R>,
        criterion: &Criterion,
        sort: &[Value],
    ) -> Result<Self, SearchIndexError> {
        let criterion = serde_json::to_string(criterion)
            .map_err(|e| SearchIndexError::serialization(e.to_string()))?;
        Ok(Self {
            index: search_key.index().to_string(),
            search_types: search_key.search_types().to_vec(),
            criterion,
            sort: Value::Array(sort.to_vec()).to_string(),
        })
    }

    pub fn index(&self) -> &str {
        &self.index
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ReminderKey {
    position: SearchPosition,
    offset: usize,
}

struct Reminder {
    sort_values: Vec<Value>,
    expires_at: Instant,
}

/// Sort values of the last hit before an offset, per search.
///
/// Entries expire `ttl` after they were stored.
pub struct SearchAfterReminders {
    entries: DashMap<ReminderKey, Reminder>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl SearchAfterReminders {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            clock,
        }
    }

    /// Remember that the hit just before `offset` has these sort values.
    pub fn remember(&self, position: &SearchPosition, offset: usize, sort_values: Vec<Value>) {
        if sort_values.is_empty() {
            return;
        }
        let expires_at = self.clock.now() + self.ttl;
        self.entries.insert(
            ReminderKey {
                position: position.clone(),
                offset,
            },
            Reminder {
                sort_values,
                expires_at,
            },
        );
    }

    /// Closest remembered position at or before `target`.
    ///
    /// The exact offset is tried first, then every multiple of `step` below
    /// it, which are the positions a walk from the first document stores.
    pub fn closest(
        &self,
        position: &SearchPosition,
        target: usize,
        step: usize,
    ) -> Option<(usize, Vec<Value>)> {
        let now = self.clock.now();
        self.entries.retain(|_, reminder| reminder.expires_at > now);

        let mut candidates = vec![target];
        if step > 0 {
            let mut offset = target - target % step;
            while offset > 0 {
                if offset != target {
                    candidates.push(offset);
                }
                offset -= step;
            }
        }

        candidates.into_iter().find_map(|offset| {
            let key = ReminderKey {
                position: position.clone(),
                offset,
            };
            self.entries.get(&key).map(|reminder| {
                debug!(offset, "Found search after position");
                (offset, reminder.sort_values.clone())
            })
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget every position of the given index.
    pub fn invalidate_index(&self, index: &str) {
        self.entries.retain(|key, _| key.position.index() != index);
    }
}
