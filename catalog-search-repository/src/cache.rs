//! Memoization of projected "forwarding" searches.
//!
//! The backend cannot page arbitrarily deep, so projecting an inner attribute
//! over every match of a query is done once through a scroll and kept here.
//! Values are stored in a content-derived order so that pages cut from the
//! list stay stable even though two scrolls may return hits in different
//! orders.

use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use catalog_search_shared::{Criterion, SearchKey};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::errors::SearchIndexError;

/// Source of the current time for cache expiry.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    elapsed: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut elapsed = self.elapsed.lock().unwrap_or_else(|e| e.into_inner());
        *elapsed += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let elapsed = self.elapsed.lock().unwrap_or_else(|e| e.into_inner());
        self.origin + *elapsed
    }
}

/// Memoization key of a projected search.
///
/// The criterion is kept as its canonical JSON text since criteria carry
/// floating point values and are not hashable themselves.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    index: String,
    search_types: Vec<String>,
    criterion: String,
    attribute: String,
}

impl CacheKey {
    pub fn new<Q, R>(
        search_key: &SearchKey<Q, R>,
        criterion: &Criterion,
        attribute: &str,
    ) -> Result<Self, SearchIndexError> {
        let criterion = serde_json::to_string(criterion)
            .map_err(|e| SearchIndexError::serialization(e.to_string()))?;
        Ok(Self {
            index: search_key.index().to_string(),
            search_types: search_key.search_types().to_vec(),
            criterion,
            attribute: attribute.to_string(),
        })
    }

    pub fn index(&self) -> &str {
        &self.index
    }
}

struct CacheEntry {
    values: OnceCell<Arc<Vec<Value>>>,
    last_access: Mutex<Instant>,
}

impl CacheEntry {
    fn new(now: Instant) -> Self {
        Self {
            values: OnceCell::new(),
            last_access: Mutex::new(now),
        }
    }

    fn touch(&self, now: Instant) {
        let mut last_access = self.last_access.lock().unwrap_or_else(|e| e.into_inner());
        if *last_access < now {
            *last_access = now;
        }
    }

    fn expired(&self, now: Instant, ttl: Duration) -> bool {
        let last_access = self.last_access.lock().unwrap_or_else(|e| e.into_inner());
        now.saturating_duration_since(*last_access) >= ttl
    }
}

/// Cache of projected search results, expiring entries after a period
/// without access.
pub struct ForwardingCache {
    entries: DashMap<CacheKey, Arc<CacheEntry>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl ForwardingCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            clock,
        }
    }

    /// Get the values for `key`, running `load` if they are not cached.
    ///
    /// Concurrent callers asking for the same missing key wait for a single
    /// load. A failed load caches nothing and the next call loads again.
    pub async fn get_or_load<F, Fut>(
        &self,
        key: CacheKey,
        load: F,
    ) -> Result<Arc<Vec<Value>>, SearchIndexError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<Value>, SearchIndexError>>,
    {
        let now = self.clock.now();
        self.evict_expired(now);

        let entry = Arc::clone(
            self.entries
                .entry(key)
                .or_insert_with(|| Arc::new(CacheEntry::new(now)))
                .value(),
        );
        entry.touch(now);

        let values = entry
            .values
            .get_or_try_init(|| async move {
                let loaded = load().await?;
                debug!(values = loaded.len(), "Loaded forwarding search");
                Ok::<_, SearchIndexError>(Arc::new(stable_order(loaded)))
            })
            .await?;
        Ok(Arc::clone(values))
    }

    /// Drop every entry not accessed for the configured duration.
    pub fn evict_expired(&self, now: Instant) {
        self.entries.retain(|_, entry| !entry.expired(now, self.ttl));
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry of the given index.
    pub fn invalidate_index(&self, index: &str) {
        self.entries.retain(|key, _| key.index() != index);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

/// Deduplicate values and order them by content hash, then canonical text.
pub fn stable_order(values: Vec<Value>) -> Vec<Value> {
    let mut keyed: Vec<(u64, String, Value)> = values
        .into_iter()
        .map(|value| {
            let text = value.to_string();
            let mut hasher = DefaultHasher::new();
            text.hash(&mut hasher);
            (hasher.finish(), text, value)
        })
        .collect();
    keyed.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));
    keyed.dedup_by(|a, b| a.1 == b.1);
    keyed.into_iter().map(|(_, _, value)| value).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key(attribute: &str) -> CacheKey {
        let search_key: SearchKey<Value> = SearchKey::new("Catalog", ["DATA"]);
        CacheKey::new(&search_key, &Criterion::eq_int("count", 1), attribute).unwrap()
    }

    #[test]
    fn test_stable_order_ignores_input_order() {
        let forward = stable_order(vec![json!("a"), json!("b"), json!("c"), json!("a")]);
        let backward = stable_order(vec![json!("c"), json!("a"), json!("b")]);
        assert_eq!(forward, backward);
        assert_eq!(forward.len(), 3);
    }

    #[test]
    fn test_cache_key_equality() {
        assert_eq!(key("files.uri"), key("files.uri"));
        assert_ne!(key("files.uri"), key("files.name"));
        assert_eq!(key("files.uri").index(), "catalog");
    }

    #[tokio::test]
    async fn test_second_call_hits_cache() {
        let cache = ForwardingCache::new(Duration::from_secs(180));
        let counter = AtomicUsize::new(0);
        let loads = &counter;

        for _ in 0..2 {
            let values = cache
                .get_or_load(key("label"), move || async move {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![json!("x")])
                })
                .await
                .unwrap();
            assert_eq!(values.as_slice(), &[json!("x")]);
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_load_is_retried() {
        let cache = ForwardingCache::new(Duration::from_secs(180));

        let failed = cache
            .get_or_load(key("label"), || async { Err(SearchIndexError::timeout(3)) })
            .await;
        assert!(failed.is_err());

        let values = cache
            .get_or_load(key("label"), || async { Ok(vec![json!(1)]) })
            .await
            .unwrap();
        assert_eq!(values.len(), 1);
    }

    #[tokio::test]
    async fn test_expiry_after_last_access() {
        let clock = Arc::new(ManualClock::new());
        let cache = ForwardingCache::with_clock(Duration::from_secs(180), clock.clone());
        let counter = AtomicUsize::new(0);
        let loads = &counter;
        let load = move || async move {
            loads.fetch_add(1, Ordering::SeqCst);
            Ok(vec![json!("x")])
        };

        cache.get_or_load(key("label"), load).await.unwrap();
        clock.advance(Duration::from_secs(120));
        cache.get_or_load(key("label"), load).await.unwrap();
        clock.advance(Duration::from_secs(120));
        cache.get_or_load(key("label"), load).await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(181));
        cache.get_or_load(key("label"), load).await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_invalidate_index() {
        let cache = ForwardingCache::new(Duration::from_secs(180));
        cache
            .entries
            .insert(key("label"), Arc::new(CacheEntry::new(Instant::now())));
        assert_eq!(cache.len(), 1);
        cache.invalidate_index("other");
        assert_eq!(cache.len(), 1);
        cache.invalidate_index("catalog");
        assert!(cache.is_empty());
    }
}
