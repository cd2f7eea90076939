//! Configuration types for the SearchRepository.

use std::time::Duration;

/// Configuration for the SearchRepository.
///
/// This struct controls batching, scrolling, retry and caching behaviour. The
/// defaults match what the catalog expects from a standard OpenSearch cluster.
#[derive(Debug, Clone)]
pub struct SearchRepositoryConfig {
    /// Maximum number of documents sent in a single bulk request.
    ///
    /// Larger batches are split into chunks of this size. Set to `None` to
    /// send every batch in one request.
    pub max_batch_size: Option<usize>,

    /// Number of hits fetched per scroll page.
    pub scroll_page_size: usize,

    /// How long the backend keeps a scroll cursor alive between pages.
    pub scroll_keep_alive: Duration,

    /// Total number of attempts for a search the backend reports as timed out.
    pub max_timeout_attempts: usize,

    /// Pause between two attempts of a timed out search.
    pub timeout_retry_interval: Duration,

    /// Time after the last access at which a forwarding cache entry expires.
    pub cache_ttl: Duration,

    /// Maximum number of buckets returned for a string facet.
    pub string_facet_size: usize,

    /// Largest `offset + size` accepted for offset-paged searches.
    pub max_result_window: usize,

    /// Whether the index is refreshed after each bulk save.
    pub refresh_after_bulk: bool,
}

impl Default for SearchRepositoryConfig {
    fn default() -> Self {
        Self {
            max_batch_size: Some(1000),
            scroll_page_size: 100,
            scroll_keep_alive: Duration::from_secs(10 * 60),
            max_timeout_attempts: 3,
            timeout_retry_interval: Duration::from_millis(200),
            cache_ttl: Duration::from_secs(3 * 60),
            string_facet_size: 100,
            max_result_window: 10_000,
            refresh_after_bulk: true,
        }
    }
}

impl SearchRepositoryConfig {
    /// Create a config with no bulk batch size limit.
    ///
    /// # Warning
    ///
    /// Use with caution. Very large bulk requests can be rejected by the
    /// backend or time out.
    pub fn unlimited() -> Self {
        Self {
            max_batch_size: None,
            ..Self::default()
        }
    }

    /// Set the maximum number of documents per bulk request.
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = Some(max_batch_size.max(1));
        self
    }

    /// Set the number of hits fetched per scroll page.
    pub fn with_scroll_page_size(mut self, page_size: usize) -> Self {
        self.scroll_page_size = page_size.max(1);
        self
    }

    pub fn with_scroll_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.scroll_keep_alive = keep_alive;
        self
    }

    /// Set the retry policy for searches reported as timed out.
    ///
    /// # Arguments
    ///
    /// * `max_attempts` - Total attempts, including the first one
    /// * `interval` - Pause between two attempts
    pub fn with_timeout_retry(mut self, max_attempts: usize, interval: Duration) -> Self {
        self.max_timeout_attempts = max_attempts.max(1);
        self.timeout_retry_interval = interval;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_string_facet_size(mut self, size: usize) -> Self {
        self.string_facet_size = size;
        self
    }

    pub fn with_max_result_window(mut self, max_result_window: usize) -> Self {
        self.max_result_window = max_result_window;
        self
    }

    pub fn with_refresh_after_bulk(mut self, refresh: bool) -> Self {
        self.refresh_after_bulk = refresh;
        self
    }

    /// Keep-alive in the backend duration syntax (e.g. `"10m"`).
    pub(crate) fn keep_alive_param(&self) -> String {
        format_duration(self.scroll_keep_alive)
    }
}

/// Format a duration with the coarsest OpenSearch time unit that is exact.
pub(crate) fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis == 0 {
        return "1ms".to_string();
    }
    if millis % 60_000 == 0 {
        format!("{}m", millis / 60_000)
    } else if millis % 1000 == 0 {
        format!("{}s", millis / 1000)
    } else {
        format!("{}ms", millis)
    }
}
