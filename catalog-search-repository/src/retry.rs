//! Bounded retry of search requests the backend reports as timed out.
//!
//! Plain searches and the first page of a scroll share this policy: an
//! attempt is retried after a fixed interval while it times out, up to
//! `max_attempts` attempts in total.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio_retry::{strategy::FixedInterval, RetryIf};
use tracing::warn;

use crate::config::SearchRepositoryConfig;
use crate::errors::SearchIndexError;
use crate::types::SearchResponse;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutRetry {
    max_attempts: usize,
    interval: Duration,
}

impl TimeoutRetry {
    pub fn new(max_attempts: usize, interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
        }
    }

    pub fn from_config(config: &SearchRepositoryConfig) -> Self {
        Self::new(config.max_timeout_attempts, config.timeout_retry_interval)
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Run `attempt` until it returns a response that did not time out.
    ///
    /// A response flagged `timed_out` and a transport timeout both count as
    /// a timed out attempt. Any other error is returned at once.
    ///
    /// # Returns
    ///
    /// * `Ok(SearchResponse)` - The first response that did not time out
    /// * `Err(SearchIndexError::Timeout)` - Every attempt timed out; carries
    ///   the number of attempts made
    pub async fn run<F, Fut>(&self, index: &str, mut attempt: F) -> Result<SearchResponse, SearchIndexError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<SearchResponse, SearchIndexError>>,
    {
        let counter = AtomicUsize::new(0);
        let attempts = &counter;
        let strategy = FixedInterval::new(self.interval).take(self.max_attempts - 1);

        let result = RetryIf::spawn(
            strategy,
            || {
                let pending = attempt();
                async move {
                    let made = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    let response = pending.await?;
                    if response.timed_out {
                        warn!(index = %index, attempt = made, "Search timed out");
                        return Err(SearchIndexError::timeout(made));
                    }
                    Ok(response)
                }
            },
            |e: &SearchIndexError| e.is_timeout(),
        )
        .await;

        result.map_err(|e| match e {
            SearchIndexError::Timeout { .. } => {
                SearchIndexError::timeout(attempts.load(Ordering::SeqCst))
            }
            other => other,
        })
    }
}
