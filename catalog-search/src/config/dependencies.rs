//! Dependency initialization and wiring for the catalog search bootstrap.

use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::BootstrapError;
use catalog_search_repository::{OpenSearchBackend, SearchRepository, SearchRepositoryConfig};
use catalog_search_shared::{Criterion, SearchKey};
use serde_json::Value;

/// Default OpenSearch URL.
const DEFAULT_OPENSEARCH_URL: &str = "http://localhost:9200";

/// Default catalog indices.
const DEFAULT_CATALOG_INDICES: &str = "catalog";

/// Default connection retry interval in seconds.
const DEFAULT_RETRY_INTERVAL_SECS: u64 = 15;

/// Connection mode for OpenSearch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    /// Fail immediately if connection fails.
    FailFast,
    /// Retry connection at a fixed interval until successful.
    Retry,
}

impl ConnectionMode {
    /// Parse a connection mode.
    ///
    /// Valid values: "fail-fast" or "retry" (case-insensitive).
    /// Defaults to "retry" if not set or invalid.
    fn parse(value: Option<&str>) -> Self {
        match value.unwrap_or("retry").to_lowercase().as_str() {
            "fail-fast" | "failfast" | "fail_fast" => Self::FailFast,
            "retry" => Self::Retry,
            other => {
                warn!(mode = %other, "Invalid OPENSEARCH_CONNECTION_MODE, defaulting to 'retry'");
                Self::Retry
            }
        }
    }
}

/// Settings read from the environment.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    pub opensearch_url: String,
    /// Lower-cased names of the indices to prepare.
    pub indices: Vec<String>,
    pub connection_mode: ConnectionMode,
    pub retry_interval: Duration,
    pub repository: SearchRepositoryConfig,
}

impl BootstrapConfig {
    /// Read the configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `OPENSEARCH_URL`: OpenSearch server URL (default: http://localhost:9200)
    /// - `CATALOG_INDICES`: Comma-separated index names (default: "catalog")
    /// - `OPENSEARCH_CONNECTION_MODE`: Connection mode - "fail-fast" or "retry" (default: retry)
    /// - `OPENSEARCH_RETRY_INTERVAL_SECS`: Retry interval in seconds (default: 15)
    /// - `SCROLL_PAGE_SIZE`: Hits fetched per scroll page (default: 100)
    /// - `FORWARDING_CACHE_TTL_SECS`: Idle time before a cached projection expires (default: 180)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let opensearch_url =
            lookup("OPENSEARCH_URL").unwrap_or_else(|| DEFAULT_OPENSEARCH_URL.to_string());
        let indices = parse_indices(
            &lookup("CATALOG_INDICES").unwrap_or_else(|| DEFAULT_CATALOG_INDICES.to_string()),
        );
        let connection_mode = ConnectionMode::parse(lookup("OPENSEARCH_CONNECTION_MODE").as_deref());
        let retry_interval = lookup("OPENSEARCH_RETRY_INTERVAL_SECS")
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_RETRY_INTERVAL_SECS);

        let mut repository = SearchRepositoryConfig::default();
        if let Some(page_size) = lookup("SCROLL_PAGE_SIZE").and_then(|s| s.parse::<usize>().ok()) {
            repository = repository.with_scroll_page_size(page_size);
        }
        if let Some(ttl) = lookup("FORWARDING_CACHE_TTL_SECS").and_then(|s| s.parse::<u64>().ok()) {
            repository = repository.with_cache_ttl(Duration::from_secs(ttl));
        }

        Self {
            opensearch_url,
            indices,
            connection_mode,
            retry_interval: Duration::from_secs(retry_interval),
            repository,
        }
    }
}

/// Split a comma-separated index list, lower-casing and dropping blanks.
fn parse_indices(value: &str) -> Vec<String> {
    let mut indices: Vec<String> = Vec::new();
    for index in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let index = index.to_lowercase();
        if !indices.contains(&index) {
            indices.push(index);
        }
    }
    indices
}

/// Container for all initialized dependencies.
pub struct Dependencies {
    /// The repository connected to OpenSearch.
    pub repository: Arc<SearchRepository>,
    /// The catalog indices this process manages.
    pub indices: Vec<String>,
}

impl Dependencies {
    /// Initialize all dependencies from the given configuration.
    ///
    /// # Returns
    ///
    /// * `Ok(Dependencies)` - Initialized dependencies
    /// * `Err(BootstrapError)` - If initialization fails (only in fail-fast mode)
    pub async fn new(config: BootstrapConfig) -> Result<Self, BootstrapError> {
        info!(
            opensearch_url = %config.opensearch_url,
            indices = ?config.indices,
            connection_mode = ?config.connection_mode,
            retry_interval_secs = config.retry_interval.as_secs(),
            "Initializing dependencies"
        );

        if config.indices.is_empty() {
            return Err(BootstrapError::config("CATALOG_INDICES names no index"));
        }

        let backend = Self::connect_to_opensearch(
            &config.opensearch_url,
            config.connection_mode,
            config.retry_interval,
        )
        .await?;

        info!("OpenSearch connection established");

        let repository = SearchRepository::with_config(Arc::new(backend), config.repository);
        Ok(Self {
            repository: Arc::new(repository),
            indices: config.indices,
        })
    }

    /// Create every configured index that does not exist yet.
    pub async fn ensure_indices(&self) -> Result<(), BootstrapError> {
        for index in &self.indices {
            if self.repository.create_index(index).await? {
                info!(index = %index, "Index created");
            } else {
                info!(index = %index, "Index already exists");
            }
        }
        Ok(())
    }

    /// Number of documents of each configured index.
    pub async fn document_counts(&self) -> Result<Vec<(String, u64)>, BootstrapError> {
        let mut counts = Vec::with_capacity(self.indices.len());
        for index in &self.indices {
            let key: SearchKey<Value> = SearchKey::new(index, Vec::<String>::new());
            let count = self.repository.count(&key, &Criterion::Empty).await?;
            counts.push((index.clone(), count));
        }
        Ok(counts)
    }

    /// Connect to OpenSearch with retry logic based on connection mode.
    async fn connect_to_opensearch(
        url: &str,
        mode: ConnectionMode,
        retry_interval: Duration,
    ) -> Result<OpenSearchBackend, BootstrapError> {
        loop {
            match Self::try_connect_opensearch(url).await {
                Ok(backend) => return Ok(backend),
                Err(e) => match mode {
                    ConnectionMode::FailFast => {
                        return Err(BootstrapError::config(format!(
                            "Failed to connect to OpenSearch: {}",
                            e
                        )));
                    }
                    ConnectionMode::Retry => {
                        warn!(
                            opensearch_url = %url,
                            error = %e,
                            retry_interval_secs = retry_interval.as_secs(),
                            "Failed to connect to OpenSearch, retrying..."
                        );
                        sleep(retry_interval).await;
                    }
                },
            }
        }
    }

    /// Attempt to connect to OpenSearch and check it answers.
    async fn try_connect_opensearch(url: &str) -> Result<OpenSearchBackend, BootstrapError> {
        let backend = OpenSearchBackend::new(url).await?;
        backend.ping().await?;
        Ok(backend)
    }
}
