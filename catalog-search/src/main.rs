//! Catalog Search Main Entry Point
//!
//! Connects to OpenSearch, makes sure the configured catalog indices exist
//! and reports how many documents each one holds.

use catalog_search::{BootstrapConfig, BootstrapError, Dependencies};
use dotenv::dotenv;
use std::env;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing/logging.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("catalog_search=info,catalog_search_repository=info")
    });

    let json = env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(true).pretty())
            .init();
    }

    info!(
        service_name = "catalog-search",
        service_version = env!("CARGO_PKG_VERSION"),
        json,
        "Tracing initialized"
    );
}

#[tokio::main]
async fn main() -> Result<(), BootstrapError> {
    // Load environment variables from .env file
    dotenv().ok();

    init_tracing();

    info!("Starting catalog search bootstrap");

    let deps = match Dependencies::new(BootstrapConfig::from_env()).await {
        Ok(deps) => {
            info!("Dependencies initialized successfully");
            deps
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize dependencies");
            return Err(e);
        }
    };

    if let Err(e) = deps.ensure_indices().await {
        error!(error = %e, "Failed to prepare catalog indices");
        return Err(e);
    }

    match deps.document_counts().await {
        Ok(counts) => {
            for (index, count) in counts {
                info!(index = %index, documents = count, "Catalog index ready");
            }
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Failed to count catalog documents");
            Err(e)
        }
    }
}
