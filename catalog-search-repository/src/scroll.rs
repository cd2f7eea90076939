//! Cursor-based iteration over every document matching a query.
//!
//! Memory use is bounded by one page of hits whatever the number of matches.
//! Opening the cursor is retried like any search when it times out; a later
//! page that times out ends the iteration. The cursor is released on every
//! exit path; a failed release is logged and never reported to the caller.

use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::errors::SearchIndexError;
use crate::interfaces::SearchBackend;
use crate::retry::TimeoutRetry;
use crate::types::{SearchHit, SearchResponse};

/// Run `body` as a scroll and call `on_hit` once per matching document.
///
/// Iteration stops at the first page without hits or at the first error,
/// whether it comes from the backend or from the callback.
///
/// # Returns
///
/// * `Ok(u64)` - The number of hits passed to the callback
/// * `Err(SearchIndexError)` - The first backend or callback error
#[instrument(skip(backend, retry, body, on_hit))]
pub async fn for_each_hit<F>(
    backend: &dyn SearchBackend,
    retry: &TimeoutRetry,
    index: &str,
    body: &Value,
    keep_alive: &str,
    mut on_hit: F,
) -> Result<u64, SearchIndexError>
where
    F: FnMut(SearchHit) -> Result<(), SearchIndexError>,
{
    let mut scroll_id: Option<String> = None;
    let mut visited = 0u64;

    let outcome = drain(
        backend,
        retry,
        index,
        body,
        keep_alive,
        &mut scroll_id,
        &mut visited,
        &mut on_hit,
    )
    .await;

    if let Some(cursor) = scroll_id {
        release(backend, &cursor).await;
    }

    outcome?;
    debug!(visited, "Scroll completed");
    Ok(visited)
}

#[allow(clippy::too_many_arguments)]
async fn drain<F>(
    backend: &dyn SearchBackend,
    retry: &TimeoutRetry,
    index: &str,
    body: &Value,
    keep_alive: &str,
    scroll_id: &mut Option<String>,
    visited: &mut u64,
    on_hit: &mut F,
) -> Result<(), SearchIndexError>
where
    F: FnMut(SearchHit) -> Result<(), SearchIndexError>,
{
    let mut page = retry
        .run(index, || open_page(backend, index, body, keep_alive))
        .await?;
    loop {
        if page.scroll_id.is_some() {
            *scroll_id = page.scroll_id.take();
        }
        check_timeout(&page)?;
        if page.hits.is_empty() {
            return Ok(());
        }
        for hit in page.hits {
            on_hit(hit)?;
            *visited += 1;
        }
        let Some(cursor) = scroll_id.as_deref() else {
            return Ok(());
        };
        page = backend.scroll_next(cursor, keep_alive).await?;
    }
}

/// Open a cursor; the cursor of a timed out first page is released at once
/// since the retry opens a new one.
async fn open_page(
    backend: &dyn SearchBackend,
    index: &str,
    body: &Value,
    keep_alive: &str,
) -> Result<SearchResponse, SearchIndexError> {
    let mut page = backend.scroll_open(index, body, keep_alive).await?;
    if page.timed_out {
        if let Some(cursor) = page.scroll_id.take() {
            release(backend, &cursor).await;
        }
    }
    Ok(page)
}

async fn release(backend: &dyn SearchBackend, cursor: &str) {
    if let Err(e) = backend.clear_scroll(cursor).await {
        warn!(error = %e, "Failed to release scroll cursor");
    }
}

fn check_timeout(page: &SearchResponse) -> Result<(), SearchIndexError> {
    if page.timed_out {
        return Err(SearchIndexError::timeout(1));
    }
    Ok(())
}

/// Values found at a dotted path of a document.
///
/// Arrays met along the path (including at its end) are flattened, so an
/// array-valued attribute yields one value per element. Missing paths and
/// null values yield nothing.
pub fn extract_path(source: &Value, path: &str) -> Vec<Value> {
    let mut current: Vec<&Value> = vec![source];
    for segment in path.split('.') {
        let mut next = Vec::new();
        for value in current {
            collect_field(value, segment, &mut next);
        }
        current = next;
    }

    let mut values = Vec::new();
    for value in current {
        flatten_into(value, &mut values);
    }
    values
}

fn collect_field<'a>(value: &'a Value, segment: &str, out: &mut Vec<&'a Value>) {
    match value {
        Value::Object(map) => {
            if let Some(child) = map.get(segment) {
                out.push(child);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_field(item, segment, out);
            }
        }
        _ => {}
    }
}

fn flatten_into(value: &Value, out: &mut Vec<Value>) {
    match value {
        Value::Null => {}
        Value::Array(items) => {
            for item in items {
                flatten_into(item, out);
            }
        }
        other => out.push(other.clone()),
    }
}
