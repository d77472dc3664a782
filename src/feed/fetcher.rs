//! HTTP fetch boundary and the refresh/dedup engine.
//!
//! Fetching is deliberately thin: a GET with a fixed User-Agent, caching
//! disabled, a timeout, and a body size cap. Everything after the raw XML
//! text is the pure pipeline in [`parser`](super::parser).
//!
//! Refresh semantics: only items whose `link` is not already persisted are
//! inserted; existing rows are never mutated, which is what keeps
//! read/star/summary state stable across arbitrarily many refreshes. The
//! feed's `last_fetched` is stamped unconditionally. Multi-feed refresh is
//! sequential with a fixed inter-feed delay (a deliberate throttle against
//! remote rate limits, not a correctness requirement), and at most one
//! refresh cycle runs at a time.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use thiserror::Error;

use super::parser::{self, ParseError};
use crate::storage::{Feed, FeedItem, StorageError};

/// Fixed User-Agent sent with every feed request.
pub const USER_AGENT: &str = concat!("readly/", env!("CARGO_PKG_VERSION"));

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Errors that can occur while fetching and ingesting a single feed.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("Failed to fetch feed: HTTP status {0}")]
    HttpStatus(u16),
    /// Request exceeded the fetch timeout
    #[error("Request timed out")]
    Timeout,
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Feed XML could not be parsed or matched no known format
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// A refresh failure for one feed: either the fetch/parse side or the
/// storage side.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Storage port consumed by the refresh engine.
///
/// The engine depends on this narrow interface rather than the concrete
/// database so it can be exercised against an in-memory double.
#[allow(async_fn_in_trait)]
pub trait FeedStore {
    /// Whether a subscription with this URL already exists.
    async fn url_exists(&self, url: &str) -> Result<bool, StorageError>;

    /// The set of persisted item links for a feed — the dedup reference.
    async fn existing_item_links(&self, feed_id: &str) -> Result<HashSet<String>, StorageError>;

    /// Persist new items for a feed. Returns the number inserted.
    async fn insert_items(&self, feed_id: &str, items: &[FeedItem]) -> Result<usize, StorageError>;

    /// Stamp the feed's `last_fetched` to now.
    async fn touch_last_fetched(&self, feed_id: &str) -> Result<(), StorageError>;
}

/// Outcome of refreshing one feed within a batch.
pub struct RefreshOutcome {
    pub feed_id: String,
    pub feed_title: String,
    /// Number of new items inserted, or the error for this feed.
    pub result: Result<usize, RefreshError>,
}

// ============================================================================
// Fetch
// ============================================================================

/// Builds the HTTP client used for all feed traffic.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
}

/// Fetches raw feed XML from a URL.
///
/// Sends a fixed User-Agent and disables caching (always revalidate).
/// Non-2xx responses fail fast with the status embedded in the error,
/// before any parse is attempted.
pub async fn fetch_feed(client: &reqwest::Client, url: &str) -> Result<String, FetchError> {
    let response = tokio::time::timeout(
        FETCH_TIMEOUT,
        client
            .get(url)
            .header(reqwest::header::CACHE_CONTROL, "no-cache")
            .send(),
    )
    .await
    .map_err(|_| FetchError::Timeout)?
    .map_err(FetchError::Network)?;

    if !response.status().is_success() {
        return Err(FetchError::HttpStatus(response.status().as_u16()));
    }

    let bytes = read_limited_bytes(response, MAX_FEED_SIZE).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Fetches a feed URL and runs the full normalization pipeline.
pub async fn fetch_and_parse_feed(
    client: &reqwest::Client,
    url: &str,
) -> Result<Feed, FetchError> {
    let xml = fetch_feed(client, url).await?;
    Ok(parser::parse_feed(&xml, url)?)
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Fast path: Content-Length already over the cap
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

// ============================================================================
// Refresh/Dedup Engine
// ============================================================================

/// Filters freshly fetched items down to those not already persisted.
///
/// Identity is `link`, not id or guid. The check is only against the
/// persisted set: duplicate links within a single fetched batch all pass
/// through (tolerated upstream malformation; display dedups by id).
pub fn select_new_items(fetched: Vec<FeedItem>, existing_links: &HashSet<String>) -> Vec<FeedItem> {
    fetched
        .into_iter()
        .filter(|item| !existing_links.contains(&item.link))
        .collect()
}

/// Refreshes a single feed: fetch, normalize, insert only new items, stamp
/// `last_fetched`.
///
/// Existing items are never touched, so `is_read`/`is_starred`/`summary`
/// survive. The timestamp is stamped whether or not anything was new.
pub async fn refresh_feed<S: FeedStore>(
    store: &S,
    client: &reqwest::Client,
    feed: &Feed,
) -> Result<usize, RefreshError> {
    let fresh = fetch_and_parse_feed(client, &feed.url).await?;
    let existing = store.existing_item_links(&feed.id).await?;
    let new_items = select_new_items(fresh.items, &existing);

    let inserted = if new_items.is_empty() {
        0
    } else {
        store.insert_items(&feed.id, &new_items).await?
    };
    store.touch_last_fetched(&feed.id).await?;

    Ok(inserted)
}

/// Refreshes a batch of feeds sequentially with a fixed inter-feed delay.
///
/// One failing feed is logged and skipped; the batch continues. Returns
/// a [`RefreshOutcome`] per feed, in input order. If another refresh cycle
/// is already in flight the request is dropped (empty result), not queued.
pub async fn refresh_all<S: FeedStore>(
    store: &S,
    client: &reqwest::Client,
    feeds: &[Feed],
    guard: &RefreshGuard,
    delay: Duration,
) -> Vec<RefreshOutcome> {
    let Some(_in_flight) = guard.try_begin() else {
        tracing::debug!("Refresh already in progress, dropping request");
        return Vec::new();
    };

    let mut outcomes = Vec::with_capacity(feeds.len());
    for (i, feed) in feeds.iter().enumerate() {
        let result = refresh_feed(store, client, feed).await;
        match &result {
            Ok(inserted) => {
                tracing::info!(feed = %feed.url, new_items = inserted, "Feed refreshed");
            }
            Err(e) => {
                tracing::warn!(feed = %feed.url, title = %feed.title, error = %e, "Feed refresh failed, continuing with next feed");
            }
        }
        outcomes.push(RefreshOutcome {
            feed_id: feed.id.clone(),
            feed_title: feed.title.clone(),
            result,
        });

        // Brief pause between requests; none needed after the last.
        if i + 1 < feeds.len() {
            tokio::time::sleep(delay).await;
        }
    }

    outcomes
}

/// "At most one refresh cycle" guard.
///
/// A second refresh requested while one is running is a no-op. This is
/// batch-scoped, not per-feed mutual exclusion.
#[derive(Clone, Default)]
pub struct RefreshGuard {
    in_flight: Arc<AtomicBool>,
}

impl RefreshGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the guard. Returns `None` when a refresh is already running;
    /// otherwise the returned token releases the guard on drop.
    pub fn try_begin(&self) -> Option<InFlight> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight {
                in_flight: Arc::clone(&self.in_flight),
            })
    }

    pub fn is_refreshing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }
}

/// Token for a running refresh cycle; releases the guard when dropped.
pub struct InFlight {
    in_flight: Arc<AtomicBool>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.in_flight.store(false, Ordering::Release);
    }
}

/// Whether a feed is due for refresh, given a staleness threshold.
///
/// Feeds that have never been fetched, or whose `last_fetched` does not
/// parse, are always stale.
pub fn is_stale(feed: &Feed, threshold: Duration) -> bool {
    let Some(last_fetched) = feed.last_fetched.as_deref() else {
        return true;
    };
    match chrono::DateTime::parse_from_rfc3339(last_fetched) {
        Ok(ts) => {
            let age = chrono::Utc::now().signed_duration_since(ts);
            age.num_milliseconds() > threshold.as_millis() as i64
        }
        Err(_) => true,
    }
}
