use serde::Serialize;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Storage-layer errors with user-facing messages.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A feed with this subscription URL already exists. The URL is the
    /// business key for subscriptions; callers are expected to check
    /// `url_exists` before ingesting a new feed.
    #[error("Already subscribed to {0}")]
    DuplicateSubscription(String),

    /// The requested feed, item, or folder does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

// ============================================================================
// Canonical Data Model
// ============================================================================

/// A subscribed syndication source and its cached metadata.
///
/// `url` is the canonical subscription key (unique across all feeds).
/// `id` is synthetic: the pipeline assigns one at ingestion time, and the
/// storage layer assigns a fresh one on insert — the persisted id is the
/// authoritative value.
#[derive(Debug, Clone, Serialize)]
pub struct Feed {
    pub id: String,
    pub title: String,
    /// Subscription (XML) URL — the business key.
    pub url: String,
    /// The feed's own site URL. Doubles as the base URL for resolving
    /// relative links and images in item content.
    pub link: String,
    pub description: String,
    pub image_url: Option<String>,
    pub folder_id: Option<String>,
    /// ISO-8601 timestamp of the last successful fetch, if any.
    pub last_fetched: Option<String>,
    pub items: Vec<FeedItem>,
}

/// One article/entry belonging to a [`Feed`].
///
/// `link` is the dedup key across refreshes: two fetches that both see an
/// item with the same link are the same logical item. `is_read`,
/// `is_starred`, and `summary` are local state and survive re-fetch.
#[derive(Debug, Clone, Serialize)]
pub struct FeedItem {
    pub id: String,
    pub feed_id: String,
    pub title: String,
    pub link: String,
    /// Trusted embeddable HTML; possibly empty, never absent.
    pub content: String,
    /// Plain-text derivation of `content`: tags stripped, whitespace
    /// collapsed, at most 200 characters. Recomputable at any time.
    pub content_snippet: String,
    pub author: String,
    /// Raw source-provided date string (RFC-822, ISO-8601, or anything
    /// else). Stored as-is; sorting elsewhere tolerates the unparseable.
    pub pub_date: String,
    pub image_url: Option<String>,
    pub is_read: bool,
    pub is_starred: bool,
    pub summary: Option<String>,
}

/// A pure organizational grouping. A feed belongs to at most one folder;
/// deleting a folder leaves its feeds uncategorized rather than deleting
/// them.
#[derive(Debug, Clone, Serialize)]
pub struct Folder {
    pub id: String,
    pub name: String,
    pub is_expanded: bool,
    pub sort_by: Option<String>,
    pub position: i64,
}

/// One subscription outline from an OPML document. `folder` is the name of
/// the nearest enclosing non-leaf outline, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpmlOutline {
    pub title: String,
    pub xml_url: String,
    pub html_url: Option<String>,
    pub folder: Option<String>,
}

// ============================================================================
// Row Types
// ============================================================================

/// Internal row type for feed queries (items are loaded separately).
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeedRow {
    pub id: String,
    pub title: String,
    pub url: String,
    pub link: String,
    pub description: String,
    pub image_url: Option<String>,
    pub folder_id: Option<String>,
    pub last_fetched: Option<String>,
}

impl FeedRow {
    pub(crate) fn into_feed(self) -> Feed {
        Feed {
            id: self.id,
            title: self.title,
            url: self.url,
            link: self.link,
            description: self.description,
            image_url: self.image_url,
            folder_id: self.folder_id,
            last_fetched: self.last_fetched,
            items: Vec::new(),
        }
    }
}

/// Internal row type for item queries.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeedItemRow {
    pub id: String,
    pub feed_id: String,
    pub title: String,
    pub link: String,
    pub content: String,
    pub content_snippet: String,
    pub author: String,
    pub pub_date: String,
    pub image_url: Option<String>,
    pub is_read: bool,
    pub is_starred: bool,
    pub summary: Option<String>,
}

impl FeedItemRow {
    pub(crate) fn into_item(self) -> FeedItem {
        FeedItem {
            id: self.id,
            feed_id: self.feed_id,
            title: self.title,
            link: self.link,
            content: self.content,
            content_snippet: self.content_snippet,
            author: self.author,
            pub_date: self.pub_date,
            image_url: self.image_url,
            is_read: self.is_read,
            is_starred: self.is_starred,
            summary: self.summary,
        }
    }
}
