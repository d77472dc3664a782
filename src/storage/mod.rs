//! SQLite-backed persistence for subscriptions, items, and folders.
//!
//! [`Database`] is a cheap-to-clone handle over a connection pool. The
//! schema is created on open; see [`schema`] for the table layout. Feed
//! and item ids are opaque text (UUIDs minted at insert time), and the
//! feed URL is the unique business key for subscriptions.

mod feeds;
mod folders;
mod items;
mod schema;
mod types;

pub use schema::Database;
pub use types::{Feed, FeedItem, Folder, OpmlOutline, StorageError};

use std::collections::HashSet;

use crate::feed::fetcher::FeedStore;

impl FeedStore for Database {
    async fn url_exists(&self, url: &str) -> Result<bool, StorageError> {
        Database::url_exists(self, url).await
    }

    async fn existing_item_links(&self, feed_id: &str) -> Result<HashSet<String>, StorageError> {
        Database::existing_item_links(self, feed_id).await
    }

    async fn insert_items(&self, feed_id: &str, items: &[FeedItem]) -> Result<usize, StorageError> {
        Database::insert_items(self, feed_id, items).await
    }

    async fn touch_last_fetched(&self, feed_id: &str) -> Result<(), StorageError> {
        Database::touch_last_fetched(self, feed_id).await
    }
}
