//! Item persistence and per-item local state (read/star/summary).

use std::collections::HashSet;

use sqlx::QueryBuilder;
use uuid::Uuid;

use super::schema::Database;
use super::types::{FeedItem, FeedItemRow, StorageError};
use crate::feed::text::pub_date_timestamp;

/// Items inserted per transaction. Bounded so a feed with hundreds of
/// items (or a bulk OPML import) stays within the store's transaction
/// size limits; chunks are applied sequentially and any failure
/// propagates to the caller rather than passing as success.
const BATCH_SIZE: usize = 50;

impl Database {
    /// Insert items for a feed, in bounded sequential batches.
    ///
    /// Every item gets a fresh persisted id (the ingestion-time id is
    /// discarded). Returns the number of rows inserted.
    pub async fn insert_items(
        &self,
        feed_id: &str,
        items: &[FeedItem],
    ) -> Result<usize, StorageError> {
        if items.is_empty() {
            return Ok(0);
        }

        let now = chrono::Utc::now().timestamp();
        let mut inserted = 0usize;

        for chunk in items.chunks(BATCH_SIZE) {
            let mut tx = self.pool.begin().await?;

            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "INSERT INTO feed_items (id, feed_id, title, link, content, content_snippet, \
                 author, pub_date, image_url, is_read, is_starred, summary, created_at) ",
            );
            builder.push_values(chunk, |mut b, item| {
                b.push_bind(Uuid::new_v4().to_string())
                    .push_bind(feed_id)
                    .push_bind(&item.title)
                    .push_bind(&item.link)
                    .push_bind(&item.content)
                    .push_bind(&item.content_snippet)
                    .push_bind(&item.author)
                    .push_bind(&item.pub_date)
                    .push_bind(&item.image_url)
                    .push_bind(item.is_read)
                    .push_bind(item.is_starred)
                    .push_bind(&item.summary)
                    .push_bind(now);
            });

            let result = builder.build().execute(&mut *tx).await?;
            inserted += result.rows_affected() as usize;

            tx.commit().await?;
        }

        Ok(inserted)
    }

    /// The set of persisted item links for a feed — the refresh engine's
    /// dedup reference.
    pub async fn existing_item_links(
        &self,
        feed_id: &str,
    ) -> Result<HashSet<String>, StorageError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT link FROM feed_items WHERE feed_id = ?")
            .bind(feed_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(link,)| link).collect())
    }

    /// All items for a feed, newest first.
    ///
    /// Source dates vary in format and may be garbage, so ordering uses
    /// the tolerant timestamp parse (unparseable sorts oldest), with
    /// insertion order as the tiebreak.
    pub async fn get_items(&self, feed_id: &str) -> Result<Vec<FeedItem>, StorageError> {
        let rows: Vec<FeedItemRow> = sqlx::query_as(
            r#"
            SELECT id, feed_id, title, link, content, content_snippet, author,
                   pub_date, image_url, is_read, is_starred, summary
            FROM feed_items
            WHERE feed_id = ?
            ORDER BY created_at DESC
        "#,
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?;

        let mut items: Vec<FeedItem> = rows.into_iter().map(FeedItemRow::into_item).collect();
        items.sort_by_key(|item| std::cmp::Reverse(pub_date_timestamp(&item.pub_date)));
        Ok(items)
    }

    pub async fn get_item(&self, item_id: &str) -> Result<FeedItem, StorageError> {
        let row: Option<FeedItemRow> = sqlx::query_as(
            r#"
            SELECT id, feed_id, title, link, content, content_snippet, author,
                   pub_date, image_url, is_read, is_starred, summary
            FROM feed_items
            WHERE id = ?
        "#,
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(FeedItemRow::into_item)
            .ok_or_else(|| StorageError::NotFound(format!("item {}", item_id)))
    }

    /// All starred items across feeds, newest first.
    pub async fn get_starred_items(&self) -> Result<Vec<FeedItem>, StorageError> {
        let rows: Vec<FeedItemRow> = sqlx::query_as(
            r#"
            SELECT id, feed_id, title, link, content, content_snippet, author,
                   pub_date, image_url, is_read, is_starred, summary
            FROM feed_items
            WHERE is_starred = 1
            ORDER BY created_at DESC
        "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut items: Vec<FeedItem> = rows.into_iter().map(FeedItemRow::into_item).collect();
        items.sort_by_key(|item| std::cmp::Reverse(pub_date_timestamp(&item.pub_date)));
        Ok(items)
    }

    pub async fn mark_read(&self, item_id: &str, is_read: bool) -> Result<(), StorageError> {
        let result = sqlx::query("UPDATE feed_items SET is_read = ? WHERE id = ?")
            .bind(is_read)
            .bind(item_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("item {}", item_id)));
        }
        Ok(())
    }

    /// Toggle the starred flag; returns the new value.
    pub async fn toggle_star(&self, item_id: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("UPDATE feed_items SET is_starred = NOT is_starred WHERE id = ?")
            .bind(item_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("item {}", item_id)));
        }
        let (starred,): (bool,) = sqlx::query_as("SELECT is_starred FROM feed_items WHERE id = ?")
            .bind(item_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(starred)
    }

    /// Attach a generated summary to an item. Survives refreshes: the
    /// refresh engine never rewrites existing rows.
    pub async fn save_summary(&self, item_id: &str, summary: &str) -> Result<(), StorageError> {
        let result = sqlx::query("UPDATE feed_items SET summary = ? WHERE id = ?")
            .bind(summary)
            .bind(item_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("item {}", item_id)));
        }
        Ok(())
    }
}
