//! Feed CRUD and subscription-level queries.

use uuid::Uuid;

use super::schema::Database;
use super::types::{Feed, FeedRow, StorageError};

impl Database {
    /// Whether a subscription with this URL already exists. `url` is the
    /// business key; ingestion callers check this before fetching.
    pub async fn url_exists(&self, url: &str) -> Result<bool, StorageError> {
        let (exists,): (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM feeds WHERE url = ?)")
                .bind(url)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    /// Persist a freshly ingested feed together with its initial item batch.
    ///
    /// A fresh id is generated here — the pipeline's ingestion-time id is
    /// discarded, and the returned persisted id is authoritative. Items
    /// are inserted in bounded chunks after the feed row commits.
    pub async fn add_feed(&self, feed: &Feed) -> Result<String, StorageError> {
        if self.url_exists(&feed.url).await? {
            return Err(StorageError::DuplicateSubscription(feed.url.clone()));
        }

        let feed_id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO feeds (id, title, url, link, description, image_url, folder_id, last_fetched, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(&feed_id)
        .bind(&feed.title)
        .bind(&feed.url)
        .bind(&feed.link)
        .bind(&feed.description)
        .bind(&feed.image_url)
        .bind(&feed.folder_id)
        .bind(&feed.last_fetched)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if !feed.items.is_empty() {
            self.insert_items(&feed_id, &feed.items).await?;
        }

        Ok(feed_id)
    }

    /// Persist feed metadata only, deferring ingestion: no items, no
    /// `last_fetched` — the first refresh fills both in.
    pub async fn add_feed_metadata(&self, feed: &Feed) -> Result<String, StorageError> {
        if self.url_exists(&feed.url).await? {
            return Err(StorageError::DuplicateSubscription(feed.url.clone()));
        }

        let feed_id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO feeds (id, title, url, link, description, image_url, folder_id, last_fetched, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, NULL, ?)
        "#,
        )
        .bind(&feed_id)
        .bind(&feed.title)
        .bind(&feed.url)
        .bind(&feed.link)
        .bind(&feed.description)
        .bind(&feed.image_url)
        .bind(&feed.folder_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(feed_id)
    }

    /// All feeds, ordered by title. Items are not loaded.
    pub async fn get_feeds(&self) -> Result<Vec<Feed>, StorageError> {
        let rows: Vec<FeedRow> = sqlx::query_as(
            r#"
            SELECT id, title, url, link, description, image_url, folder_id, last_fetched
            FROM feeds
            ORDER BY title
        "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(FeedRow::into_feed).collect())
    }

    pub async fn get_feed(&self, feed_id: &str) -> Result<Feed, StorageError> {
        let row: Option<FeedRow> = sqlx::query_as(
            r#"
            SELECT id, title, url, link, description, image_url, folder_id, last_fetched
            FROM feeds
            WHERE id = ?
        "#,
        )
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(FeedRow::into_feed)
            .ok_or_else(|| StorageError::NotFound(format!("feed {}", feed_id)))
    }

    pub async fn get_feed_by_url(&self, url: &str) -> Result<Option<Feed>, StorageError> {
        let row: Option<FeedRow> = sqlx::query_as(
            r#"
            SELECT id, title, url, link, description, image_url, folder_id, last_fetched
            FROM feeds
            WHERE url = ?
        "#,
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(FeedRow::into_feed))
    }

    /// Remove a subscription. The feed owns its items' lifecycle, so the
    /// delete cascades to every item with this feed id.
    pub async fn remove_feed(&self, feed_id: &str) -> Result<(), StorageError> {
        let result = sqlx::query("DELETE FROM feeds WHERE id = ?")
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("feed {}", feed_id)));
        }
        Ok(())
    }

    /// Stamp `last_fetched` to now. Called unconditionally after every
    /// refresh, whether or not anything new arrived.
    pub async fn touch_last_fetched(&self, feed_id: &str) -> Result<(), StorageError> {
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query("UPDATE feeds SET last_fetched = ? WHERE id = ?")
            .bind(now)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Move a feed into a folder (or out of any folder with `None`).
    pub async fn move_feed_to_folder(
        &self,
        feed_id: &str,
        folder_id: Option<&str>,
    ) -> Result<(), StorageError> {
        let result = sqlx::query("UPDATE feeds SET folder_id = ? WHERE id = ?")
            .bind(folder_id)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("feed {}", feed_id)));
        }
        Ok(())
    }

    /// Unread item count per feed, for listings.
    pub async fn unread_count(&self, feed_id: &str) -> Result<i64, StorageError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM feed_items WHERE feed_id = ? AND is_read = 0")
                .bind(feed_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}
