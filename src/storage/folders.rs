//! Folder CRUD. Folders are pure grouping: no cascade onto feeds.

use uuid::Uuid;

use super::schema::Database;
use super::types::{Folder, StorageError};

impl Database {
    /// Create a folder at the end of the ordering. Returns the new folder.
    pub async fn add_folder(&self, name: &str) -> Result<Folder, StorageError> {
        let id = Uuid::new_v4().to_string();
        let (max_position,): (Option<i64>,) =
            sqlx::query_as("SELECT MAX(position) FROM folders")
                .fetch_one(&self.pool)
                .await?;
        let position = max_position.map_or(0, |p| p + 1);

        sqlx::query(
            r#"
            INSERT INTO folders (id, name, is_expanded, sort_by, position, created_at)
            VALUES (?, ?, 1, NULL, ?, ?)
        "#,
        )
        .bind(&id)
        .bind(name)
        .bind(position)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(Folder {
            id,
            name: name.to_string(),
            is_expanded: true,
            sort_by: None,
            position,
        })
    }

    pub async fn get_folders(&self) -> Result<Vec<Folder>, StorageError> {
        let rows: Vec<(String, String, bool, Option<String>, i64)> = sqlx::query_as(
            "SELECT id, name, is_expanded, sort_by, position FROM folders ORDER BY position",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, name, is_expanded, sort_by, position)| Folder {
                id,
                name,
                is_expanded,
                sort_by,
                position,
            })
            .collect())
    }

    /// Find a folder by name. The match is case-insensitive so import
    /// runs don't split "Tech" and "tech" into two folders.
    pub async fn find_folder_by_name(&self, name: &str) -> Result<Option<Folder>, StorageError> {
        let row: Option<(String, String, bool, Option<String>, i64)> = sqlx::query_as(
            "SELECT id, name, is_expanded, sort_by, position FROM folders WHERE name = ? COLLATE NOCASE",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, name, is_expanded, sort_by, position)| Folder {
            id,
            name,
            is_expanded,
            sort_by,
            position,
        }))
    }

    /// Find a folder by name, creating it if absent. Used by OPML import.
    pub async fn find_or_create_folder(&self, name: &str) -> Result<Folder, StorageError> {
        if let Some(folder) = self.find_folder_by_name(name).await? {
            return Ok(folder);
        }
        self.add_folder(name).await
    }

    /// Delete a folder. Member feeds become uncategorized (folder_id set
    /// to NULL by the schema), never deleted.
    pub async fn remove_folder(&self, folder_id: &str) -> Result<(), StorageError> {
        let result = sqlx::query("DELETE FROM folders WHERE id = ?")
            .bind(folder_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("folder {}", folder_id)));
        }
        Ok(())
    }

    /// Flip the expanded flag; returns the new value.
    pub async fn toggle_folder(&self, folder_id: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("UPDATE folders SET is_expanded = NOT is_expanded WHERE id = ?")
            .bind(folder_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("folder {}", folder_id)));
        }
        let (expanded,): (bool,) = sqlx::query_as("SELECT is_expanded FROM folders WHERE id = ?")
            .bind(folder_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(expanded)
    }
}
