use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Error as SqlxError, Row};
use std::time::Duration;
use tracing::{error, info};

use crate::models::{NotePermission, NoteRecord, StoredNote};
use crate::services::note_service::{DocumentStore, NoteDomain, StoreError};

/// Database connection pool
pub struct DbNotes {
    pool: PgPool,
}

impl DbNotes {
    /// Create a new database connection pool
    ///
    /// # Arguments
    /// * `database_url` - PostgreSQL connection string
    pub async fn new(database_url: &str) -> Result<Self, SqlxError> {
        info!("Connecting to database...");

        let pool = PgPoolOptions::new()
            .max_connections(20)
            .min_connections(2)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(1800))
            .connect(database_url)
            .await?;

        info!("Database connection pool created successfully");

        Ok(Self { pool })
    }

    fn record_from_row(row: &sqlx::postgres::PgRow) -> Result<NoteRecord, StoreError> {
        let permission: String = row.try_get("permission")?;
        let permission = permission.parse::<NotePermission>().map_err(|e| {
            error!("{}", e);
            SqlxError::Decode(e.into())
        })?;
        Ok(NoteRecord {
            id: row.try_get("id")?,
            owner: row.try_get("owner")?,
            permission,
        })
    }
}

#[async_trait]
impl DocumentStore for DbNotes {
    async fn read_document(&self, id: &str) -> Result<StoredNote, StoreError> {
        let query_sql = r#"
            SELECT id, owner, content, update_time
            FROM notes
            WHERE id = $1
        "#;

        let row = sqlx::query(query_sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let update_time: Option<DateTime<Utc>> = row.try_get("update_time")?;
                Ok(StoredNote {
                    id: row.try_get("id")?,
                    owner: row.try_get("owner")?,
                    content: row.try_get("content")?,
                    update_time: update_time.unwrap_or_else(Utc::now),
                })
            }
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    async fn save_document(&self, id: &str, title: &str, body: &str) -> Result<(), StoreError> {
        let query_sql = r#"
            INSERT INTO notes (id, title, content, update_time)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (id) DO UPDATE
            SET title = EXCLUDED.title,
                content = EXCLUDED.content,
                update_time = NOW()
        "#;

        sqlx::query(query_sql)
            .bind(id)
            .bind(title)
            .bind(body)
            .execute(&self.pool)
            .await?;

        info!("Note '{}' saved", id);
        Ok(())
    }

    async fn count_documents(&self) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM notes")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("count")?)
    }
}

#[async_trait]
impl NoteDomain for DbNotes {
    async fn find_or_create(
        &self,
        id: &str,
        default_permission: NotePermission,
    ) -> Result<NoteRecord, StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO notes (id, permission) VALUES ($1, $2) ON CONFLICT (id) DO NOTHING")
            .bind(id)
            .bind(default_permission.as_str())
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query("SELECT id, owner, permission FROM notes WHERE id = $1")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        Self::record_from_row(&row)
    }

    async fn find(&self, id: &str) -> Result<Option<NoteRecord>, StoreError> {
        let row = sqlx::query("SELECT id, owner, permission FROM notes WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::record_from_row).transpose()
    }

    async fn update_permission(
        &self,
        note: NoteRecord,
        permission: NotePermission,
    ) -> Result<NoteRecord, StoreError> {
        let query_sql = r#"
            UPDATE notes
            SET permission = $1
            WHERE id = $2
            RETURNING id, owner, permission
        "#;

        let row = sqlx::query(query_sql)
            .bind(permission.as_str())
            .bind(&note.id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Self::record_from_row(&row),
            None => {
                error!("Note not found for permission update: {}", note.id);
                Err(StoreError::NotFound(note.id))
            }
        }
    }

    async fn count_users(&self) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("count")?)
    }
}
