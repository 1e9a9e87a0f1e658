// Postgres persistence for normalized events and sync watermarks.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::error::Result;
use crate::normalize::NewEvent;

pub struct EventStore {
    pool: PgPool,
}

/// Counts from one batch insert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreOutcome {
    pub stored: u32,
    pub skipped: u32,
}

impl EventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a batch of normalized events for one user. Events whose natural
    /// key already exists are silently skipped (idempotent re-ingestion).
    /// Runs in one transaction; any database failure propagates so the caller
    /// never advances its watermark over a partial store.
    pub async fn insert_batch(&self, user_id: Uuid, events: &[NewEvent]) -> Result<StoreOutcome> {
        let mut tx = self.pool.begin().await?;
        let mut outcome = StoreOutcome::default();

        for event in events {
            let result = sqlx::query(
                r#"
                INSERT INTO events
                    (id, user_id, natural_key, kind, status,
                     title, body, author, author_avatar,
                     project_id, project_path, labels, web_url, is_system,
                     remote_created_at, parent_kind, remote_parent_id,
                     mentioned_ids, closes_issue_ids)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                        $11, $12, $13, $14, $15, $16, $17, $18, $19)
                ON CONFLICT (user_id, natural_key) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(&event.natural_key)
            .bind(event.kind)
            .bind(event.status)
            .bind(&event.title)
            .bind(&event.body)
            .bind(&event.author)
            .bind(&event.author_avatar)
            .bind(event.project_id)
            .bind(&event.project_path)
            .bind(&event.labels)
            .bind(&event.web_url)
            .bind(event.is_system)
            .bind(event.remote_created_at)
            .bind(event.parent_kind)
            .bind(event.remote_parent_id)
            .bind(&event.mentioned_ids)
            .bind(&event.closes_issue_ids)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 1 {
                outcome.stored += 1;
            } else {
                outcome.skipped += 1;
            }
        }

        tx.commit().await?;
        Ok(outcome)
    }

    /// The user's "last synced at" watermark, if any sync has completed.
    pub async fn watermark(&self, user_id: Uuid) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query_scalar::<_, DateTime<Utc>>(
            "SELECT last_synced_at FROM sync_state WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Advance the watermark. Only called after a fully successful
    /// store + link cycle.
    pub async fn advance_watermark(&self, user_id: Uuid, to: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_state (user_id, last_synced_at)
            VALUES ($1, $2)
            ON CONFLICT (user_id) DO UPDATE SET last_synced_at = EXCLUDED.last_synced_at
            "#,
        )
        .bind(user_id)
        .bind(to)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Remove everything stored for a user: events, read markers, watermark.
    /// Children go first so parent foreign keys never dangle mid-transaction.
    pub async fn wipe_user(&self, user_id: Uuid) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM read_markers WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        let children = sqlx::query(
            "DELETE FROM events WHERE user_id = $1 AND parent_event_id IS NOT NULL",
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        let parents = sqlx::query("DELETE FROM events WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM sync_state WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let removed = children.rows_affected() + parents.rows_affected();
        info!(user = %user_id, removed, "Wiped user data");
        Ok(removed)
    }
}
