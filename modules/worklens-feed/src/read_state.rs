//! Per-user read markers and the derived unread state.
//!
//! Unread-ness is never stored: it is a comparison between an item's last
//! activity and the user's read marker, computed at read time. That keeps a
//! new comment from fanning out flag updates to every reader, and leaves
//! nothing to drift.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;

/// Derived unread state. No marker means "never read"; a marker on an item
/// with no recorded activity means "read"; activity at the exact marker
/// instant is read (non-strict boundary).
pub fn is_unread(
    last_activity_at: Option<DateTime<Utc>>,
    read_at: Option<DateTime<Utc>>,
) -> bool {
    match read_at {
        None => true,
        Some(read_at) => match last_activity_at {
            Some(activity) => activity > read_at,
            None => false,
        },
    }
}

pub struct ReadStates {
    pool: PgPool,
}

impl ReadStates {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Mark one item as read. Upserts the marker with `read_at = now`;
    /// repeated calls just refresh the timestamp. An id the user does not
    /// own is a no-op.
    pub async fn mark_read(&self, user_id: Uuid, event_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO read_markers (user_id, event_id, read_at)
            SELECT $1, id, NOW() FROM events WHERE id = $2 AND user_id = $1
            ON CONFLICT (user_id, event_id) DO UPDATE SET read_at = EXCLUDED.read_at
            "#,
        )
        .bind(user_id)
        .bind(event_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Mark a batch of items as read atomically. Membership is validated
    /// inside the same transaction as the upserts (row locks held), so an
    /// item deleted or reassigned between check and write cannot slip
    /// through. Non-existent ids are silently dropped. Returns the number of
    /// markers written.
    pub async fn mark_many_read(&self, user_id: Uuid, event_ids: &[Uuid]) -> Result<u32> {
        if event_ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;

        let valid: Vec<Uuid> = sqlx::query_scalar(
            "SELECT id FROM events WHERE user_id = $1 AND id = ANY($2) FOR UPDATE",
        )
        .bind(user_id)
        .bind(event_ids)
        .fetch_all(&mut *tx)
        .await?;

        for event_id in &valid {
            sqlx::query(
                r#"
                INSERT INTO read_markers (user_id, event_id, read_at)
                VALUES ($1, $2, NOW())
                ON CONFLICT (user_id, event_id) DO UPDATE SET read_at = EXCLUDED.read_at
                "#,
            )
            .bind(user_id)
            .bind(event_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(valid.len() as u32)
    }

    /// Revert an item to unread (undo/test path).
    pub async fn clear_read(&self, user_id: Uuid, event_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM read_markers WHERE user_id = $1 AND event_id = $2")
            .bind(user_id)
            .bind(event_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Number of unread top-level items, computed from current state.
    pub async fn unread_count(&self, user_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM events e
            LEFT JOIN read_markers r ON r.user_id = e.user_id AND r.event_id = e.id
            WHERE e.user_id = $1
              AND e.parent_event_id IS NULL
              AND e.kind <> 'comment'
              AND (r.read_at IS NULL
                   OR (e.last_activity_at IS NOT NULL AND e.last_activity_at > r.read_at))
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}

/// Caller-side guard against double-submitting a mark-as-read while the
/// first call is still in flight. A UI concern, not a server invariant.
#[derive(Debug, Default)]
pub struct PendingSet {
    in_flight: HashSet<Uuid>,
}

impl PendingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the id is already pending; callers skip the call.
    pub fn begin(&mut self, id: Uuid) -> bool {
        self.in_flight.insert(id)
    }

    pub fn finish(&mut self, id: Uuid) {
        self.in_flight.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn never_read_is_unread() {
        assert!(is_unread(Some(ts("2026-03-01T10:00:00Z")), None));
        assert!(is_unread(None, None));
    }

    #[test]
    fn read_after_activity_is_read() {
        assert!(!is_unread(
            Some(ts("2026-03-01T10:00:00Z")),
            Some(ts("2026-03-01T11:00:00Z"))
        ));
    }

    #[test]
    fn new_activity_after_read_is_unread_again() {
        assert!(is_unread(
            Some(ts("2026-03-01T12:00:00Z")),
            Some(ts("2026-03-01T11:00:00Z"))
        ));
    }

    #[test]
    fn read_at_exact_activity_instant_is_read() {
        let t = ts("2026-03-01T10:00:00Z");
        assert!(!is_unread(Some(t), Some(t)));
    }

    #[test]
    fn marker_without_activity_is_read() {
        assert!(!is_unread(None, Some(ts("2026-03-01T10:00:00Z"))));
    }

    #[test]
    fn pending_set_blocks_duplicate_submission() {
        let mut pending = PendingSet::new();
        let id = Uuid::new_v4();
        assert!(pending.begin(id));
        assert!(!pending.begin(id));
        pending.finish(id);
        assert!(pending.begin(id));
    }
}
