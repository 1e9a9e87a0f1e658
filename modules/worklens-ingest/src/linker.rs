//! Second-pass relationship resolution over already-stored events.
//!
//! Phase 1 turns denormalized remote parent pointers into internal foreign
//! keys. Phase 2 recomputes per-item activity aggregates from scratch. Both
//! phases are idempotent and run on every sync cycle; a child whose parent
//! has not been ingested yet simply resolves on a later run.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::Result;
use worklens_common::ParentKind;

/// Children are resolved in chunks of this size, one parent lookup per chunk.
const LINK_BATCH: i64 = 100;

pub struct Linker {
    pool: PgPool,
}

/// Counts from one parent-linking pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkOutcome {
    pub resolved: u32,
    pub unresolved: u32,
}

#[derive(sqlx::FromRow)]
struct UnlinkedChild {
    id: Uuid,
    parent_kind: ParentKind,
    remote_parent_id: i64,
}

#[derive(sqlx::FromRow)]
struct ChildStats {
    parent_id: Uuid,
    last_activity: Option<DateTime<Utc>>,
    human_comments: i64,
    commenters: Vec<String>,
}

impl Linker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Phase 1: resolve denormalized parent pointers to internal foreign keys.
    /// Unresolvable children (parent not ingested, or from an unmonitored
    /// project) are left for a future run rather than treated as errors.
    pub async fn link_parents(&self, user_id: Uuid) -> Result<LinkOutcome> {
        let mut outcome = LinkOutcome::default();
        let mut after = Uuid::nil();

        loop {
            let children = sqlx::query_as::<_, UnlinkedChild>(
                r#"
                SELECT id, parent_kind, remote_parent_id FROM events
                WHERE user_id = $1
                  AND remote_parent_id IS NOT NULL
                  AND parent_kind IS NOT NULL
                  AND parent_event_id IS NULL
                  AND id > $2
                ORDER BY id
                LIMIT $3
                "#,
            )
            .bind(user_id)
            .bind(after)
            .bind(LINK_BATCH)
            .fetch_all(&self.pool)
            .await?;

            let Some(last) = children.last() else {
                break;
            };
            after = last.id;

            let expected_keys: Vec<String> = children
                .iter()
                .map(|c| c.parent_kind.natural_key(c.remote_parent_id))
                .collect();

            let parents: Vec<(Uuid, String)> = sqlx::query_as(
                r#"
                SELECT id, natural_key FROM events
                WHERE user_id = $1 AND natural_key = ANY($2) AND parent_event_id IS NULL
                "#,
            )
            .bind(user_id)
            .bind(&expected_keys)
            .fetch_all(&self.pool)
            .await?;

            let by_key: HashMap<String, Uuid> =
                parents.into_iter().map(|(id, key)| (key, id)).collect();

            for child in &children {
                let key = child.parent_kind.natural_key(child.remote_parent_id);
                match by_key.get(&key) {
                    Some(parent_id) => {
                        sqlx::query("UPDATE events SET parent_event_id = $1 WHERE id = $2")
                            .bind(parent_id)
                            .bind(child.id)
                            .execute(&self.pool)
                            .await?;
                        outcome.resolved += 1;
                    }
                    None => {
                        debug!(child = %child.id, parent_key = %key, "Parent not yet ingested, deferring");
                        outcome.unresolved += 1;
                    }
                }
            }
        }

        info!(
            user = %user_id,
            resolved = outcome.resolved,
            unresolved = outcome.unresolved,
            "Parent linking pass complete"
        );
        Ok(outcome)
    }

    /// Phase 2: recompute activity aggregates for every top-level item.
    /// System notes count as activity (last_activity_at) but are excluded
    /// from comment_count and participants. Values are replaced wholesale, so
    /// a crash mid-pass never leaves permanently wrong aggregates.
    pub async fn aggregate_activity(&self, user_id: Uuid) -> Result<u32> {
        let stats = sqlx::query_as::<_, ChildStats>(
            r#"
            SELECT
                parent_event_id AS parent_id,
                MAX(remote_created_at) AS last_activity,
                COUNT(*) FILTER (WHERE NOT is_system) AS human_comments,
                COALESCE(
                    ARRAY_AGG(DISTINCT author) FILTER (WHERE NOT is_system),
                    ARRAY[]::TEXT[]
                ) AS commenters
            FROM events
            WHERE user_id = $1 AND parent_event_id IS NOT NULL
            GROUP BY parent_event_id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let by_parent: HashMap<Uuid, ChildStats> =
            stats.into_iter().map(|s| (s.parent_id, s)).collect();

        let items: Vec<(Uuid, String)> = sqlx::query_as(
            r#"
            SELECT id, author FROM events
            WHERE user_id = $1 AND parent_event_id IS NULL AND kind <> 'comment'
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let updated = items.len() as u32;

        for (item_id, author) in items {
            let (last_activity, comment_count, commenters) = match by_parent.get(&item_id) {
                Some(s) => (s.last_activity, s.human_comments, s.commenters.as_slice()),
                None => (None, 0, &[] as &[String]),
            };

            let mut participants = vec![author];
            for commenter in commenters {
                if !participants.contains(commenter) {
                    participants.push(commenter.clone());
                }
            }

            sqlx::query(
                r#"
                UPDATE events
                SET last_activity_at = $2, comment_count = $3, participants = $4
                WHERE id = $1
                "#,
            )
            .bind(item_id)
            .bind(last_activity)
            .bind(comment_count as i32)
            .bind(&participants)
            .execute(&self.pool)
            .await?;
        }

        info!(user = %user_id, items = updated, "Activity aggregation pass complete");
        Ok(updated)
    }
}
