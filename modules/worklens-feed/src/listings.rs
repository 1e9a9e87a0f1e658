//! Cursor-paginated listings and the work-item detail view.

use serde::Serialize;
use sqlx::{PgPool, QueryBuilder};
use uuid::Uuid;

use worklens_common::{Event, EventKind};

use crate::cursor::{Cursor, CursorCodec};
use crate::error::Result;

/// One page of results plus the resume token for the next page.
#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub has_more: bool,
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            has_more: false,
            next_cursor: None,
        }
    }
}

/// Optional narrowing of a listing.
#[derive(Debug, Default, Clone)]
pub struct ListFilter {
    pub kind: Option<EventKind>,
    pub project_id: Option<i64>,
    pub unread_only: bool,
}

/// A top-level item with its ordered activity thread and related items.
#[derive(Debug, Serialize)]
pub struct ItemDetail {
    pub item: Event,
    pub thread: Vec<Event>,
    pub related: Vec<Event>,
}

pub struct Listings {
    pool: PgPool,
    codec: CursorCodec,
}

impl Listings {
    pub fn new(pool: PgPool, codec: CursorCodec) -> Self {
        Self { pool, codec }
    }

    /// Top-level items in activity order, keyset-paginated by
    /// `(COALESCE(last_activity_at, remote_created_at), id) DESC`. An invalid
    /// cursor restarts from the beginning, which is always safe because rows
    /// are deduplicated by natural key.
    pub async fn list_items(
        &self,
        user_id: Uuid,
        filter: &ListFilter,
        cursor_token: Option<&str>,
        limit: u32,
    ) -> Result<Page<Event>> {
        tracing::debug!(user = %user_id, limit, "feed.list_items");
        let limit = i64::from(limit.clamp(1, 100));
        let cursor = cursor_token.and_then(|t| self.codec.decode(t));

        let mut qb = QueryBuilder::new("SELECT e.* FROM events e ");
        if filter.unread_only {
            qb.push("LEFT JOIN read_markers r ON r.user_id = e.user_id AND r.event_id = e.id ");
        }
        qb.push("WHERE e.user_id = ");
        qb.push_bind(user_id);
        qb.push(" AND e.parent_event_id IS NULL AND e.kind <> 'comment' ");

        if let Some(kind) = filter.kind {
            qb.push("AND e.kind = ");
            qb.push_bind(kind);
            qb.push(" ");
        }
        if let Some(project_id) = filter.project_id {
            qb.push("AND e.project_id = ");
            qb.push_bind(project_id);
            qb.push(" ");
        }
        if filter.unread_only {
            qb.push(
                "AND (r.read_at IS NULL \
                 OR (e.last_activity_at IS NOT NULL AND e.last_activity_at > r.read_at)) ",
            );
        }

        if let Some(c) = cursor {
            qb.push("AND (COALESCE(e.last_activity_at, e.remote_created_at), e.id) < (");
            qb.push_bind(c.sort_key);
            qb.push(", ");
            qb.push_bind(c.tiebreak_id);
            qb.push(") ");
        }

        qb.push(
            "ORDER BY COALESCE(e.last_activity_at, e.remote_created_at) DESC, e.id DESC LIMIT ",
        );
        qb.push_bind(limit + 1);

        let rows: Vec<Event> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(self.page_from(rows, limit))
    }

    /// One item with its ordered activity thread and the items it references.
    /// Returns `None` when the id does not exist for this user.
    pub async fn item_detail(&self, user_id: Uuid, event_id: Uuid) -> Result<Option<ItemDetail>> {
        let item = sqlx::query_as::<_, Event>(
            "SELECT * FROM events WHERE user_id = $1 AND id = $2",
        )
        .bind(user_id)
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(item) = item else {
            return Ok(None);
        };

        let thread = sqlx::query_as::<_, Event>(
            r#"
            SELECT * FROM events
            WHERE user_id = $1 AND parent_event_id = $2
            ORDER BY remote_created_at ASC, id ASC
            "#,
        )
        .bind(user_id)
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;

        let related = self.related_items(&item).await?;

        Ok(Some(ItemDetail {
            item,
            thread,
            related,
        }))
    }

    /// Items cross-referenced from this one: everything its `#N`/`!N`
    /// mentions or closing keywords point at, plus merge requests that claim
    /// to close it. A `#N` mention does not carry its target's type, so both
    /// key forms are probed.
    async fn related_items(&self, item: &Event) -> Result<Vec<Event>> {
        let mut keys: Vec<String> = Vec::new();
        for id in item.mentioned_ids.iter().chain(&item.closes_issue_ids) {
            keys.push(format!("issue-{id}"));
            keys.push(format!("mr-{id}"));
        }

        let own_remote_id = remote_id(&item.natural_key);

        let mut related = Vec::new();
        if !keys.is_empty() {
            related = sqlx::query_as::<_, Event>(
                r#"
                SELECT * FROM events
                WHERE user_id = $1 AND natural_key = ANY($2) AND id <> $3
                ORDER BY remote_created_at DESC
                "#,
            )
            .bind(item.user_id)
            .bind(&keys)
            .bind(item.id)
            .fetch_all(&self.pool)
            .await?;
        }

        if item.kind == EventKind::Issue {
            if let Some(issue_id) = own_remote_id {
                let closers = sqlx::query_as::<_, Event>(
                    r#"
                    SELECT * FROM events
                    WHERE user_id = $1 AND kind = 'merge_request'
                      AND closes_issue_ids @> ARRAY[$2]::BIGINT[]
                      AND id <> $3
                    ORDER BY remote_created_at DESC
                    "#,
                )
                .bind(item.user_id)
                .bind(issue_id)
                .bind(item.id)
                .fetch_all(&self.pool)
                .await?;

                for closer in closers {
                    if !related.iter().any(|e| e.id == closer.id) {
                        related.push(closer);
                    }
                }
            }
        }

        Ok(related)
    }

    fn page_from(&self, mut rows: Vec<Event>, limit: i64) -> Page<Event> {
        let has_more = rows.len() as i64 > limit;
        rows.truncate(limit as usize);

        let next_cursor = if has_more {
            rows.last().map(|last| {
                self.codec.encode(&Cursor {
                    sort_key: last.activity_at(),
                    tiebreak_id: last.id,
                })
            })
        } else {
            None
        };

        Page {
            items: rows,
            has_more,
            next_cursor,
        }
    }
}

/// The numeric remote id a natural key was derived from.
fn remote_id(natural_key: &str) -> Option<i64> {
    natural_key.rsplit_once('-')?.1.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_id_parsed_from_natural_key() {
        assert_eq!(remote_id("issue-42"), Some(42));
        assert_eq!(remote_id("mr-9"), Some(9));
        assert_eq!(remote_id("note-123"), Some(123));
        assert_eq!(remote_id("garbage"), None);
    }
}
