//! Ranked keyword search over the full-text index.

use serde::Serialize;
use sqlx::{PgPool, QueryBuilder};
use uuid::Uuid;

use worklens_common::Event;

use crate::cursor::{Cursor, CursorCodec};
use crate::error::Result;
use crate::listings::Page;

/// Headline options for the short title snippet and the longer body snippet.
const TITLE_HEADLINE_OPTS: &str = "StartSel=<mark>, StopSel=</mark>, MaxWords=12, MinWords=4";
const BODY_HEADLINE_OPTS: &str = "StartSel=<mark>, StopSel=</mark>, MaxWords=40, MinWords=15";

/// A match with its relevance and highlighted snippets.
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct SearchHit {
    #[sqlx(flatten)]
    pub event: Event,
    pub rank: f32,
    pub title_snippet: String,
    pub body_snippet: String,
}

pub struct Search {
    pool: PgPool,
    codec: CursorCodec,
}

impl Search {
    pub fn new(pool: PgPool, codec: CursorCodec) -> Self {
        Self { pool, codec }
    }

    /// AND-search: every keyword must match, one miss excludes the document.
    /// An empty keyword set (after sanitization) returns an empty page, not
    /// an error; a query failure is a hard error, never an empty fallback.
    pub async fn search(
        &self,
        user_id: Uuid,
        keywords: &[String],
        cursor_token: Option<&str>,
        limit: u32,
    ) -> Result<Page<SearchHit>> {
        let tokens = sanitize_keywords(keywords);
        if tokens.is_empty() {
            return Ok(Page::empty());
        }
        let tsquery = tokens.join(" & ");
        tracing::debug!(user = %user_id, query = %tsquery, "feed.search");

        let limit = i64::from(limit.clamp(1, 100));
        let cursor = cursor_token.and_then(|t| self.codec.decode(t));

        let mut qb = QueryBuilder::new("SELECT e.*, ts_rank(e.search_tsv, query) AS rank, ");
        qb.push(format!(
            "ts_headline('english', e.title, query, '{TITLE_HEADLINE_OPTS}') AS title_snippet, "
        ));
        qb.push(format!(
            "ts_headline('english', COALESCE(e.body, ''), query, '{BODY_HEADLINE_OPTS}') AS body_snippet "
        ));
        qb.push("FROM events e, to_tsquery('english', ");
        qb.push_bind(&tsquery);
        qb.push(") AS query WHERE e.user_id = ");
        qb.push_bind(user_id);
        qb.push(" AND e.search_tsv @@ query ");

        // The cursor only encodes (remote_created_at, id), not rank: the
        // next-page filter is strictly time/id while in-page order is
        // rank-first. Near-identical timestamps can therefore let a later
        // page admit a row that out-ranks an earlier page's tail. Accepted
        // tradeoff: rank is not a stable resume key.
        if let Some(c) = cursor {
            qb.push("AND (e.remote_created_at, e.id) < (");
            qb.push_bind(c.sort_key);
            qb.push(", ");
            qb.push_bind(c.tiebreak_id);
            qb.push(") ");
        }

        qb.push("ORDER BY rank DESC, e.remote_created_at DESC, e.id DESC LIMIT ");
        qb.push_bind(limit + 1);

        let mut rows: Vec<SearchHit> = qb.build_query_as().fetch_all(&self.pool).await?;

        let has_more = rows.len() as i64 > limit;
        rows.truncate(limit as usize);

        let next_cursor = if has_more {
            rows.last().map(|last| {
                self.codec.encode(&Cursor {
                    sort_key: last.event.remote_created_at,
                    tiebreak_id: last.event.id,
                })
            })
        } else {
            None
        };

        Ok(Page {
            items: rows,
            has_more,
            next_cursor,
        })
    }
}

/// Strip tsquery syntax characters and split multi-word keywords into
/// tokens; every returned token is ANDed by the caller.
fn sanitize_keywords(keywords: &[String]) -> Vec<String> {
    keywords
        .iter()
        .flat_map(|keyword| {
            keyword
                .chars()
                .map(|c| if is_tsquery_control(c) { ' ' } else { c })
                .collect::<String>()
                .split_whitespace()
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect()
}

fn is_tsquery_control(c: char) -> bool {
    matches!(
        c,
        '&' | '|' | '!' | '(' | ')' | ':' | '*' | '<' | '>' | '\'' | '"' | '\\'
    )
}
