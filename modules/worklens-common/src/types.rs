use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Classification of a unified activity event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "event_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Issue,
    MergeRequest,
    Comment,
}

impl EventKind {
    pub fn is_top_level(self) -> bool {
        matches!(self, Self::Issue | Self::MergeRequest)
    }
}

/// Remote state of a top-level item. Comments carry no status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "event_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Open,
    Closed,
    Merged,
}

/// Kind of the remote parent a comment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "parent_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ParentKind {
    Issue,
    MergeRequest,
}

impl ParentKind {
    /// The natural key the parent item was stored under.
    pub fn natural_key(self, remote_id: i64) -> String {
        match self {
            Self::Issue => format!("issue-{remote_id}"),
            Self::MergeRequest => format!("mr-{remote_id}"),
        }
    }
}

/// Unified record for an issue, merge request, or comment, scoped to one user.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Event {
    pub id: Uuid,
    pub user_id: Uuid,
    pub natural_key: String,
    pub kind: EventKind,
    pub status: Option<EventStatus>,

    pub title: String,
    pub body: Option<String>,
    pub author: String,
    pub author_avatar: Option<String>,
    pub project_id: i64,
    pub project_path: String,
    pub labels: Vec<String>,
    pub web_url: String,
    pub is_system: bool,
    pub remote_created_at: DateTime<Utc>,

    pub parent_kind: Option<ParentKind>,
    pub remote_parent_id: Option<i64>,
    pub parent_event_id: Option<Uuid>,

    pub mentioned_ids: Vec<i64>,
    pub closes_issue_ids: Vec<i64>,

    pub last_activity_at: Option<DateTime<Utc>>,
    pub comment_count: i32,
    pub participants: Vec<String>,

    pub ingested_at: DateTime<Utc>,
}

impl Event {
    /// Effective activity timestamp: last child activity, or the item's own
    /// creation time when nothing has happened yet.
    pub fn activity_at(&self) -> DateTime<Utc> {
        self.last_activity_at.unwrap_or(self.remote_created_at)
    }
}
