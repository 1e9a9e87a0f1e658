use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Author block attached to remote items and notes.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteUser {
    pub username: String,
    pub avatar_url: Option<String>,
}

/// An issue as returned by the tracker's project issues endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteIssue {
    pub id: i64,
    pub project_id: i64,
    pub title: String,
    pub description: Option<String>,
    /// "opened" or "closed".
    pub state: String,
    #[serde(default)]
    pub labels: Vec<String>,
    pub web_url: String,
    pub author: RemoteUser,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A merge request as returned by the tracker's project MRs endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteMergeRequest {
    pub id: i64,
    pub project_id: i64,
    pub title: String,
    pub description: Option<String>,
    /// "opened", "closed", or "merged".
    pub state: String,
    #[serde(default)]
    pub labels: Vec<String>,
    pub web_url: String,
    pub author: RemoteUser,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A comment/note on an issue or merge request. `noteable_type` +
/// `noteable_id` are the remote's denormalized parent pointer.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteNote {
    pub id: i64,
    pub body: String,
    /// Automated note ("status changed", "assigned to ..."), not a human comment.
    #[serde(default)]
    pub system: bool,
    pub author: RemoteUser,
    pub created_at: DateTime<Utc>,
    /// "Issue" or "MergeRequest".
    pub noteable_type: String,
    pub noteable_id: i64,
}

/// Project metadata, fetched once per monitored project.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteProject {
    pub id: i64,
    pub path_with_namespace: String,
    pub web_url: String,
}
