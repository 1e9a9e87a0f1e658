//! Pure mapping from remote tracker payloads to the unified event shape.
//! No I/O here; everything is derivable from the input item alone.

use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use tracker_client::{RemoteIssue, RemoteMergeRequest, RemoteNote};
use worklens_common::{EventKind, EventStatus, ParentKind};

/// `#42` (issue) and `!17` (merge request) style references.
static REF_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[#!](\d+)").expect("valid regex"));

/// Closing keywords a merge request uses to claim an issue.
static CLOSES_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:close|closes|closed|fix|fixes|fixed|resolve|resolves|resolved)\s+#(\d+)")
        .expect("valid regex")
});

/// Comment titles are synthesized from the body, capped at this many chars.
const COMMENT_TITLE_MAX: usize = 100;
const COMMENT_TITLE_PREFIX: &str = "Comment: ";

/// A normalized event ready for insertion. The internal id is assigned by
/// the store; `remote_parent_id`/`parent_kind` stay denormalized until the
/// linker resolves them.
#[derive(Debug, Clone)]
pub struct NewEvent {
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
    pub mentioned_ids: Vec<i64>,
    pub closes_issue_ids: Vec<i64>,
}

pub fn normalize_issue(issue: &RemoteIssue, project_path: &str) -> NewEvent {
    NewEvent {
        natural_key: format!("issue-{}", issue.id),
        kind: EventKind::Issue,
        status: map_status(&issue.state),
        title: issue.title.clone(),
        body: issue.description.clone(),
        author: issue.author.username.clone(),
        author_avatar: issue.author.avatar_url.clone(),
        project_id: issue.project_id,
        project_path: project_path.to_string(),
        labels: issue.labels.clone(),
        web_url: issue.web_url.clone(),
        is_system: false,
        remote_created_at: issue.created_at,
        parent_kind: None,
        remote_parent_id: None,
        mentioned_ids: extract_refs(issue.description.as_deref().unwrap_or("")),
        // Issues never close other issues, even when the body matches the
        // closing pattern.
        closes_issue_ids: Vec::new(),
    }
}

pub fn normalize_merge_request(mr: &RemoteMergeRequest, project_path: &str) -> NewEvent {
    let body = mr.description.as_deref().unwrap_or("");
    NewEvent {
        natural_key: format!("mr-{}", mr.id),
        kind: EventKind::MergeRequest,
        status: map_status(&mr.state),
        title: mr.title.clone(),
        body: mr.description.clone(),
        author: mr.author.username.clone(),
        author_avatar: mr.author.avatar_url.clone(),
        project_id: mr.project_id,
        project_path: project_path.to_string(),
        labels: mr.labels.clone(),
        web_url: mr.web_url.clone(),
        is_system: false,
        remote_created_at: mr.created_at,
        parent_kind: None,
        remote_parent_id: None,
        mentioned_ids: extract_refs(body),
        closes_issue_ids: parse_closes(body),
    }
}

/// Normalize a note fetched for a known parent. `parent_web_url` anchors the
/// note's own URL; the parent pointer stays denormalized (remote id + kind)
/// until the linker resolves it.
pub fn normalize_note(
    note: &RemoteNote,
    parent_web_url: &str,
    project_id: i64,
    project_path: &str,
) -> NewEvent {
    NewEvent {
        natural_key: format!("note-{}", note.id),
        kind: EventKind::Comment,
        status: None,
        title: comment_title(&note.body),
        body: Some(note.body.clone()),
        author: note.author.username.clone(),
        author_avatar: note.author.avatar_url.clone(),
        project_id,
        project_path: project_path.to_string(),
        labels: Vec::new(),
        web_url: format!("{parent_web_url}#note_{}", note.id),
        is_system: note.system,
        remote_created_at: note.created_at,
        parent_kind: map_noteable(&note.noteable_type),
        remote_parent_id: Some(note.noteable_id),
        mentioned_ids: extract_refs(&note.body),
        closes_issue_ids: Vec::new(),
    }
}

/// Extract `#N` / `!N` references. Deduplicated, order-preserving.
pub fn extract_refs(text: &str) -> Vec<i64> {
    let mut seen = HashSet::new();
    REF_RE
        .captures_iter(text)
        .filter_map(|c| {
            let id: i64 = c[1].parse().ok()?;
            seen.insert(id).then_some(id)
        })
        .collect()
}

/// Issue ids a merge request body claims to close. Deduplicated,
/// order-preserving. Callers apply this to merge requests only.
pub fn parse_closes(text: &str) -> Vec<i64> {
    let mut seen = HashSet::new();
    CLOSES_RE
        .captures_iter(text)
        .filter_map(|c| {
            let id: i64 = c[1].parse().ok()?;
            seen.insert(id).then_some(id)
        })
        .collect()
}

/// First non-empty line of the body, truncated with an ellipsis, behind a
/// fixed label.
fn comment_title(body: &str) -> String {
    let first_line = body
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("");

    let mut title: String = first_line.chars().take(COMMENT_TITLE_MAX).collect();
    if first_line.chars().count() > COMMENT_TITLE_MAX {
        title.push('…');
    }
    format!("{COMMENT_TITLE_PREFIX}{title}")
}

fn map_status(state: &str) -> Option<EventStatus> {
    match state {
        "opened" => Some(EventStatus::Open),
        "closed" => Some(EventStatus::Closed),
        "merged" => Some(EventStatus::Merged),
        _ => None,
    }
}

fn map_noteable(noteable_type: &str) -> Option<ParentKind> {
    match noteable_type {
        "Issue" => Some(ParentKind::Issue),
        "MergeRequest" => Some(ParentKind::MergeRequest),
        _ => None,
    }
}
