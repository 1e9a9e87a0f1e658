//! One sync cycle: fetch monitored projects, normalize, store, link.
//!
//! A single project's failure is collected into the summary and never blocks
//! sibling projects. A store failure aborts the cycle before the watermark
//! moves, so the next run re-requests the same window.

use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{info, warn};
use uuid::Uuid;

use tracker_client::{RemoteIssue, RemoteMergeRequest, TrackerClient};

use crate::error::Result;
use crate::linker::Linker;
use crate::normalize::{self, NewEvent};
use crate::store::EventStore;

/// Concurrent per-project fetches. Sized to stay under tracker rate limits.
const MAX_CONCURRENT_PROJECTS: usize = 3;
/// Concurrent per-item note fetches across the whole cycle.
const MAX_CONCURRENT_NOTE_FETCHES: usize = 5;

pub struct Syncer {
    client: TrackerClient,
    store: EventStore,
    linker: Linker,
    project_ids: Vec<i64>,
    project_pool: Semaphore,
    note_pool: Semaphore,
}

/// Result of one sync cycle.
#[derive(Debug, Clone)]
pub struct SyncSummary {
    pub fetched: u32,
    pub stored: u32,
    pub skipped: u32,
    pub linked: u32,
    pub unresolved: u32,
    pub failed_projects: Vec<ProjectFailure>,
    pub duration_ms: i64,
}

#[derive(Debug, Clone)]
pub struct ProjectFailure {
    pub project_id: i64,
    pub error: String,
}

impl Syncer {
    pub fn new(client: TrackerClient, pool: sqlx::PgPool, project_ids: Vec<i64>) -> Self {
        Self {
            client,
            store: EventStore::new(pool.clone()),
            linker: Linker::new(pool),
            project_ids,
            project_pool: Semaphore::new(MAX_CONCURRENT_PROJECTS),
            note_pool: Semaphore::new(MAX_CONCURRENT_NOTE_FETCHES),
        }
    }

    /// Run one full sync cycle for a user.
    pub async fn run(&self, user_id: Uuid) -> Result<SyncSummary> {
        let started = Instant::now();
        // Taken before the fetch so items updated mid-cycle are re-requested
        // next time rather than lost.
        let cycle_started_at = Utc::now();

        let since = self.store.watermark(user_id).await?;
        info!(
            user = %user_id,
            since = ?since,
            projects = self.project_ids.len(),
            "Sync cycle starting"
        );

        let fetches = self
            .project_ids
            .iter()
            .map(|&project_id| self.fetch_project(project_id, since));
        let settled = join_all(fetches).await;

        let mut events: Vec<NewEvent> = Vec::new();
        let mut failed_projects = Vec::new();
        for (&project_id, outcome) in self.project_ids.iter().zip(settled) {
            match outcome {
                Ok(batch) => events.extend(batch),
                Err(e) => {
                    warn!(project = project_id, error = %e, "Project fetch failed, continuing with siblings");
                    failed_projects.push(ProjectFailure {
                        project_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        let fetched = events.len() as u32;
        let outcome = self.store.insert_batch(user_id, &events).await?;
        let link = self.linker.link_parents(user_id).await?;
        self.linker.aggregate_activity(user_id).await?;
        self.store.advance_watermark(user_id, cycle_started_at).await?;

        let summary = SyncSummary {
            fetched,
            stored: outcome.stored,
            skipped: outcome.skipped,
            linked: link.resolved,
            unresolved: link.unresolved,
            failed_projects,
            duration_ms: started.elapsed().as_millis() as i64,
        };

        info!(
            user = %user_id,
            fetched = summary.fetched,
            stored = summary.stored,
            skipped = summary.skipped,
            linked = summary.linked,
            unresolved = summary.unresolved,
            failed = summary.failed_projects.len(),
            duration_ms = summary.duration_ms,
            "Sync cycle complete"
        );
        Ok(summary)
    }

    /// Fetch and normalize everything for one project. Issues and merge
    /// requests come first; their notes need the fetched items to know what
    /// to query.
    async fn fetch_project(
        &self,
        project_id: i64,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<NewEvent>> {
        let _permit = self
            .project_pool
            .acquire()
            .await
            .map_err(|_| anyhow::anyhow!("project semaphore closed"))?;

        info!(project = project_id, "Fetching project");
        let project = self.client.get_project(project_id).await?;
        let path = project.path_with_namespace.as_str();

        let issues = self.client.list_project_issues(project_id, since).await?;
        let merge_requests = self
            .client
            .list_project_merge_requests(project_id, since)
            .await?;

        let mut events: Vec<NewEvent> = Vec::new();
        events.extend(issues.iter().map(|i| normalize::normalize_issue(i, path)));
        events.extend(
            merge_requests
                .iter()
                .map(|mr| normalize::normalize_merge_request(mr, path)),
        );

        let issue_notes = join_all(
            issues
                .iter()
                .map(|issue| self.fetch_issue_notes(issue, path)),
        );
        let mr_notes = join_all(
            merge_requests
                .iter()
                .map(|mr| self.fetch_merge_request_notes(mr, path)),
        );
        let (issue_notes, mr_notes) = futures::join!(issue_notes, mr_notes);

        events.extend(issue_notes.into_iter().flatten());
        events.extend(mr_notes.into_iter().flatten());

        info!(project = project_id, count = events.len(), "Project fetch complete");
        Ok(events)
    }

    /// Notes for one issue. Failures degrade to an empty list so one item
    /// never sinks its whole project.
    async fn fetch_issue_notes(&self, issue: &RemoteIssue, project_path: &str) -> Vec<NewEvent> {
        let Ok(_permit) = self.note_pool.acquire().await else {
            return Vec::new();
        };

        match self.client.list_issue_notes(issue.project_id, issue.id).await {
            Ok(notes) => notes
                .iter()
                .map(|n| normalize::normalize_note(n, &issue.web_url, issue.project_id, project_path))
                .collect(),
            Err(e) => {
                warn!(issue = issue.id, error = %e, "Note fetch failed, degrading to empty list");
                Vec::new()
            }
        }
    }

    /// Notes for one merge request, same degradation policy as issues.
    async fn fetch_merge_request_notes(
        &self,
        mr: &RemoteMergeRequest,
        project_path: &str,
    ) -> Vec<NewEvent> {
        let Ok(_permit) = self.note_pool.acquire().await else {
            return Vec::new();
        };

        match self
            .client
            .list_merge_request_notes(mr.project_id, mr.id)
            .await
        {
            Ok(notes) => notes
                .iter()
                .map(|n| normalize::normalize_note(n, &mr.web_url, mr.project_id, project_path))
                .collect(),
            Err(e) => {
                warn!(merge_request = mr.id, error = %e, "Note fetch failed, degrading to empty list");
                Vec::new()
            }
        }
    }
}
