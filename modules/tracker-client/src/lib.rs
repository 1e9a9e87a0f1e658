pub mod error;
pub mod types;

pub use error::{Result, TrackerError};
pub use types::{RemoteIssue, RemoteMergeRequest, RemoteNote, RemoteProject, RemoteUser};

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, LINK, RETRY_AFTER};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

/// Total attempts per request: the first try plus three retries.
const MAX_ATTEMPTS: u32 = 4;
/// Base delay for exponential backoff. Actual delay is base * 2^attempt.
const BACKOFF_BASE: Duration = Duration::from_secs(1);
/// Backoff ceiling; keeps the 1s, 2s, 4s ladder from growing further.
const BACKOFF_CAP: Duration = Duration::from_secs(4);
/// Minimum wait after a 429, even when Retry-After suggests less.
const RETRY_AFTER_FLOOR: Duration = Duration::from_secs(1);
/// Page size requested from list endpoints.
const PER_PAGE: u32 = 100;

pub struct TrackerClientConfig {
    pub base_url: String,
    pub token: String,
    pub timeout_secs: u64,
    /// Max pages followed per list call before truncating.
    pub page_cap: u32,
}

/// Client for a GitLab-compatible tracker REST API.
pub struct TrackerClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
    page_cap: u32,
}

impl TrackerClient {
    pub fn new(config: TrackerClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| TrackerError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token,
            page_cap: config.page_cap.max(1),
        })
    }

    /// Issues in a project, optionally only those updated after a watermark.
    pub async fn list_project_issues(
        &self,
        project_id: i64,
        updated_after: Option<DateTime<Utc>>,
    ) -> Result<Vec<RemoteIssue>> {
        let url = self.list_url(&format!("projects/{project_id}/issues"), updated_after);
        self.fetch_all_pages(url, "issues").await
    }

    /// Merge requests in a project, optionally only those updated after a watermark.
    pub async fn list_project_merge_requests(
        &self,
        project_id: i64,
        updated_after: Option<DateTime<Utc>>,
    ) -> Result<Vec<RemoteMergeRequest>> {
        let url = self.list_url(&format!("projects/{project_id}/merge_requests"), updated_after);
        self.fetch_all_pages(url, "merge_requests").await
    }

    /// Notes on one issue.
    pub async fn list_issue_notes(&self, project_id: i64, issue_id: i64) -> Result<Vec<RemoteNote>> {
        let url = format!(
            "{}/projects/{project_id}/issues/{issue_id}/notes?per_page={PER_PAGE}",
            self.base_url
        );
        self.fetch_all_pages(url, "issue_notes").await
    }

    /// Notes on one merge request.
    pub async fn list_merge_request_notes(
        &self,
        project_id: i64,
        merge_request_id: i64,
    ) -> Result<Vec<RemoteNote>> {
        let url = format!(
            "{}/projects/{project_id}/merge_requests/{merge_request_id}/notes?per_page={PER_PAGE}",
            self.base_url
        );
        self.fetch_all_pages(url, "merge_request_notes").await
    }

    /// Project metadata (path, canonical URL).
    pub async fn get_project(&self, project_id: i64) -> Result<RemoteProject> {
        let url = format!("{}/projects/{project_id}", self.base_url);
        let resp = self.get_with_retry(&url).await?;
        resp.json::<RemoteProject>()
            .await
            .map_err(|e| TrackerError::InvalidPayload(format!("project {project_id}: {e}")))
    }

    fn list_url(&self, path: &str, updated_after: Option<DateTime<Utc>>) -> String {
        let mut url = format!("{}/{path}?per_page={PER_PAGE}&order_by=updated_at", self.base_url);
        if let Some(since) = updated_after {
            url.push_str(&format!("&updated_after={}", since.to_rfc3339()));
        }
        url
    }

    /// Follow the `Link: rel="next"` chain, validating each page as a JSON
    /// array and deserializing its items. Stops at the page cap.
    async fn fetch_all_pages<T: DeserializeOwned>(
        &self,
        first_url: String,
        resource: &str,
    ) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut next_url = Some(first_url);
        let mut pages = 0u32;

        while let Some(url) = next_url {
            if pages >= self.page_cap {
                warn!(resource, cap = self.page_cap, "Page cap reached, truncating fetch");
                break;
            }

            let resp = self.get_with_retry(&url).await?;
            next_url = parse_next_link(resp.headers());

            let payload: serde_json::Value = resp
                .json()
                .await
                .map_err(|e| TrackerError::InvalidPayload(format!("{resource}: {e}")))?;
            let page = payload.as_array().ok_or_else(|| {
                TrackerError::InvalidPayload(format!("{resource}: expected a JSON array page"))
            })?;

            for item in page {
                let parsed: T = serde_json::from_value(item.clone()).map_err(|e| {
                    TrackerError::InvalidPayload(format!("{resource} item: {e}"))
                })?;
                items.push(parsed);
            }

            pages += 1;
        }

        debug!(resource, count = items.len(), pages, "Fetched pages");
        Ok(items)
    }

    /// GET with the retry policy: exponential backoff on 5xx/transport
    /// failures, Retry-After on 429, immediate failure on 401 and other 4xx.
    async fn get_with_retry(&self, url: &str) -> Result<reqwest::Response> {
        let mut attempt = 0u32;

        loop {
            let outcome = self.client.get(url).bearer_auth(&self.token).send().await;

            let err = match outcome {
                Ok(resp) => {
                    let status = resp.status();

                    if status == StatusCode::UNAUTHORIZED {
                        return Err(TrackerError::Auth);
                    }

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        let wait = parse_retry_after(resp.headers().get(RETRY_AFTER))
                            .unwrap_or(BACKOFF_BASE)
                            .max(RETRY_AFTER_FLOOR);
                        if attempt + 1 < MAX_ATTEMPTS {
                            warn!(url, wait_secs = wait.as_secs(), "Rate limited, honoring Retry-After");
                            tokio::time::sleep(wait).await;
                            attempt += 1;
                            continue;
                        }
                        return Err(TrackerError::RateLimited {
                            retry_after_secs: wait.as_secs(),
                        });
                    }

                    if !status.is_server_error() {
                        if !status.is_success() {
                            let message = resp.text().await.unwrap_or_default();
                            return Err(TrackerError::Api {
                                status: status.as_u16(),
                                message,
                            });
                        }
                        return Ok(resp);
                    }

                    let message = resp.text().await.unwrap_or_default();
                    TrackerError::Api {
                        status: status.as_u16(),
                        message,
                    }
                }
                Err(e) => e.into(),
            };

            if err.is_retryable() && attempt + 1 < MAX_ATTEMPTS {
                let delay = backoff_delay(attempt);
                warn!(
                    url,
                    attempt = attempt + 1,
                    delay_secs = delay.as_secs(),
                    error = %err,
                    "Transient tracker failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            return Err(err);
        }
    }
}

/// Exponential backoff: 1s, 2s, 4s, then capped.
fn backoff_delay(attempt: u32) -> Duration {
    let delay = BACKOFF_BASE * 2u32.saturating_pow(attempt);
    delay.min(BACKOFF_CAP)
}

/// Extract the `rel="next"` target from a Link header, if present.
fn parse_next_link(headers: &HeaderMap) -> Option<String> {
    let link = headers.get(LINK)?.to_str().ok()?;
    for part in link.split(',') {
        let mut sections = part.trim().split(';');
        let Some(target) = sections.next() else {
            continue;
        };
        let target = target.trim();
        if !target.starts_with('<') || !target.ends_with('>') {
            continue;
        }
        if sections.any(|p| p.trim() == r#"rel="next""#) {
            return Some(target[1..target.len() - 1].to_string());
        }
    }
    None
}

/// Parse a Retry-After header value: either delta-seconds or an HTTP-date.
fn parse_retry_after(value: Option<&HeaderValue>) -> Option<Duration> {
    let raw = value?.to_str().ok()?.trim();

    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let when = DateTime::parse_from_rfc2822(raw).ok()?;
    let delta = when.with_timezone(&Utc) - Utc::now();
    Some(Duration::from_secs(delta.num_seconds().max(0) as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with_link(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(LINK, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn next_link_parsed_from_header() {
        let headers = headers_with_link(
            r#"<https://tracker.test/api/v4/projects/1/issues?page=2>; rel="next", <https://tracker.test/api/v4/projects/1/issues?page=5>; rel="last""#,
        );
        assert_eq!(
            parse_next_link(&headers).as_deref(),
            Some("https://tracker.test/api/v4/projects/1/issues?page=2")
        );
    }

    #[test]
    fn no_next_link_on_last_page() {
        let headers = headers_with_link(
            r#"<https://tracker.test/api/v4/projects/1/issues?page=1>; rel="first""#,
        );
        assert_eq!(parse_next_link(&headers), None);
    }

    #[test]
    fn missing_link_header_yields_none() {
        assert_eq!(parse_next_link(&HeaderMap::new()), None);
    }

    #[test]
    fn retry_after_delta_seconds() {
        let value = HeaderValue::from_static("7");
        assert_eq!(
            parse_retry_after(Some(&value)),
            Some(Duration::from_secs(7))
        );
    }

    #[test]
    fn retry_after_http_date() {
        let future = Utc::now() + chrono::Duration::seconds(30);
        let value = HeaderValue::from_str(&future.to_rfc2822()).unwrap();
        let parsed = parse_retry_after(Some(&value)).unwrap();
        assert!(parsed <= Duration::from_secs(30));
        assert!(parsed >= Duration::from_secs(25));
    }

    #[test]
    fn retry_after_past_date_clamps_to_zero() {
        let past = Utc::now() - chrono::Duration::seconds(30);
        let value = HeaderValue::from_str(&past.to_rfc2822()).unwrap();
        assert_eq!(parse_retry_after(Some(&value)), Some(Duration::ZERO));
    }

    #[test]
    fn retry_after_garbage_yields_none() {
        let value = HeaderValue::from_static("soon-ish");
        assert_eq!(parse_retry_after(Some(&value)), None);
        assert_eq!(parse_retry_after(None), None);
    }

    #[test]
    fn backoff_ladder_is_capped() {
        assert_eq!(backoff_delay(0), Duration::from_secs(1));
        assert_eq!(backoff_delay(1), Duration::from_secs(2));
        assert_eq!(backoff_delay(2), Duration::from_secs(4));
        assert_eq!(backoff_delay(3), Duration::from_secs(4));
        assert_eq!(backoff_delay(10), Duration::from_secs(4));
    }
}
