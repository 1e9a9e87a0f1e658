use std::env;

use uuid::Uuid;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Postgres
    pub database_url: String,

    // Remote tracker
    pub tracker_base_url: String,
    pub tracker_token: String,

    // Sync scope
    pub sync_user_id: Uuid,
    pub sync_project_ids: Vec<i64>,

    // Cursor signing
    pub cursor_secret: String,

    // Fetch tuning
    pub request_timeout_secs: u64,
    pub max_pages_per_resource: u32,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            tracker_base_url: required_env("TRACKER_BASE_URL"),
            tracker_token: required_env("TRACKER_TOKEN"),
            sync_user_id: required_env("SYNC_USER_ID")
                .parse()
                .expect("SYNC_USER_ID must be a UUID"),
            sync_project_ids: parse_project_ids(&required_env("SYNC_PROJECT_IDS")),
            cursor_secret: required_env("CURSOR_SECRET"),
            request_timeout_secs: env::var("REQUEST_TIMEOUT_SECS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .expect("REQUEST_TIMEOUT_SECS must be a number"),
            max_pages_per_resource: env::var("MAX_PAGES_PER_RESOURCE")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .expect("MAX_PAGES_PER_RESOURCE must be a number"),
        }
    }

    /// Load a minimal config for read-only feed consumers (no tracker token needed).
    pub fn feed_from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            tracker_base_url: String::new(),
            tracker_token: String::new(),
            sync_user_id: Uuid::nil(),
            sync_project_ids: Vec::new(),
            cursor_secret: required_env("CURSOR_SECRET"),
            request_timeout_secs: 5,
            max_pages_per_resource: 10,
        }
    }

    /// Log the non-secret parts of the configuration.
    pub fn log_redacted(&self) {
        tracing::info!(
            tracker_base_url = %self.tracker_base_url,
            user_id = %self.sync_user_id,
            projects = ?self.sync_project_ids,
            timeout_secs = self.request_timeout_secs,
            page_cap = self.max_pages_per_resource,
            "Configuration loaded"
        );
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

/// Parse a comma-separated list of remote project ids.
fn parse_project_ids(raw: &str) -> Vec<i64> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse()
                .unwrap_or_else(|_| panic!("SYNC_PROJECT_IDS entry is not a number: {s}"))
        })
        .collect()
}
