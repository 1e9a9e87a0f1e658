use thiserror::Error;

pub type Result<T> = std::result::Result<T, TrackerError>;

#[derive(Debug, Error)]
pub enum TrackerError {
    /// 401 from the tracker. Never retried; the caller must refresh the
    /// bearer token out-of-band.
    #[error("Tracker token invalid or expired")]
    Auth,

    /// 429 that survived all retry attempts.
    #[error("Rate limited by tracker (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    /// Non-retryable API error (4xx other than 401/429, or 5xx after retries).
    #[error("Tracker API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Request exceeded the configured per-request timeout.
    #[error("Tracker request timed out: {0}")]
    Timeout(String),

    /// Transport-level failure (connection reset, DNS, TLS) after retries.
    #[error("Network error: {0}")]
    Network(String),

    /// Page payload did not match the expected shape.
    #[error("Malformed tracker payload: {0}")]
    InvalidPayload(String),
}

impl From<reqwest::Error> for TrackerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TrackerError::Timeout(err.to_string())
        } else {
            TrackerError::Network(err.to_string())
        }
    }
}

impl TrackerError {
    /// Whether a fresh attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TrackerError::Timeout(_)
                | TrackerError::Network(_)
                | TrackerError::Api { status: 500..=599, .. }
        )
    }
}
