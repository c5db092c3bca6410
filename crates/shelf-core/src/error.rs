use thiserror::Error;

/// Application-wide error types for shelf.
#[derive(Error, Debug)]
pub enum AppError {
    /// HTTP request failed or returned a non-success status.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// The origin (or a proxy in front of it) refused the request.
    #[error("Blocked: {0}")]
    Blocked(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Missing or malformed configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Local filesystem operation failed.
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Headless browser session failed.
    #[error("Browser error: {0}")]
    BrowserError(String),

    /// Caller supplied an invalid argument.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A record the caller referenced does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Cancel was requested for a task that is not pending or running.
    #[error("Task {id} is not running (status: {status})")]
    NotRunning { id: i64, status: String },

    /// The running task was stopped by an operator.
    ///
    /// Not a failure: unit runners treat it as a clean exit.
    #[error("Task was stopped manually")]
    Cancelled,

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

const BLOCK_MARKERS: &[&str] = &["forbidden", "access denied", "cloudflare"];

/// Block detection for free-form error text.
///
/// Status errors (`HTTP {status} for {url}`) are judged by the status alone;
/// the URL may contain any digits or words.
fn blocked_text(msg: &str) -> bool {
    let status_line = msg
        .strip_prefix("HTTP ")
        .and_then(|rest| rest.split_once(" for "));
    if let Some((status, _url)) = status_line {
        return status.trim() == "403";
    }
    let msg = msg.to_lowercase();
    msg.starts_with("403") || BLOCK_MARKERS.iter().any(|marker| msg.contains(marker))
}

impl AppError {
    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::NetworkError(_) | AppError::Timeout(_) => true,
            AppError::HttpError(msg) => {
                msg.contains("timeout") || msg.contains("connect") || msg.contains("reset")
            }
            _ => false,
        }
    }

    /// Returns true if the error signals that the current egress IP is blocked.
    pub fn is_blocked(&self) -> bool {
        match self {
            AppError::Blocked(_) => true,
            AppError::HttpError(msg) | AppError::NetworkError(msg) => blocked_text(msg),
            _ => false,
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, AppError::Cancelled)
    }

    /// Transport-level failures: the request never produced a usable response.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            AppError::HttpError(_)
                | AppError::Blocked(_)
                | AppError::NetworkError(_)
                | AppError::Timeout(_)
        )
    }
}
