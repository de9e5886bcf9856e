//! Error taxonomy shared across all videoagent crates.
//!
//! Two layers: the internal [`Error`] enum used with `?` throughout the
//! codebase, and the client-facing [`ApiError`] envelope keyed by a closed
//! [`ErrorCode`] set with fixed retryability.

use serde::{Deserialize, Serialize};
use serde_json::json;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error codes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Standardized error codes for client-facing responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Transcription
    DownloadFailed,
    FfmpegNotFound,
    TranscriptionFailed,
    TranscriptionTimeout,

    // Knowledge graph
    BootstrapFailed,
    ExtractionFailed,
    ProjectNotFound,
    InvalidProjectState,

    // Sessions
    SessionNotFound,
    SessionExpired,
    SessionClosed,

    // Resources
    ResourceNotFound,
    FileNotFound,

    // Validation
    ValidationError,
    InvalidFormat,

    // Capacity
    RateLimited,
    ServiceUnavailable,
    RequestTimeout,

    // Generic
    InternalError,
}

impl ErrorCode {
    /// Whether a client should retry a request that failed with this code.
    /// Fixed per code: transient conditions are retryable, permanent ones
    /// are not.
    pub fn retryable(self) -> bool {
        matches!(
            self,
            Self::DownloadFailed
                | Self::TranscriptionTimeout
                | Self::RateLimited
                | Self::ServiceUnavailable
                | Self::RequestTimeout
                | Self::InternalError
        )
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// API error envelope
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Structured error payload returned to clients as `{"error": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    pub retryable: bool,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            detail: None,
            hint: None,
            retryable: code.retryable(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Wrap in the `{"error": {...}}` envelope used by the API layer.
    pub fn to_envelope(&self) -> serde_json::Value {
        json!({ "error": self })
    }

    // ── Predefined factories ────────────────────────────────────────

    pub fn session_not_found(session_id: &str) -> Self {
        Self::new(ErrorCode::SessionNotFound, "Session not found")
            .with_detail(format!("Session ID: {session_id}"))
            .with_hint("The session may have expired. Start a new session.")
    }

    pub fn session_expired() -> Self {
        Self::new(ErrorCode::SessionExpired, "Session has expired")
            .with_detail("Sessions expire after 1 hour of inactivity")
            .with_hint("Start a fresh conversation")
    }

    pub fn session_closed() -> Self {
        Self::new(ErrorCode::SessionClosed, "Session is closed")
            .with_hint("Start a new session to continue")
    }

    pub fn request_timeout(detail: Option<String>) -> Self {
        let err = Self::new(ErrorCode::RequestTimeout, "Request timed out")
            .with_hint("Please try again");
        match detail {
            Some(d) => err.with_detail(d),
            None => err,
        }
    }

    pub fn transcription_timeout(detail: Option<String>) -> Self {
        let err = Self::new(
            ErrorCode::TranscriptionTimeout,
            "Transcription operation timed out",
        )
        .with_hint("Try again with a shorter video or audio file");
        match detail {
            Some(d) => err.with_detail(d),
            None => err,
        }
    }

    pub fn ffmpeg_not_found() -> Self {
        Self::new(
            ErrorCode::FfmpegNotFound,
            "FFmpeg is not installed or not found in PATH",
        )
        .with_detail("Audio extraction requires FFmpeg")
        .with_hint("Install FFmpeg to enable video transcription")
    }

    pub fn project_not_found(project_id: &str) -> Self {
        Self::new(ErrorCode::ProjectNotFound, "Knowledge graph project not found")
            .with_detail(format!("Project ID: {project_id}"))
            .with_hint("Check the project ID or create a new project")
    }

    pub fn invalid_project_state(current: &str, required: &str) -> Self {
        Self::new(
            ErrorCode::InvalidProjectState,
            format!("Project is in '{current}' state, expected '{required}'"),
        )
        .with_detail(format!("Current state: {current}, Required: {required}"))
        .with_hint("Wait for the current operation to complete or check project status")
    }

    pub fn validation(field: &str, reason: &str) -> Self {
        Self::new(
            ErrorCode::ValidationError,
            format!("Validation failed for field: {field}"),
        )
        .with_detail(reason.to_owned())
        .with_hint("Check the input format and try again")
    }

    pub fn file_not_found(filename: &str) -> Self {
        Self::new(ErrorCode::FileNotFound, "File not found")
            .with_detail(format!("Filename: {filename}"))
            .with_hint("The file may have been deleted or moved")
    }

    pub fn service_unavailable(detail: Option<String>) -> Self {
        let err = Self::new(ErrorCode::ServiceUnavailable, "Service temporarily unavailable")
            .with_hint("Please try again in a moment");
        match detail {
            Some(d) => err.with_detail(d),
            None => err,
        }
    }

    pub fn rate_limited(detail: Option<String>) -> Self {
        let err = Self::new(ErrorCode::RateLimited, "Too many requests in flight")
            .with_hint("Wait for the current request to finish and retry");
        match detail {
            Some(d) => err.with_detail(d),
            None => err,
        }
    }

    pub fn internal(detail: Option<String>) -> Self {
        let err = Self::new(ErrorCode::InternalError, "An internal error occurred")
            .with_hint("Please try again. If the problem persists, contact support.");
        match detail {
            Some(d) => err.with_detail(d),
            None => err,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Internal error type
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Shared error type used across all videoagent crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("session closed: {0}")]
    SessionClosed(String),

    #[error("queue full: {0}")]
    QueueFull(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("agent: {0}")]
    Agent(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Map to the closed client-facing error code set.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Timeout(_) => ErrorCode::RequestTimeout,
            Self::SessionClosed(_) => ErrorCode::SessionClosed,
            Self::QueueFull(_) => ErrorCode::RateLimited,
            Self::Validation(_) => ErrorCode::ValidationError,
            Self::NotFound(_) => ErrorCode::ResourceNotFound,
            Self::Unavailable(_) => ErrorCode::ServiceUnavailable,
            Self::Cancelled(_) => ErrorCode::RequestTimeout,
            Self::Config(_) => ErrorCode::ValidationError,
            Self::Io(_) | Self::Json(_) | Self::Agent(_) | Self::Other(_) => {
                ErrorCode::InternalError
            }
        }
    }

    pub fn to_api_error(&self) -> ApiError {
        match self {
            Self::SessionClosed(_) => ApiError::session_closed(),
            Self::Timeout(msg) => ApiError::request_timeout(Some(msg.clone())),
            Self::QueueFull(msg) => ApiError::rate_limited(Some(msg.clone())),
            Self::Validation(msg) => ApiError::validation("request", msg),
            Self::Unavailable(msg) => ApiError::service_unavailable(Some(msg.clone())),
            other => ApiError::internal(Some(other.to_string())),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
