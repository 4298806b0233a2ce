//! Error types for convgrade operations.
//!
//! Defines error types for the major subsystems:
//! - Inference client interactions
//! - Code judging client interactions
//! - Ephemeral and durable stores
//! - Session orchestration
//! - Turn evaluation

use thiserror::Error;

/// Errors that can occur during inference operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API base URL: CONVGRADE_API_BASE environment variable not set")]
    MissingApiBase,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Request timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Failed to parse inference response: {0}")]
    ParseError(String),

    #[error("Response did not match the requested schema: {0}")]
    SchemaMismatch(String),

    #[error("Empty response: no choices returned")]
    EmptyResponse,

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LlmError {
    /// Whether the failure is transient and worth retrying with backoff.
    ///
    /// Rate limits and transport-level failures are transient; schema and
    /// parse failures are not (the single identical-request retry for those
    /// is handled at the call site).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmError::RequestFailed(_)
                | LlmError::Timeout { .. }
                | LlmError::RateLimited(_)
                | LlmError::ApiError { code: 500..=599, .. }
        )
    }

    /// Whether the failure was a rate limit specifically.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, LlmError::RateLimited(_))
    }
}

/// Errors that can occur during code judging operations.
#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Submission rejected: {0}")]
    SubmissionRejected(String),

    #[error("Submission '{0}' not found")]
    SubmissionNotFound(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Judging did not finish within {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("Failed to parse judge response: {0}")]
    ParseError(String),
}

impl JudgeError {
    /// Whether the failure is transient and worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            JudgeError::RequestFailed(_) | JudgeError::RateLimited(_) | JudgeError::Timeout { .. }
        )
    }
}

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Redis operation failed: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Database operation failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Session '{0}' not found")]
    SessionNotFound(uuid::Uuid),

    #[error("Turn {turn} of session '{session}' not found")]
    TurnNotFound { session: uuid::Uuid, turn: u32 },
}

/// Errors surfaced to the upstream caller by the orchestrator.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session '{0}' not found or expired")]
    NotFound(uuid::Uuid),

    #[error("Session '{id}' is {state} and no longer accepts input")]
    NotOpen { id: uuid::Uuid, state: String },

    #[error("Admissibility check unavailable, retry the turn: {0}")]
    GuardrailUnavailable(String),

    #[error("Reply generation unavailable, retry the turn: {0}")]
    ReplyUnavailable(String),

    #[error("Finalize already in progress for session '{0}'")]
    FinalizeInProgress(uuid::Uuid),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl SessionError {
    /// Whether the caller should retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SessionError::GuardrailUnavailable(_) | SessionError::ReplyUnavailable(_)
        )
    }
}

/// Errors internal to the turn evaluation pipeline.
///
/// These never cross the orchestrator's reply path; they decide whether a
/// turn lands as `Complete` or as `Failed` with the unscored sentinel.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("Inference error: {0}")]
    Llm(#[from] LlmError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Evaluation deadline of {seconds} seconds exceeded")]
    DeadlineExceeded { seconds: u64 },
}

/// Result type alias for evaluation pipeline operations.
pub type EvalResult<T> = Result<T, EvalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_error_transience() {
        assert!(LlmError::RateLimited("slow down".into()).is_transient());
        assert!(LlmError::Timeout { seconds: 30 }.is_transient());
        assert!(LlmError::RequestFailed("connection reset".into()).is_transient());
        assert!(LlmError::ApiError {
            code: 503,
            message: "overloaded".into()
        }
        .is_transient());

        assert!(!LlmError::SchemaMismatch("missing field".into()).is_transient());
        assert!(!LlmError::ParseError("not json".into()).is_transient());
        assert!(!LlmError::ApiError {
            code: 400,
            message: "bad request".into()
        }
        .is_transient());
    }

    #[test]
    fn test_rate_limit_detection() {
        assert!(LlmError::RateLimited("429".into()).is_rate_limit());
        assert!(!LlmError::Timeout { seconds: 5 }.is_rate_limit());
    }

    #[test]
    fn test_session_error_retryability() {
        assert!(SessionError::GuardrailUnavailable("timeout".into()).is_retryable());
        assert!(SessionError::ReplyUnavailable("rate limited".into()).is_retryable());
        assert!(!SessionError::NotFound(uuid::Uuid::new_v4()).is_retryable());
    }

    #[test]
    fn test_judge_error_transience() {
        assert!(JudgeError::RateLimited("busy".into()).is_transient());
        assert!(!JudgeError::UnsupportedLanguage("cobol".into()).is_transient());
    }
}
