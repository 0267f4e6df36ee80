//! Structured error types for Hearth
//!
//! Provides type-safe error handling with rich context for debugging,
//! user-friendly messages, and a closed classification the Executor and
//! Heartbeat use to decide retry/fallback/escalation behavior.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Primary error type for Hearth operations.
///
/// Every variant maps onto one of the error kinds the orchestration layer
/// reasons about: OOM triggers model fallback, timeouts/network errors count
/// against a retry budget, parse/validation failures trigger a re-invocation
/// with a different model, skill errors are fed back as observations, store
/// errors are broadcast as `task_failed`, and user cancellation is not an
/// error at all but is represented here so it can flow through the same
/// `Result` plumbing.
#[derive(Error, Debug)]
pub enum HearthError {
    // =========================================================================
    // Model Gateway errors
    // =========================================================================
    /// Backend reported memory pressure; triggers fallback to the next model
    /// in the router's chain.
    #[error("model {model} is out of memory")]
    ModelOom { model: String },

    /// Model call exceeded its configured timeout.
    #[error("model {model} timed out after {duration:?}")]
    ModelTimeout { model: String, duration: Duration },

    /// Transport-level failure talking to the model runtime.
    #[error("network error calling {model}: {message}")]
    NetworkError { model: String, message: String },

    /// Rate limit exceeded against the configured token/request budget.
    #[error("rate limit exceeded: {limit_type}")]
    RateLimitExceeded { limit_type: String },

    /// Backend returned a non-2xx response outside the OOM/timeout cases.
    #[error("provider error: {status} - {message}")]
    ProviderError { status: u16, message: String },

    /// Model's context window was exceeded by the assembled prompt.
    #[error("context window exceeded. Max: {max_tokens}, Used: {used_tokens}")]
    ContextWindowExceeded {
        max_tokens: usize,
        used_tokens: usize,
    },

    // =========================================================================
    // Executor errors
    // =========================================================================
    /// Accumulated reply contained neither SKILL, FINAL, nor ESCALATE after
    /// the nudge budget was exhausted.
    #[error("could not parse a SKILL/FINAL/ESCALATE directive from the model reply")]
    ParseError { detail: String },

    /// A skill invocation failed; caught inside the tool-use loop and fed
    /// back to the model as an observation. Never fatal to a turn.
    #[error("skill '{name}' failed: {message}")]
    SkillError { name: String, message: String },

    /// The skill named in a `SKILL:` directive is not registered.
    #[error("unknown skill: {name}")]
    SkillNotFound { name: String },

    /// Post-execution output validation rejected the reply.
    #[error("validation failed: {reason}")]
    ValidationFailure { reason: String },

    /// The tool-call budget was exhausted before a FINAL answer appeared.
    #[error("tool-call budget exhausted after {tool_calls} calls")]
    BudgetExhausted { tool_calls: u32 },

    // =========================================================================
    // Task Store errors
    // =========================================================================
    /// Database failure; propagated to the caller, who is responsible for
    /// demoting it into a `task_failed` broadcast event.
    #[error("store error: {0}")]
    StoreError(String),

    /// Task not found by id.
    #[error("task not found: {0}")]
    TaskNotFound(i64),

    /// Attempted an operation that requires a precondition on task status
    /// that did not hold (e.g. `start` on a non-pending task).
    #[error("invalid task transition: {reason}")]
    InvalidTransition { reason: String },

    // =========================================================================
    // User cancellation (not an error condition, but flows through Result)
    // =========================================================================
    /// The user pre-empted the heartbeat or closed the chat stream mid-turn.
    #[error("cancelled by user")]
    CancelledByUser,

    // =========================================================================
    // Configuration errors
    // =========================================================================
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("missing required configuration: {key}")]
    MissingConfig { key: String },

    // =========================================================================
    // User input / boundary errors
    // =========================================================================
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    // =========================================================================
    // Internal errors
    // =========================================================================
    #[error("internal error: {message}")]
    Internal { message: String },

    #[error("unexpected state: {description}")]
    UnexpectedState { description: String },

    // =========================================================================
    // External error wrappers (transparent)
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("HTTP error: {0}")]
    Http(String),
}

impl HearthError {
    /// Check if the error is retryable (transient) without changing model.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ModelTimeout { .. }
            | Self::NetworkError { .. }
            | Self::RateLimitExceeded { .. } => true,

            Self::ProviderError { status, .. } => matches!(status, 429 | 500 | 502 | 503 | 504),

            Self::Io(io_err) => matches!(
                io_err.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
            ),

            // OOM is "retryable" only via fallback to a different model, not
            // a bare retry of the same one — callers should check `is_oom()`.
            Self::ModelOom { .. } => false,

            Self::SkillError { .. }
            | Self::ParseError { .. }
            | Self::ValidationFailure { .. }
            | Self::SkillNotFound { .. }
            | Self::BudgetExhausted { .. }
            | Self::StoreError(_)
            | Self::TaskNotFound(_)
            | Self::InvalidTransition { .. }
            | Self::CancelledByUser
            | Self::InvalidConfig { .. }
            | Self::MissingConfig { .. }
            | Self::InvalidInput { .. }
            | Self::FileNotFound { .. }
            | Self::Internal { .. }
            | Self::UnexpectedState { .. }
            | Self::ContextWindowExceeded { .. }
            | Self::Json(_)
            | Self::Http(_) => false,
        }
    }

    /// True for errors the router's fallback chain should treat as an OOM
    /// signal (try the next model rather than retrying the same one).
    pub fn is_oom(&self) -> bool {
        matches!(self, Self::ModelOom { .. })
    }

    /// Suggested retry delay for retryable errors.
    pub fn retry_delay(&self) -> Option<Duration> {
        match self {
            Self::RateLimitExceeded { .. } => Some(Duration::from_secs(5)),
            Self::ModelTimeout { .. } => Some(Duration::from_secs(1)),
            Self::NetworkError { .. } => Some(Duration::from_secs(2)),
            Self::ProviderError { status, .. } if *status == 503 => Some(Duration::from_secs(10)),
            _ => None,
        }
    }

    /// A message safe to surface to the UI. The core never surfaces raw
    /// exceptions; every failure is retried silently, broadcast as a typed
    /// event, or returned as a final message with `success = false`.
    pub fn user_message(&self) -> String {
        match self {
            Self::ContextWindowExceeded { .. } => {
                "The conversation is too long. Please start a new session.".to_string()
            }
            Self::SkillError { name, .. } => format!("Failed to execute skill '{}'.", name),
            Self::CancelledByUser => "Task paused.".to_string(),
            Self::BudgetExhausted { .. } => {
                "Reached the tool-call budget before finishing.".to_string()
            }
            _ => self.to_string(),
        }
    }
}

impl From<anyhow::Error> for HearthError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(io_err) = err.downcast_ref::<std::io::Error>() {
            return Self::Io(std::io::Error::new(io_err.kind(), io_err.to_string()));
        }
        Self::Internal {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for HearthError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<sqlx::Error> for HearthError {
    fn from(err: sqlx::Error) -> Self {
        Self::StoreError(err.to_string())
    }
}

impl From<reqwest::Error> for HearthError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}

/// Result type alias using HearthError.
pub type Result<T> = std::result::Result<T, HearthError>;

/// Extension trait for converting Option to Result with HearthError.
pub trait OptionExt<T> {
    fn ok_or_not_found(self, path: impl Into<PathBuf>) -> Result<T>;
    fn ok_or_missing(self, key: impl Into<String>) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, path: impl Into<PathBuf>) -> Result<T> {
        self.ok_or_else(|| HearthError::FileNotFound { path: path.into() })
    }

    fn ok_or_missing(self, key: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| HearthError::MissingConfig { key: key.into() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(HearthError::ModelTimeout {
            model: "llama".into(),
            duration: Duration::from_secs(30)
        }
        .is_retryable());

        assert!(HearthError::NetworkError {
            model: "llama".into(),
            message: "connection reset".into()
        }
        .is_retryable());

        assert!(!HearthError::ContextWindowExceeded {
            max_tokens: 8192,
            used_tokens: 9000
        }
        .is_retryable());

        // OOM is never a bare retry — it routes through fallback instead.
        assert!(!HearthError::ModelOom { model: "14b".into() }.is_retryable());
        assert!(HearthError::ModelOom { model: "14b".into() }.is_oom());
    }

    #[test]
    fn test_user_messages() {
        let err = HearthError::ContextWindowExceeded {
            max_tokens: 100,
            used_tokens: 200,
        };
        assert!(err.user_message().contains("conversation is too long"));

        let err = HearthError::CancelledByUser;
        assert_eq!(err.user_message(), "Task paused.");
    }

    #[test]
    fn test_option_ext() {
        let opt: Option<i32> = None;
        let result = opt.ok_or_not_found("/tmp/test");
        assert!(matches!(result, Err(HearthError::FileNotFound { .. })));

        let opt: Option<i32> = None;
        let result = opt.ok_or_missing("api_key");
        assert!(matches!(result, Err(HearthError::MissingConfig { .. })));
    }
}
