//! Error types for the local-llm domain.
//!
//! Uses `thiserror` for ergonomic error definitions. Provider-specific failures
//! are classified into [`ProviderError`] at the HTTP boundary, then mapped once
//! into the closed, user-facing [`ConversationError`] set.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures reported by a [`Provider`](crate::provider::Provider) implementation.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider: {0}")]
    RateLimited(String),

    #[error("Insufficient quota: {0}")]
    QuotaExceeded(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

impl ToolError {
    /// Short machine-readable kind, reported back to the model.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "ToolNotFound",
            Self::ExecutionFailed { .. } => "ToolExecutionFailed",
            Self::InvalidArguments(_) => "InvalidToolArguments",
        }
    }
}

/// Failures while turning attachment references into inline content parts.
#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("`{}` does not exist", .0.display())]
    NotFound(PathBuf),

    #[error(
        "Only images and PDF are supported by the Local LLM API, `{}` is {mime}",
        .path.display()
    )]
    UnsupportedMediaType { path: PathBuf, mime: String },

    #[error("Failed to read `{}`: {reason}", .path.display())]
    Read { path: PathBuf, reason: String },
}

/// The closed set of failures a conversation run can end with.
#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("Rate limited by Local LLM")]
    RateLimited,

    #[error("Insufficient quota for Local LLM")]
    QuotaExceeded,

    #[error("Error talking to Local LLM: {0}")]
    Provider(String),

    #[error("Malformed arguments for tool call #{index}: {reason}")]
    MalformedToolArguments { index: u32, reason: String },

    #[error(transparent)]
    Attachment(#[from] AttachmentError),

    #[error("Conversation did not finish within {0:?}")]
    DeadlineExceeded(Duration),
}

impl From<ProviderError> for ConversationError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::RateLimited(_) => Self::RateLimited,
            ProviderError::QuotaExceeded(_) => Self::QuotaExceeded,
            other => Self::Provider(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = ProviderError::ApiError {
            status_code: 500,
            message: "upstream exploded".into(),
        };
        assert!(err.to_string().contains("500"));
        assert!(err.to_string().contains("upstream exploded"));
    }

    #[test]
    fn rate_limit_classifies_distinctly() {
        let err: ConversationError = ProviderError::RateLimited("slow down".into()).into();
        assert!(matches!(err, ConversationError::RateLimited));
        assert_eq!(err.to_string(), "Rate limited by Local LLM");
    }

    #[test]
    fn quota_classifies_distinctly() {
        let err: ConversationError = ProviderError::QuotaExceeded("billing".into()).into();
        assert!(matches!(err, ConversationError::QuotaExceeded));
    }

    #[test]
    fn other_provider_errors_are_generic() {
        let err: ConversationError =
            ProviderError::AuthenticationFailed("bad key".into()).into();
        match err {
            ConversationError::Provider(msg) => assert!(msg.contains("bad key")),
            other => panic!("expected generic provider error, got {other:?}"),
        }
    }

    #[test]
    fn attachment_error_mentions_path() {
        let err = AttachmentError::UnsupportedMediaType {
            path: PathBuf::from("/tmp/notes.txt"),
            mime: "text/plain".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("/tmp/notes.txt"));
        assert!(msg.contains("text/plain"));
    }

    #[test]
    fn tool_error_kinds() {
        assert_eq!(ToolError::NotFound("x".into()).kind(), "ToolNotFound");
        assert_eq!(
            ToolError::InvalidArguments("x".into()).kind(),
            "InvalidToolArguments"
        );
    }
}
