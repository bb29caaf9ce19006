use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Invalid option combination. Raised before any generation call is made.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} must be at least 1 (got {value})")]
    BelowMinimum { field: &'static str, value: u64 },
    #[error("no models configured")]
    NoModels,
    #[error("model identifier at position {0} is empty")]
    EmptyModel(usize),
    #[error("model '{0}' is listed more than once")]
    DuplicateModel(String),
    #[error(
        "append_mode = false would truncate {}; the response log is append-only",
        .0.display()
    )]
    TruncationRequested(PathBuf),
    #[error("rate_limit_rps must be finite and non-negative (got {0})")]
    InvalidRateLimit(f64),
    #[error("backoff_base_ms ({base}) exceeds backoff_max_ms ({max})")]
    BackoffRange { base: u64, max: u64 },
    #[error("environment variable {0} not found")]
    MissingApiKey(String),
    #[error("prompt source {} contains no prompts", .0.display())]
    EmptyPromptSource(PathBuf),
    #[error("prompt id '{0}' appears more than once in the prompt source")]
    DuplicatePromptId(String),
}

/// Failure categories reported by the generation capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RateLimited,
    InvalidModel,
    Timeout,
    TransportError,
    Unknown,
}

impl ErrorKind {
    /// Whether another attempt may succeed without operator action.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimited | ErrorKind::Timeout | ErrorKind::TransportError
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::InvalidModel => "invalid_model",
            ErrorKind::Timeout => "timeout",
            ErrorKind::TransportError => "transport_error",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured failure of a single generation call; persisted as the `error` field of a record.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct CallError {
    pub kind: ErrorKind,
    pub message: String,
}

impl CallError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// A log line that could not be decoded into a record.
#[derive(Debug, Error)]
#[error("{}:{line}: {source}", .path.display())]
pub struct ParseError {
    pub path: PathBuf,
    pub line: usize,
    #[source]
    pub source: serde_json::Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let error = CallError::new(ErrorKind::RateLimited, "slow down");
        let json = serde_json::to_string(&error).unwrap();
        assert_eq!(json, r#"{"kind":"rate_limited","message":"slow down"}"#);
        assert_eq!(error.to_string(), "rate_limited: slow down");
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(ErrorKind::RateLimited.is_retryable());
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(ErrorKind::TransportError.is_retryable());
        assert!(!ErrorKind::InvalidModel.is_retryable());
        assert!(!ErrorKind::Unknown.is_retryable());
    }

    #[test]
    fn test_config_error_messages() {
        let err = ConfigError::BelowMinimum {
            field: "batch_size",
            value: 0,
        };
        assert_eq!(err.to_string(), "batch_size must be at least 1 (got 0)");

        let err = ConfigError::TruncationRequested(PathBuf::from("out/raw.jsonl"));
        assert!(err.to_string().contains("out/raw.jsonl"));
    }
}
