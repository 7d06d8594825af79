//! Error codes and their classification.
//!
//! Codes are grouped the way they are surfaced:
//! - admission: returned synchronously from `submit`/`retry`/`retrieve`, never persisted
//! - execution: persisted on a `failed` job and always notified
//! - retrieval: returned through a retrieval ticket

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable, wire-visible error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // admission
    Paused,
    ShuttingDown,
    DuplicateInFlight,
    BacklogFull,
    InvalidRequest,
    NotRetryable,
    PayloadMissing,
    RateLimitExceeded,
    QueueFull,

    // execution
    GatewayDisabled,
    GatewayUnhealthy,
    GatewayUnavailable,
    Timeout,
    InternalError,

    // retrieval
    RetrievalTimeout,
    RetrievalFailed,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Paused => "PAUSED",
            ErrorCode::ShuttingDown => "SHUTTING_DOWN",
            ErrorCode::DuplicateInFlight => "DUPLICATE_IN_FLIGHT",
            ErrorCode::BacklogFull => "BACKLOG_FULL",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::NotRetryable => "NOT_RETRYABLE",
            ErrorCode::PayloadMissing => "PAYLOAD_MISSING",
            ErrorCode::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ErrorCode::QueueFull => "QUEUE_FULL",
            ErrorCode::GatewayDisabled => "GATEWAY_DISABLED",
            ErrorCode::GatewayUnhealthy => "GATEWAY_UNHEALTHY",
            ErrorCode::GatewayUnavailable => "GATEWAY_UNAVAILABLE",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::RetrievalTimeout => "RETRIEVAL_TIMEOUT",
            ErrorCode::RetrievalFailed => "RETRIEVAL_FAILED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by the worker gateway contract.
///
/// `code` is a free-form string: the worker may report its own codes, which
/// are propagated onto the failed job unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct GatewayError {
    pub code: String,
    pub message: String,
}

impl GatewayError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn from_code(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(code.as_str(), message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::from_code(ErrorCode::Timeout, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::from_code(ErrorCode::GatewayUnavailable, message)
    }

    /// Timeout-flavored failures: our own `TIMEOUT` plus anything the worker
    /// reports with "TIMEOUT"/"TIMED_OUT" in its code.
    pub fn is_timeout(&self) -> bool {
        let code = self.code.to_ascii_uppercase();
        code.contains("TIMEOUT") || code.contains("TIMED_OUT")
    }
}

/// User-facing remediation hint stored on a failed job.
pub fn remediation_for(code: &str) -> &'static str {
    match code {
        "GATEWAY_DISABLED" => "Enable the memory worker in settings, then retry.",
        "GATEWAY_UNHEALTHY" => "The memory worker is not responding. Restart it, then retry.",
        "GATEWAY_UNAVAILABLE" => {
            "The memory worker process is not running. Restart the session, then retry."
        }
        "INTERNAL_ERROR" => "An unexpected scheduler error occurred. Check the logs, then retry.",
        c if c.contains("TIMEOUT") || c.contains("TIMED_OUT") => {
            "Graph construction took too long. Retry, or split the summary into smaller parts."
        }
        _ => "The knowledge-graph engine rejected the summary. Check the logs, then retry.",
    }
}
