//! Terminal result of an invocation.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::ToolError;

use super::validator::SchemaError;

/// Retry hint attached to backpressure rejections.
pub const BACKPRESSURE_RETRY_AFTER_MS: u64 = 1_000;

/// Failure taxonomy shared by the coordinator and the HTTP layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Request could not be decoded into an invocation.
    DecodeError,
    /// Tool name is not registered.
    UnknownTool,
    /// Arguments violate the tool's input schema.
    ValidationError,
    /// Handler reported a failure.
    ExecutionError,
    /// Handler panicked or was torn down unexpectedly.
    InternalFault,
    /// Handler exceeded its allotted time.
    Timeout,
    /// Concurrency or queue limits exceeded.
    Backpressure,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::DecodeError => "decode_error",
            FailureKind::UnknownTool => "unknown_tool",
            FailureKind::ValidationError => "validation_error",
            FailureKind::ExecutionError => "execution_error",
            FailureKind::InternalFault => "internal_fault",
            FailureKind::Timeout => "timeout",
            FailureKind::Backpressure => "backpressure",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure record: kind, human-readable message and optional retry hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
    pub retry_after_ms: Option<u64>,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after_ms: None,
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(FailureKind::DecodeError, message)
    }

    pub fn unknown_tool(name: &str) -> Self {
        Self::new(FailureKind::UnknownTool, format!("unknown tool: '{name}'"))
    }

    pub fn validation(error: &SchemaError) -> Self {
        Self::new(FailureKind::ValidationError, error.to_string())
    }

    pub fn execution(tool: &str, error: &ToolError) -> Self {
        Self {
            kind: FailureKind::ExecutionError,
            message: format!("tool '{tool}' failed: {error}"),
            retry_after_ms: error.retry_after_ms(),
        }
    }

    pub fn internal_fault(tool: &str, detail: &str) -> Self {
        Self::new(
            FailureKind::InternalFault,
            format!("tool '{tool}' faulted: {detail}"),
        )
    }

    pub fn timeout(tool: &str, limit: Duration) -> Self {
        Self::new(
            FailureKind::Timeout,
            format!("tool '{tool}' timed out after {}ms", limit.as_millis()),
        )
    }

    pub fn backpressure(scope: &str) -> Self {
        Self {
            kind: FailureKind::Backpressure,
            message: format!("too many pending invocations for {scope}"),
            retry_after_ms: Some(BACKPRESSURE_RETRY_AFTER_MS),
        }
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Exactly one of these is produced per accepted invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(serde_json::Value),
    Failure(Failure),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Failure(failure) => Some(failure.kind),
        }
    }
}

impl From<Failure> for Outcome {
    fn from(failure: Failure) -> Self {
        Outcome::Failure(failure)
    }
}
