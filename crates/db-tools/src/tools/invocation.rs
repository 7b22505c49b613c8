//! Invocations, their lifecycle states, and the per-invocation log record.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::outcome::{FailureKind, Outcome};

/// One request to execute a specific tool with specific arguments.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Identifier used to correlate log lines and the response.
    pub correlation_id: String,
    /// Name of the tool being invoked.
    pub tool: String,
    /// Raw argument payload, validated against the tool's input schema.
    pub arguments: serde_json::Value,
    /// When the request arrived.
    pub received_at: DateTime<Utc>,
}

impl Invocation {
    pub fn new(tool: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            correlation_id: new_correlation_id(),
            tool: tool.into(),
            arguments,
            received_at: Utc::now(),
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }
}

/// Time-ordered correlation id for requests that did not bring their own.
pub fn new_correlation_id() -> String {
    Uuid::now_v7().to_string()
}

/// Lifecycle of an invocation.
///
/// `received -> validating -> (rejected | queued) -> executing -> (succeeded | failed | timed_out)`.
/// A queued invocation that is refused a slot ends as `rejected`. Any
/// non-terminal state moves to `cancelled` when the caller stops waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationState {
    Received,
    Validating,
    Rejected,
    Queued,
    Executing,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl InvocationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InvocationState::Rejected
                | InvocationState::Succeeded
                | InvocationState::Failed
                | InvocationState::TimedOut
                | InvocationState::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: InvocationState) -> bool {
        use InvocationState::*;
        matches!(
            (self, next),
            (Received, Validating)
                | (Validating, Rejected)
                | (Validating, Queued)
                | (Queued, Rejected)
                | (Queued, Executing)
                | (Executing, Succeeded)
                | (Executing, Failed)
                | (Executing, TimedOut)
                | (Received | Validating | Queued | Executing, Cancelled)
        )
    }

    /// Move to `next`, logging the transition. Illegal transitions are a bug
    /// in the pipeline and trip a debug assertion.
    pub fn advance(&mut self, next: InvocationState) {
        debug_assert!(
            self.can_transition_to(next),
            "illegal invocation transition {self:?} -> {next:?}"
        );
        tracing::trace!(from = ?self, to = ?next, "invocation state");
        *self = next;
    }

    /// Close out the lifecycle once the outcome is known.
    pub(crate) fn advance_to_terminal(&mut self, terminal: InvocationState) {
        if *self != terminal {
            self.advance(terminal);
        }
    }

    /// Terminal state reached by an invocation that produced `outcome`.
    pub fn terminal_for(outcome: &Outcome) -> InvocationState {
        match outcome.failure_kind() {
            None => InvocationState::Succeeded,
            Some(FailureKind::Timeout) => InvocationState::TimedOut,
            Some(FailureKind::ExecutionError | FailureKind::InternalFault) => {
                InvocationState::Failed
            }
            Some(
                FailureKind::DecodeError
                | FailureKind::UnknownTool
                | FailureKind::ValidationError
                | FailureKind::Backpressure,
            ) => InvocationState::Rejected,
        }
    }
}

/// Summary of a finished invocation, emitted to the log sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationRecord {
    pub correlation_id: String,
    pub tool: String,
    pub received_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub state: InvocationState,
    pub failure: Option<FailureKind>,
}

impl InvocationRecord {
    pub fn new(invocation: &Invocation, elapsed: Duration, outcome: &Outcome) -> Self {
        Self {
            correlation_id: invocation.correlation_id.clone(),
            tool: invocation.tool.clone(),
            received_at: invocation.received_at,
            duration_ms: elapsed.as_millis() as u64,
            state: InvocationState::terminal_for(outcome),
            failure: outcome.failure_kind(),
        }
    }

    /// Record for an invocation abandoned before it produced an outcome.
    pub fn cancelled(invocation: &Invocation, elapsed: Duration) -> Self {
        Self {
            correlation_id: invocation.correlation_id.clone(),
            tool: invocation.tool.clone(),
            received_at: invocation.received_at,
            duration_ms: elapsed.as_millis() as u64,
            state: InvocationState::Cancelled,
            failure: None,
        }
    }

    pub fn status(&self) -> &'static str {
        match (self.state, self.failure) {
            (InvocationState::Cancelled, _) => "cancelled",
            (_, Some(kind)) => kind.as_str(),
            (_, None) => "succeeded",
        }
    }

    pub fn log(&self) {
        if self.state == InvocationState::Succeeded {
            tracing::info!(
                correlation_id = %self.correlation_id,
                tool = %self.tool,
                status = self.status(),
                duration_ms = self.duration_ms,
                "invocation finished"
            );
        } else {
            tracing::warn!(
                correlation_id = %self.correlation_id,
                tool = %self.tool,
                status = self.status(),
                duration_ms = self.duration_ms,
                "invocation finished"
            );
        }
    }
}
