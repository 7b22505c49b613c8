/// Startup and configuration errors for the db-tools crate.
///
/// Anything in here is fatal to the process: these are raised while the
/// registry, configuration or listener are being set up, never while an
/// invocation is in flight.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("duplicate tool: {0}")]
    DuplicateTool(String),

    #[error("invalid schema for tool '{tool}': {message}")]
    InvalidSchema { tool: String, message: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("logging setup failed: {0}")]
    Logging(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using [`CoreError`].
pub type CoreResult<T> = Result<T, CoreError>;

/// Failure reported by a tool handler.
///
/// Handlers return this instead of panicking; the coordinator turns it into an
/// `execution_error` outcome.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    #[error("{0}")]
    Failed(String),

    /// The backing resource is temporarily unavailable; the caller may retry.
    #[error("{message}")]
    Retryable { message: String, retry_after_ms: u64 },
}

impl ToolError {
    pub fn failed(message: impl Into<String>) -> Self {
        ToolError::Failed(message.into())
    }

    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            ToolError::Failed(_) => None,
            ToolError::Retryable { retry_after_ms, .. } => Some(*retry_after_ms),
        }
    }
}
