use thiserror::Error;

/// Errors raised by individual tools. These never end a turn: the dispatcher
/// turns them into observation text for the model.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Invalid IANA timezone string: {0}")]
    InvalidTimezone(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Only single-line expressions are allowed...")]
    NotSingleExpression,

    #[error("Command timed out after {0:?}")]
    CommandTimeout(std::time::Duration),

    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ToolError {
    pub fn invalid_timezone(timezone: impl Into<String>) -> Self {
        Self::InvalidTimezone(timezone.into())
    }

    pub fn invalid_arguments(msg: impl Into<String>) -> Self {
        Self::InvalidArguments(msg.into())
    }

    pub fn command_failed(msg: impl Into<String>) -> Self {
        Self::CommandFailed(msg.into())
    }
}

/// Failures talking to the completion backend
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Could not decode stream event: {0}")]
    Decode(String),
}

/// Errors that abort the current user turn but leave the session running
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("Protocol error: {event} received for output position {position} with no pending function call")]
    Protocol { position: usize, event: &'static str },

    #[error("Unknown tool requested: {0}")]
    UnknownTool(String),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("Response failed: {0}")]
    ResponseFailed(String),

    #[error("Response stream ended before completion ({pending} unfinished tool calls)")]
    Truncated { pending: usize },
}

impl TurnError {
    pub fn protocol(position: usize, event: &'static str) -> Self {
        Self::Protocol { position, event }
    }
}
