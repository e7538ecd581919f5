use thiserror::Error;

/// Errors surfaced by the agent's sinks and commands.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Core(#[from] stumbler_core::StumblerError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("sink closed")]
    SinkClosed,
    #[error("line {line}: {reason}")]
    Input { line: usize, reason: String },
}
