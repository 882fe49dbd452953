use agent_protocol::ModelError;
use thiserror::Error;

/// Failures that end a run without being turned into a user-visible notice.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgentError {
    #[error("agent loop has been terminated")]
    Terminated,
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("Invalid action type: {0}")]
    InvalidActionType(String),
}
