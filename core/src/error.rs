use crate::session::SessionId;
use crate::traits::ParamType;
use thiserror::Error;

/// Error raised by a tool, classified by the tool itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    /// Retrying with different arguments or another capability may succeed.
    #[error("{0}")]
    Recoverable(String),
    /// Internal fault such as an unreachable datastore.
    #[error("{0}")]
    Fatal(String),
}

impl ToolError {
    pub fn recoverable(message: impl Into<String>) -> Self {
        Self::Recoverable(message.into())
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Recoverable(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("capability '{0}' is already registered")]
    DuplicateCapability(String),
    #[error("unknown capability: {0}")]
    UnknownCapability(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing required parameter '{parameter}' for {capability}")]
    MissingParameter {
        capability: String,
        parameter: String,
    },
    #[error("parameter '{parameter}' of {capability} expects {expected}, got {actual}")]
    WrongType {
        capability: String,
        parameter: String,
        expected: ParamType,
        actual: &'static str,
    },
    #[error("unexpected parameter '{parameter}' for {capability}")]
    UnexpectedParameter {
        capability: String,
        parameter: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReasoningServiceError {
    #[error("reasoning service request failed: {0}")]
    Transport(String),
    #[error("reasoning service returned a malformed response: {0}")]
    Malformed(String),
    #[error("reasoning service returned an empty response")]
    Empty,
}

/// Terminal failure of one query. The session stays usable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Reasoning(#[from] ReasoningServiceError),
    #[error("step {step} ({capability}) failed: {reason}")]
    ToolFailed {
        capability: String,
        step: usize,
        reason: String,
    },
    #[error(
        "step budget exceeded after {iterations} iterations: the plan still requested '{capability}'"
    )]
    StepBudgetExceeded {
        iterations: usize,
        capability: String,
    },
    #[error("query cancelled after {iterations} iterations")]
    Cancelled { iterations: usize },
    #[error("unknown session: {0}")]
    UnknownSession(SessionId),
}
