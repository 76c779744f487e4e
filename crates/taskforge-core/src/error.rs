//! Error taxonomy for the orchestrator core.
//!
//! Each variant corresponds to one of the nine error classes in the design:
//! validation, not-found, state-machine violation, provider failure, tool
//! failure, timeout, cancellation, store failure, and internal invariant
//! violation.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("invalid transition for task {task_id}: {from:?} -> {to:?}")]
    InvalidTransition {
        task_id: u64,
        from: String,
        to: String,
    },

    #[error("provider failure: {0}")]
    Provider(#[from] taskforge_llm::LlmError),

    #[error("tool '{name}' failed: {message}")]
    ToolFailed { name: String, message: String },

    #[error("timeout")]
    Timeout,

    #[error("cancelled")]
    Cancelled,

    #[error("store failure: {0}")]
    Store(String),

    #[error("internal invariant violation: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn tool_failed(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolFailed {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
