use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    Transient,
    Permanent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentErrorKind {
    IterationLimit,
    InvalidResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeErrorKind {
    Conflict,
    Other,
}

/// Closed set of error kinds (spec.md §7). Every public fallible API in
/// CortexOS returns `Result<T, CortexError>`.
#[derive(Debug, Error, Clone)]
pub enum CortexError {
    #[error("config error: {0}")]
    Config(String),

    #[error("provider error ({kind:?}): {message}")]
    Provider {
        kind: ProviderErrorKind,
        message: String,
    },

    #[error("budget exceeded: {budget} total {spent:.4} would exceed limit {limit:.4}")]
    Budget {
        budget: String,
        spent: f64,
        limit: f64,
    },

    #[error("tool `{tool}` failed: {message}")]
    Tool { tool: String, message: String },

    #[error("memory error: {0}")]
    Memory(String),

    #[error("quality gate failed: {0}")]
    Quality(String),

    #[error("agent error ({kind:?}): {message}")]
    Agent {
        kind: AgentErrorKind,
        message: String,
    },

    #[error("merge error ({kind:?}): {message}")]
    Merge {
        kind: MergeErrorKind,
        message: String,
    },

    #[error("cancelled")]
    Cancelled,

    #[error("timed out after {0}ms")]
    Timeout(u64),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CortexError {
    pub fn internal(message: impl Into<String>) -> Self {
        CortexError::Internal(message.into())
    }
}

impl From<anyhow::Error> for CortexError {
    fn from(err: anyhow::Error) -> Self {
        CortexError::Internal(err.to_string())
    }
}
