//! Agent errors.

use kubecc_core::{LimitsError, ToolchainKind};
use kubecc_run::{RequestError, ToolchainError};
use thiserror::Error;

/// Errors returned to the scheduler by [`Agent::compile`](crate::Agent::compile)
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AgentError {
    /// The request names a toolchain this host does not have, or is malformed
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no toolchain runner available for {0}")]
    NoRunner(ToolchainKind),

    #[error(transparent)]
    Request(#[from] RequestError),
}

impl From<ToolchainError> for AgentError {
    fn from(e: ToolchainError) -> Self {
        match e {
            ToolchainError::NoRunnerForKind(kind) => AgentError::NoRunner(kind),
            other => AgentError::InvalidArgument(other.to_string()),
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },

    #[error(transparent)]
    Limits(#[from] LimitsError),
}
