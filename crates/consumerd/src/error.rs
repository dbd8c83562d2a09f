//! Consumerd errors.

use kubecc_core::{LimitsError, ToolchainKind};
use kubecc_run::{RequestError, ToolchainError};
use thiserror::Error;

/// Errors returned to a consumer by [`Consumerd::run`](crate::Consumerd::run)
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConsumerdError {
    /// The request is malformed
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The compiler executable disappeared
    #[error("compiler no longer exists: {0}")]
    NotFound(String),

    /// No controller handles this toolchain kind
    #[error("no toolchain runner available for {0}")]
    NoRunner(ToolchainKind),

    /// The request ran but could not complete
    #[error(transparent)]
    Request(#[from] RequestError),
}

impl From<ToolchainError> for ConsumerdError {
    fn from(e: ToolchainError) -> Self {
        match e {
            ToolchainError::NotFound(path) => ConsumerdError::NotFound(path.display().to_string()),
            ToolchainError::NoRunnerForKind(kind) => ConsumerdError::NoRunner(kind),
            other => ConsumerdError::InvalidArgument(other.to_string()),
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    /// An environment variable could not be parsed
    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },

    #[error(transparent)]
    Limits(#[from] LimitsError),

    /// A setting is out of range
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
