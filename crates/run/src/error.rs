//! Error types for task execution, request processing and toolchain lookup.

use kubecc_core::ToolchainKind;
use std::path::PathBuf;
use thiserror::Error;

/// Result of running a single task
pub type RunResult<T> = std::result::Result<T, RunError>;

/// Errors produced by a [`Runner`](crate::task::Runner)
///
/// Cloneable so a task can cache its result and hand it out more than once.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RunError {
    /// The toolchain process exited non-zero
    #[error("compiler exited with code {code}")]
    Compiler {
        code: i32,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },

    /// The client context was cancelled
    #[error("task cancelled")]
    Cancelled,

    /// The process could not be started
    #[error("failed to spawn process: {0}")]
    Spawn(String),

    /// Filesystem or pipe error around the process
    #[error("I/O error: {0}")]
    Io(String),

    /// Anything else that indicates a bug or malformed input
    #[error("internal error: {0}")]
    Internal(String),
}

impl RunError {
    pub fn is_compiler_error(&self) -> bool {
        matches!(self, RunError::Compiler { .. })
    }
}

impl From<std::io::Error> for RunError {
    fn from(e: std::io::Error) -> Self {
        RunError::Io(e.to_string())
    }
}

/// Errors returned by a remote peer client
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClientError {
    /// No connection to the remote peer
    #[error("remote unavailable: {0}")]
    Unavailable(String),

    /// The remote refused the request without a retry hint
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The request failed in transit
    #[error("transport error: {0}")]
    Transport(String),

    /// The client context was cancelled
    #[error("request cancelled")]
    Cancelled,
}

/// Errors returned by a [`RequestManager`](crate::request::RequestManager)
///
/// A compiler failure is not an error at this level; it is encoded in the
/// response. These errors mean the request could not be completed at all.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RequestError {
    /// Remote peer unreachable or rejected the request
    #[error(transparent)]
    Transport(#[from] ClientError),

    /// No agents could take the request right now; requeue it
    #[error("no agents available, retrying")]
    NoAgentsRetry,

    /// No agents could take the request; run it on this host instead
    #[error("no agents available, running locally")]
    NoAgentsRunLocal,

    /// The request itself is malformed
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Toolchain mismatch, missing runner or other bug
    #[error("internal error: {0}")]
    Internal(String),

    /// The client context was cancelled
    #[error("request cancelled")]
    Cancelled,
}

impl RequestError {
    /// Whether the request should be resubmitted to the split queue.
    pub fn is_retryable(&self) -> bool {
        match self {
            RequestError::NoAgentsRetry => true,
            RequestError::Transport(ClientError::Cancelled) => false,
            RequestError::Transport(_) => true,
            _ => false,
        }
    }

    /// Whether the remote asked for this request to run on the originating host.
    pub fn forces_local(&self) -> bool {
        matches!(self, RequestError::NoAgentsRunLocal)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        RequestError::Internal(msg.into())
    }
}

impl From<RunError> for RequestError {
    fn from(e: RunError) -> Self {
        match e {
            RunError::Cancelled => RequestError::Cancelled,
            other => RequestError::Internal(other.to_string()),
        }
    }
}

impl From<ToolchainError> for RequestError {
    fn from(e: ToolchainError) -> Self {
        RequestError::Internal(e.to_string())
    }
}

/// Errors from the toolchain store and runner registry
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ToolchainError {
    /// No toolchain registered for this path
    #[error("toolchain not found: {}", .0.display())]
    NotFound(PathBuf),

    /// A toolchain with this path is already in the store
    #[error("toolchain already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    /// No local toolchain is equivalent to the remote one
    #[error("no matching toolchain for {0}")]
    NoMatch(String),

    /// Querying the compiler for its properties failed
    #[error("failed to query {}: {message}", path.display())]
    Query { path: PathBuf, message: String },

    /// No controller registered for this toolchain kind
    #[error("no runner for toolchain kind {0}")]
    NoRunnerForKind(ToolchainKind),
}
