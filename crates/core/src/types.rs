//! Request and response types shared by consumerd, scheduler clients and agents.

use crate::toolchain::Toolchain;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// A compiler invocation captured on the originating host
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RunRequest {
    /// Compiler executable as invoked (may be a symlink)
    pub compiler: PathBuf,
    /// Arguments, excluding the executable
    pub args: Vec<String>,
    /// Environment in `KEY=VALUE` form
    pub env: Vec<String>,
    pub work_dir: PathBuf,
    #[serde(default)]
    pub stdin: Vec<u8>,
    pub uid: u32,
    pub gid: u32,
}

/// Outcome of a [`RunRequest`], mirroring what the compiler would have printed
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct RunResponse {
    pub return_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl RunResponse {
    pub fn success(stdout: Vec<u8>, stderr: Vec<u8>) -> Self {
        Self {
            return_code: 0,
            stdout,
            stderr,
        }
    }

    pub fn failure(stdout: Vec<u8>, stderr: Vec<u8>) -> Self {
        Self {
            return_code: 1,
            stdout,
            stderr,
        }
    }
}

/// A preprocessed compile job sent to a remote agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileRequest {
    pub request_id: Uuid,
    /// Toolchain as described by the sender; the agent resolves its own equivalent
    pub toolchain: Toolchain,
    pub args: Vec<String>,
    pub preprocessed_source: Vec<u8>,
}

impl CompileRequest {
    pub fn new(toolchain: Toolchain, args: Vec<String>, preprocessed_source: Vec<u8>) -> Self {
        Self {
            request_id: Uuid::now_v7(),
            toolchain,
            args,
            preprocessed_source,
        }
    }
}

/// Result category reported by the remote side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompileResult {
    Success,
    /// The compiler ran and exited non-zero
    Fail,
    /// The remote could not take the job; see [`RetryAction`]
    Retry,
    InternalError,
}

impl fmt::Display for CompileResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompileResult::Success => "success",
            CompileResult::Fail => "fail",
            CompileResult::Retry => "retry",
            CompileResult::InternalError => "internal_error",
        };
        f.write_str(s)
    }
}

/// Hint attached to a [`CompileResult::Retry`] response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetryAction {
    /// Requeue, the remote may accept later
    #[default]
    Retry,
    /// Stop trying remotely and run on the originating host
    DoNotRetry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileResponse {
    pub request_id: Uuid,
    pub result: CompileResult,
    #[serde(default)]
    pub retry_action: RetryAction,
    /// Object file contents on success
    #[serde(default)]
    pub compiled_source: Vec<u8>,
    /// Compiler diagnostics or an error description
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub cpu_seconds_used: f64,
}

impl CompileResponse {
    pub fn success(request_id: Uuid, compiled_source: Vec<u8>) -> Self {
        Self {
            request_id,
            result: CompileResult::Success,
            retry_action: RetryAction::default(),
            compiled_source,
            error: String::new(),
            cpu_seconds_used: 0.0,
        }
    }

    pub fn fail(request_id: Uuid, error: impl Into<String>) -> Self {
        Self {
            request_id,
            result: CompileResult::Fail,
            retry_action: RetryAction::default(),
            compiled_source: Vec::new(),
            error: error.into(),
            cpu_seconds_used: 0.0,
        }
    }

    pub fn retry(request_id: Uuid, action: RetryAction) -> Self {
        Self {
            request_id,
            result: CompileResult::Retry,
            retry_action: action,
            compiled_source: Vec::new(),
            error: String::new(),
            cpu_seconds_used: 0.0,
        }
    }

    pub fn internal_error(request_id: Uuid, error: impl Into<String>) -> Self {
        Self {
            request_id,
            result: CompileResult::InternalError,
            retry_action: RetryAction::DoNotRetry,
            compiled_source: Vec::new(),
            error: error.into(),
            cpu_seconds_used: 0.0,
        }
    }

    pub fn with_cpu_seconds(mut self, seconds: f64) -> Self {
        self.cpu_seconds_used = seconds;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_response_constructors() {
        let id = Uuid::now_v7();
        let ok = CompileResponse::success(id, b"obj".to_vec());
        assert_eq!(ok.result, CompileResult::Success);
        assert_eq!(ok.compiled_source, b"obj");

        let retry = CompileResponse::retry(id, RetryAction::DoNotRetry);
        assert_eq!(retry.result, CompileResult::Retry);
        assert_eq!(retry.retry_action, RetryAction::DoNotRetry);
    }

    #[test]
    fn test_compile_response_defaults_on_deserialize() {
        let id = Uuid::now_v7();
        let json = format!(r#"{{"request_id":"{}","result":"retry"}}"#, id);
        let resp: CompileResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(resp.retry_action, RetryAction::Retry);
        assert!(resp.compiled_source.is_empty());
    }
}
