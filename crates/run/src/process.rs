//! Child process execution.
//!
//! [`run_process`] spawns a toolchain executable, feeds it stdin, collects
//! its output and kills it if the client context is cancelled.

use crate::error::{RunError, RunResult};
use crate::task::{Runner, TaskOutput};
use async_trait::async_trait;
use kubecc_core::{Contexts, RunRequest, Toolchain};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, trace};

/// How to launch a child process
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    pub args: Vec<String>,
    /// Environment in `KEY=VALUE` form; replaces the inherited environment when non-empty
    pub env: Vec<String>,
    pub work_dir: Option<PathBuf>,
    pub stdin: Vec<u8>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

impl ProcessOptions {
    pub fn new(args: Vec<String>) -> Self {
        Self {
            args,
            ..Default::default()
        }
    }

    /// Options matching the caller's environment, working directory and credentials.
    pub fn from_request(req: &RunRequest) -> Self {
        Self {
            args: req.args.clone(),
            env: req.env.clone(),
            work_dir: Some(req.work_dir.clone()).filter(|p| !p.as_os_str().is_empty()),
            stdin: req.stdin.clone(),
            uid: Some(req.uid).filter(|id| *id != 0),
            gid: Some(req.gid).filter(|id| *id != 0),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_env(mut self, env: Vec<String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    pub fn with_stdin(mut self, stdin: Vec<u8>) -> Self {
        self.stdin = stdin;
        self
    }

    pub fn with_uid_gid(mut self, uid: u32, gid: u32) -> Self {
        self.uid = Some(uid);
        self.gid = Some(gid);
        self
    }
}

/// Runs `program` to completion.
///
/// A non-zero exit becomes [`RunError::Compiler`] carrying the captured
/// output. Cancelling the client context kills the child.
pub async fn run_process(
    ctx: &Contexts,
    program: &Path,
    options: &ProcessOptions,
) -> RunResult<TaskOutput> {
    trace!(program = %program.display(), args = ?options.args, "spawn");

    let mut cmd = Command::new(program);
    cmd.args(&options.args)
        .stdin(if options.stdin.is_empty() {
            Stdio::null()
        } else {
            Stdio::piped()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if !options.env.is_empty() {
        cmd.env_clear();
        for (key, value) in options.env.iter().filter_map(|kv| kv.split_once('=')) {
            cmd.env(key, value);
        }
    }
    if let Some(dir) = &options.work_dir {
        cmd.current_dir(dir);
    }
    #[cfg(unix)]
    {
        if let Some(uid) = options.uid {
            cmd.uid(uid);
        }
        if let Some(gid) = options.gid {
            cmd.gid(gid);
        }
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| RunError::Spawn(format!("{}: {e}", program.display())))?;

    if let Some(mut stdin) = child.stdin.take() {
        let input = options.stdin.clone();
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(&input).await {
                debug!(error = %e, "Failed to write process stdin");
            }
        });
    }

    let output = tokio::select! {
        biased;
        _ = ctx.client.cancelled() => {
            debug!(program = %program.display(), "cancelled; killing child");
            return Err(RunError::Cancelled);
        }
        output = child.wait_with_output() => output?,
    };

    if output.status.success() {
        Ok(TaskOutput::new(output.stdout, output.stderr))
    } else {
        Err(RunError::Compiler {
            code: output.status.code().unwrap_or(-1),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

/// Runs the task's toolchain executable with fixed options
#[derive(Debug, Clone)]
pub struct ExecRunner {
    options: ProcessOptions,
}

impl ExecRunner {
    pub fn new(options: ProcessOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Runner for ExecRunner {
    async fn run(&self, ctx: &Contexts, toolchain: &Toolchain) -> RunResult<TaskOutput> {
        run_process(ctx, &toolchain.executable, &self.options).await
    }

    fn name(&self) -> &'static str {
        "exec"
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use kubecc_core::{Component, ServerContext, ToolchainKind};
    use std::time::Duration;

    fn contexts() -> Contexts {
        Contexts::for_request(&ServerContext::new(Component::Test))
    }

    #[tokio::test]
    async fn test_captures_stdout() {
        let out = run_process(
            &contexts(),
            Path::new("/bin/sh"),
            &ProcessOptions::new(vec!["-c".into(), "echo hello; echo oops >&2".into()]),
        )
        .await
        .unwrap();
        assert_eq!(out.stdout, b"hello\n");
        assert_eq!(out.stderr, b"oops\n");
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_compiler_error() {
        let err = run_process(
            &contexts(),
            Path::new("/bin/sh"),
            &ProcessOptions::new(vec!["-c".into(), "echo bad >&2; exit 3".into()]),
        )
        .await
        .unwrap_err();
        match err {
            RunError::Compiler { code, stderr, .. } => {
                assert_eq!(code, 3);
                assert_eq!(stderr, b"bad\n");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stdin_and_work_dir() {
        let dir = tempfile::tempdir().unwrap();
        let options = ProcessOptions::new(vec!["-c".into(), "cat; pwd".into()])
            .with_stdin(b"piped\n".to_vec())
            .with_work_dir(dir.path());
        let out = run_process(&contexts(), Path::new("/bin/sh"), &options)
            .await
            .unwrap();
        let stdout = String::from_utf8(out.stdout).unwrap();
        assert!(stdout.starts_with("piped\n"));
        let canonical = dir.path().canonicalize().unwrap();
        assert!(stdout.trim_end().ends_with(canonical.file_name().unwrap().to_str().unwrap()));
    }

    #[tokio::test]
    async fn test_cancel_kills_child() {
        let ctx = contexts();
        let client = ctx.client.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            client.cancel();
        });
        let started = std::time::Instant::now();
        let err = run_process(
            &ctx,
            Path::new("/bin/sh"),
            &ProcessOptions::new(vec!["-c".into(), "sleep 30".into()]),
        )
        .await
        .unwrap_err();
        assert_eq!(err, RunError::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_exec_runner_uses_toolchain_executable() {
        let task = crate::task::Task::new(
            contexts(),
            Toolchain::new("/bin/echo", ToolchainKind::Unknown),
            ExecRunner::new(ProcessOptions::new(vec!["compiled".into()])),
        );
        let out = task.run().await.unwrap();
        assert_eq!(out.stdout, b"compiled\n");
    }

    #[test]
    fn test_from_request_skips_root_credentials() {
        let req = RunRequest {
            compiler: "/usr/bin/gcc".into(),
            args: vec!["-c".into()],
            uid: 0,
            gid: 0,
            ..Default::default()
        };
        let options = ProcessOptions::from_request(&req);
        assert!(options.uid.is_none());
        assert!(options.gid.is_none());
        assert!(options.work_dir.is_none());
    }
}
