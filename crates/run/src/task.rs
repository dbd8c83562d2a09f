//! Tasks and runners.
//!
//! A [`Task`] pairs the request's [`Contexts`] with a [`Runner`] and the
//! toolchain it targets. Running a task is single-shot: the first call to
//! [`Task::run`] executes the runner, later calls return the cached result.

use crate::error::{RunError, RunResult};
use async_trait::async_trait;
use kubecc_core::{CompileResponse, Contexts, Toolchain};
use std::fmt;
use tokio::sync::OnceCell;
use uuid::Uuid;

/// Captured output of a finished task
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Set by tasks that wait on a remote compile
    pub response: Option<CompileResponse>,
}

impl TaskOutput {
    pub fn new(stdout: Vec<u8>, stderr: Vec<u8>) -> Self {
        Self {
            stdout,
            stderr,
            response: None,
        }
    }

    pub fn from_response(response: CompileResponse) -> Self {
        Self {
            response: Some(response),
            ..Default::default()
        }
    }
}

/// The work a task performs
///
/// Implementations are expected to observe `ctx.client` and stop early
/// (killing any child process) when it is cancelled.
#[async_trait]
pub trait Runner: Send + Sync {
    async fn run(&self, ctx: &Contexts, toolchain: &Toolchain) -> RunResult<TaskOutput>;

    /// Short label for logs
    fn name(&self) -> &'static str {
        "task"
    }
}

/// A single runnable unit of work
pub struct Task {
    id: Uuid,
    contexts: Contexts,
    toolchain: Toolchain,
    runner: Box<dyn Runner>,
    result: OnceCell<RunResult<TaskOutput>>,
}

impl Task {
    pub fn new(contexts: Contexts, toolchain: Toolchain, runner: impl Runner + 'static) -> Self {
        Self::from_boxed(contexts, toolchain, Box::new(runner))
    }

    pub fn from_boxed(contexts: Contexts, toolchain: Toolchain, runner: Box<dyn Runner>) -> Self {
        Self {
            id: Uuid::now_v7(),
            contexts,
            toolchain,
            runner,
            result: OnceCell::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn contexts(&self) -> &Contexts {
        &self.contexts
    }

    pub fn toolchain(&self) -> &Toolchain {
        &self.toolchain
    }

    pub fn name(&self) -> &'static str {
        self.runner.name()
    }

    /// Runs the task, or returns the cached result if it already ran.
    ///
    /// Cancelling the client context resolves the task with
    /// [`RunError::Cancelled`] and drops the runner future.
    pub async fn run(&self) -> RunResult<TaskOutput> {
        self.result
            .get_or_init(|| async {
                let client = self.contexts.client.token();
                tokio::select! {
                    biased;
                    _ = client.cancelled() => Err(RunError::Cancelled),
                    result = self.runner.run(&self.contexts, &self.toolchain) => result,
                }
            })
            .await
            .clone()
    }

    pub fn is_done(&self) -> bool {
        self.result.initialized()
    }

    /// Result of a completed task.
    ///
    /// # Panics
    ///
    /// Panics if the task has not finished running.
    pub fn result(&self) -> RunResult<TaskOutput> {
        match self.result.get() {
            Some(result) => result.clone(),
            None => panic!("result of task {} read before it completed", self.id),
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("runner", &self.runner.name())
            .field("toolchain", &self.toolchain.executable)
            .field("done", &self.is_done())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubecc_core::{Component, ServerContext, ToolchainKind};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct CountingRunner {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Runner for CountingRunner {
        async fn run(&self, _ctx: &Contexts, _tc: &Toolchain) -> RunResult<TaskOutput> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(TaskOutput::new(format!("run {n}").into_bytes(), Vec::new()))
        }
    }

    struct HangingRunner;

    #[async_trait]
    impl Runner for HangingRunner {
        async fn run(&self, _ctx: &Contexts, _tc: &Toolchain) -> RunResult<TaskOutput> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(TaskOutput::default())
        }
    }

    fn contexts() -> Contexts {
        Contexts::for_request(&ServerContext::new(Component::Test))
    }

    #[tokio::test]
    async fn test_run_is_single_shot() {
        let calls = Arc::new(AtomicUsize::new(0));
        let task = Task::new(
            contexts(),
            Toolchain::new("/bin/true", ToolchainKind::Sleep),
            CountingRunner {
                calls: calls.clone(),
            },
        );

        let first = task.run().await.unwrap();
        let second = task.run().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(task.result().unwrap(), first);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_resolves_task() {
        let ctx = contexts();
        let client = ctx.client.clone();
        let task = Task::new(ctx, Toolchain::default(), HangingRunner);

        client.cancel();
        assert_eq!(task.run().await, Err(RunError::Cancelled));
        assert!(task.is_done());
    }

    #[test]
    #[should_panic(expected = "read before it completed")]
    fn test_result_before_run_panics() {
        let task = Task::new(contexts(), Toolchain::default(), HangingRunner);
        let _ = task.result();
    }
}
