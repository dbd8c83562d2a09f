// Kubecc Task Execution Engine
//
// Runs compile tasks on this host or hands them to a remote peer.
//
// Key design decisions:
// - A task is single-shot: the runner executes once and its result is cached
// - Worker pools pull from their source only when a worker is idle
// - The queued executor bounds local concurrency; the unqueued one never waits
// - Per-toolchain behavior lives behind ToolchainController, selected by kind

pub mod client;
pub mod error;
pub mod executor;
pub mod process;
pub mod request;
pub mod task;
pub mod toolchain;
pub mod worker;

// Re-export main types
pub use client::SchedulerClient;
pub use error::{ClientError, RequestError, RunError, RunResult, ToolchainError};
pub use executor::{Executor, QueuedExecutor, UnqueuedExecutor};
pub use process::{run_process, ExecRunner, ProcessOptions};
pub use request::{CompileManager, PackagedRequest, RequestManager, RequestResult, RunManager};
pub use task::{Runner, Task, TaskOutput};
pub use toolchain::{
    check_remote_response, ArgParser, ExecutorSet, Querier, RemoteCompileRunner, RunMode, StaticQuerier,
    ToolchainController, ToolchainRunnerStore, ToolchainStore,
};
pub use worker::{MergedSource, PauseController, SharedReceiver, TaskSource, WorkerPool, WorkerPoolOptions};
