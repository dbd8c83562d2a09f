//! Toolchain controllers
//!
//! This module provides:
//! - [`ArgParser`] - Parsed command line of one invocation, with the local/remote eligibility decision
//! - [`ToolchainController`] - Per toolchain kind factory for the three request managers
//! - [`ToolchainRunnerStore`] - Registry mapping a [`ToolchainKind`](kubecc_core::ToolchainKind) to its controller
//! - [`ToolchainStore`] - Compilers known on this host
//! - [`sleep`] - A toolchain that only sleeps, for exercising the queues
//!
//! # Roles
//!
//! ```text
//!  consumerd                          agent
//!  ─────────                          ─────
//!  run_local   ──► local executor
//!  send_remote ──► remote executor ──► scheduler ──► recv_remote ──► agent executor
//! ```

mod registry;
mod remote;
pub mod sleep;
mod store;

pub use registry::ToolchainRunnerStore;
pub use remote::{check_remote_response, RemoteCompileRunner};
pub use store::{Querier, StaticQuerier, ToolchainStore};

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use kubecc_core::Toolchain;

use crate::client::SchedulerClient;
use crate::executor::Executor;
use crate::request::{CompileManager, RunManager};

/// Where a single request runs, decided once before dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RunMode {
    #[default]
    Unset,
    RunLocal,
    RunRemote,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunMode::Unset => "RunError",
            RunMode::RunLocal => "RunLocal",
            RunMode::RunRemote => "RunRemote",
        };
        f.write_str(s)
    }
}

/// Parsed command line of a single toolchain invocation
pub trait ArgParser: Send + Sync + fmt::Debug {
    /// Parses the raw arguments. Called once before any other method.
    fn parse(&mut self);

    /// Whether the invocation may be shipped to a remote agent.
    fn can_run_remote(&self) -> bool;

    /// Current (possibly rewritten) arguments
    fn args(&self) -> &[String];

    fn box_clone(&self) -> Box<dyn ArgParser>;

    /// Access to the concrete parser, for controllers that produced it.
    fn as_any(&self) -> &dyn Any;
}

impl Clone for Box<dyn ArgParser> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

/// The executors a controller hands its tasks to
#[derive(Clone)]
pub struct ExecutorSet {
    /// Bounded by local CPU; runs local and received work
    pub local: Arc<dyn Executor>,
    /// Unbounded; runs the round trip to a remote peer
    pub remote: Arc<dyn Executor>,
}

impl ExecutorSet {
    pub fn new(local: Arc<dyn Executor>, remote: Arc<dyn Executor>) -> Self {
        Self { local, remote }
    }
}

impl fmt::Debug for ExecutorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorSet")
            .field("local", &self.local.status())
            .field("remote", &self.remote.status())
            .finish()
    }
}

/// Produces request managers for one toolchain kind
///
/// Which manager is used depends on where the request is in the pipeline:
/// the originating host runs it locally or sends it, the agent receives it.
pub trait ToolchainController: Send + Sync {
    /// Creates an unparsed argument parser for `args`.
    fn new_arg_parser(&self, args: &[String]) -> Box<dyn ArgParser>;

    /// Manager that runs the request entirely on this host.
    fn run_local(&self, toolchain: &Toolchain, parser: Box<dyn ArgParser>) -> RunManager;

    /// Manager that prepares the request locally and sends it to `client`.
    fn send_remote(
        &self,
        toolchain: &Toolchain,
        parser: Box<dyn ArgParser>,
        client: Arc<dyn SchedulerClient>,
    ) -> RunManager;

    /// Manager that runs a request received from another host.
    fn recv_remote(&self, toolchain: &Toolchain) -> CompileManager;
}
