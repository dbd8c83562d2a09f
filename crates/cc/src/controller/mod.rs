//! GCC / Clang toolchain controller
//!
//! - [`local`] - Compiles on this host with the caller's arguments
//! - [`send`] - Preprocesses locally, then ships the source to an agent
//! - [`recv`] - Compiles preprocessed source received from a consumer

mod local;
mod recv;
mod send;

use std::sync::Arc;

use kubecc_core::{Toolchain, ToolchainKind};
use kubecc_run::{
    ArgParser, CompileManager, ExecutorSet, RequestError, RunManager, SchedulerClient,
    ToolchainController, ToolchainRunnerStore,
};

use crate::args::CcArgs;

pub use local::LocalCompile;
pub use recv::RecvCompile;
pub use send::SendCompile;

/// Registers the controller for both GCC and Clang.
pub fn add_to_store(store: &mut ToolchainRunnerStore, executors: ExecutorSet) {
    let controller = Arc::new(CcController::new(executors));
    store.add(ToolchainKind::Gnu, controller.clone());
    store.add(ToolchainKind::Clang, controller);
}

pub struct CcController {
    executors: ExecutorSet,
}

impl CcController {
    pub fn new(executors: ExecutorSet) -> Self {
        Self { executors }
    }
}

/// Recovers the concrete parser, reparsing when it came from elsewhere.
fn cc_args(parser: Box<dyn ArgParser>) -> CcArgs {
    match parser.as_any().downcast_ref::<CcArgs>() {
        Some(args) => args.clone(),
        None => CcArgs::parsed(parser.args().to_vec()),
    }
}

/// Remote failures that mean the agent did something other than compile.
pub(crate) fn analyze_errors(stderr: &str) -> Option<RequestError> {
    if stderr.contains("collect2") || stderr.contains("undefined reference") {
        return Some(RequestError::internal(format!(
            "remote compiler attempted to link: {stderr}"
        )));
    }
    None
}

impl ToolchainController for CcController {
    fn new_arg_parser(&self, args: &[String]) -> Box<dyn ArgParser> {
        Box::new(CcArgs::new(args.to_vec()))
    }

    fn run_local(&self, toolchain: &Toolchain, parser: Box<dyn ArgParser>) -> RunManager {
        Arc::new(LocalCompile::new(
            self.executors.local.clone(),
            toolchain.clone(),
            cc_args(parser),
        ))
    }

    fn send_remote(
        &self,
        toolchain: &Toolchain,
        parser: Box<dyn ArgParser>,
        client: Arc<dyn SchedulerClient>,
    ) -> RunManager {
        Arc::new(SendCompile::new(
            self.executors.clone(),
            toolchain.clone(),
            cc_args(parser),
            client,
        ))
    }

    fn recv_remote(&self, toolchain: &Toolchain) -> CompileManager {
        Arc::new(RecvCompile::new(self.executors.local.clone(), toolchain.clone()))
    }
}
