use std::sync::Arc;

use async_trait::async_trait;
use kubecc_core::{spans, Contexts, RunRequest, RunResponse, Toolchain};
use kubecc_run::{Executor, ProcessOptions, RequestManager, RequestResult, RunError, Task};
use tracing::{debug, info_span, Instrument};

use crate::args::CcArgs;
use crate::tasks::CompileRunner;

/// Compiles on this host, exactly as the caller asked
pub struct LocalCompile {
    executor: Arc<dyn Executor>,
    toolchain: Toolchain,
    args: CcArgs,
}

impl LocalCompile {
    pub fn new(executor: Arc<dyn Executor>, toolchain: Toolchain, args: CcArgs) -> Self {
        Self {
            executor,
            toolchain,
            args,
        }
    }
}

#[async_trait]
impl RequestManager<RunRequest, RunResponse> for LocalCompile {
    async fn process(&self, ctx: Contexts, request: RunRequest) -> RequestResult<RunResponse> {
        let span = info_span!(spans::RUN_LOCAL, request_id = %ctx.client.request_id());
        async move {
            let runner = CompileRunner::new(&self.args, ProcessOptions::from_request(&request));
            let task = Arc::new(Task::new(ctx, self.toolchain.clone(), runner));
            match self.executor.exec(task).await {
                Ok(out) => Ok(RunResponse::success(out.stdout, out.stderr)),
                Err(RunError::Compiler { code, stdout, stderr }) => {
                    debug!(code, "Local compile failed");
                    Ok(RunResponse::failure(stdout, stderr))
                }
                Err(e) => Err(e.into()),
            }
        }
        .instrument(span)
        .await
    }
}
