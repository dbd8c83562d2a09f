use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use kubecc_core::{spans, CompileRequest, CompileResult, Contexts, RunRequest, RunResponse, Toolchain};
use kubecc_run::{
    check_remote_response, ExecutorSet, ProcessOptions, RemoteCompileRunner, RequestError,
    RequestManager, RequestResult, RunError, SchedulerClient, Task,
};
use tracing::{debug, info_span, Instrument};

use super::analyze_errors;
use crate::args::CcArgs;
use crate::tasks::PreprocessRunner;

/// Preprocesses on this host, compiles on an agent
///
/// The preprocess step runs on the local executor so it is bounded like
/// any other local work; the round trip runs on the remote executor. The
/// object file returned by the agent is written to the caller's output
/// path.
pub struct SendCompile {
    executors: ExecutorSet,
    toolchain: Toolchain,
    args: CcArgs,
    client: Arc<dyn SchedulerClient>,
}

impl SendCompile {
    pub fn new(
        executors: ExecutorSet,
        toolchain: Toolchain,
        args: CcArgs,
        client: Arc<dyn SchedulerClient>,
    ) -> Self {
        Self {
            executors,
            toolchain,
            args,
            client,
        }
    }

    fn output_path(args: &CcArgs, work_dir: &Path) -> RequestResult<PathBuf> {
        let output = args
            .output_path()
            .ok_or_else(|| RequestError::InvalidArgument("no output path".into()))?;
        let output = Path::new(output);
        if output.is_absolute() {
            Ok(output.to_path_buf())
        } else if work_dir.as_os_str().is_empty() {
            Err(RequestError::InvalidArgument(format!(
                "relative output path {} without a working directory",
                output.display()
            )))
        } else {
            Ok(work_dir.join(output))
        }
    }

    async fn preprocess(
        &self,
        ctx: Contexts,
        args: &CcArgs,
        request: &RunRequest,
    ) -> RequestResult<Result<Vec<u8>, RunResponse>> {
        let runner = PreprocessRunner::new(args, ProcessOptions::from_request(request))
            .map_err(|e| RequestError::InvalidArgument(e.to_string()))?;
        let task = Arc::new(Task::new(ctx, self.toolchain.clone(), runner));
        match self
            .executors
            .local
            .exec(task)
            .instrument(info_span!(spans::PREPROCESS))
            .await
        {
            Ok(out) => Ok(Ok(out.stdout)),
            Err(RunError::Compiler { stdout, stderr, .. }) => {
                Ok(Err(RunResponse::failure(stdout, stderr)))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl RequestManager<RunRequest, RunResponse> for SendCompile {
    async fn process(&self, ctx: Contexts, request: RunRequest) -> RequestResult<RunResponse> {
        let span = info_span!(spans::RUN_REMOTE, request_id = %ctx.client.request_id());
        async move {
            let mut args = self.args.clone();
            args.configure_preprocessor_options();

            let source = match self.preprocess(ctx.clone(), &args, &request).await? {
                Ok(source) => source,
                Err(failed) => return Ok(failed),
            };
            let output_path = Self::output_path(&args, &request.work_dir)?;

            args.remove_local_args();
            args.prepend_explicit_pic_args(&self.toolchain);
            args.remove_w_pedantic();
            debug!(args = ?args.args(), bytes = source.len(), "Sending preprocessed source");

            let compile = CompileRequest::new(self.toolchain.clone(), args.into_args(), source);
            let task = Arc::new(Task::new(
                ctx,
                self.toolchain.clone(),
                RemoteCompileRunner::new(self.client.clone(), compile),
            ));
            let out = self.executors.remote.exec(task).await?;
            let response = out
                .response
                .ok_or_else(|| RequestError::internal("remote task returned no response"))?;
            let response = check_remote_response(response)?;

            match response.result {
                CompileResult::Success => {
                    tokio::fs::write(&output_path, &response.compiled_source)
                        .await
                        .map_err(|e| {
                            RequestError::internal(format!(
                                "failed to write {}: {e}",
                                output_path.display()
                            ))
                        })?;
                    Ok(RunResponse::success(Vec::new(), response.error.into_bytes()))
                }
                _ => {
                    if let Some(e) = analyze_errors(&response.error) {
                        return Err(e);
                    }
                    Ok(RunResponse::failure(Vec::new(), response.error.into_bytes()))
                }
            }
        }
        .instrument(span)
        .await
    }
}
