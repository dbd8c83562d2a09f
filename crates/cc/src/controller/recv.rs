use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use kubecc_core::{spans, CompileRequest, CompileResponse, Contexts, Toolchain};
use kubecc_run::{Executor, ProcessOptions, RequestError, RequestManager, RequestResult, RunError, Task};
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

use crate::args::CcArgs;
use crate::filename::{extension, replace_extension};
use crate::tasks::CompileRunner;

/// Compiles preprocessed source sent by a consumer
///
/// The source is written to a fresh temporary directory under its original
/// file name; the object file is read back from the same directory.
pub struct RecvCompile {
    executor: Arc<dyn Executor>,
    toolchain: Toolchain,
}

impl RecvCompile {
    pub fn new(executor: Arc<dyn Executor>, toolchain: Toolchain) -> Self {
        Self { executor, toolchain }
    }
}

fn internal(id: Uuid, msg: impl std::fmt::Display) -> RequestResult<CompileResponse> {
    Ok(CompileResponse::internal_error(id, msg.to_string()))
}

#[async_trait]
impl RequestManager<CompileRequest, CompileResponse> for RecvCompile {
    async fn process(
        &self,
        ctx: Contexts,
        request: CompileRequest,
    ) -> RequestResult<CompileResponse> {
        let id = request.request_id;
        let span = info_span!(spans::RUN_RECV, request_id = %id);
        async move {
            let mut args = CcArgs::parsed(request.args);
            let Some(input) = args.input_path().map(str::to_string) else {
                return internal(id, "no input file in arguments");
            };
            let base = Path::new(&input)
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("input.c")
                .to_string();
            let output_ext = match args.output_path().map(extension) {
                Some(ext) if !ext.is_empty() => ext.to_string(),
                _ => ".o".to_string(),
            };

            let dir = match tempfile::Builder::new().prefix("kubecc-").tempdir() {
                Ok(dir) => dir,
                Err(e) => return internal(id, format!("failed to create temp dir: {e}")),
            };
            let source_path = dir.path().join(&base);
            if let Err(e) = tokio::fs::write(&source_path, &request.preprocessed_source).await {
                return internal(id, format!("failed to write source: {e}"));
            }
            let output_path = dir.path().join(replace_extension(&base, &output_ext));

            let rewritten = args
                .replace_input_path(&source_path.to_string_lossy())
                .and_then(|_| args.replace_output_path(&output_path.to_string_lossy()));
            if let Err(e) = rewritten {
                return internal(id, e);
            }
            debug!(args = ?args.args(), "Compiling received source");

            let runner = CompileRunner::new(&args, ProcessOptions::default().with_work_dir(dir.path()));
            let task = Arc::new(Task::new(ctx, self.toolchain.clone(), runner));
            match self.executor.exec(task).await {
                Ok(out) => {
                    let object = match tokio::fs::read(&output_path).await {
                        Ok(bytes) => bytes,
                        Err(e) => return internal(id, format!("failed to read output: {e}")),
                    };
                    if object.is_empty() {
                        return internal(id, "compiler produced an empty output file");
                    }
                    let mut response = CompileResponse::success(id, object);
                    response.error = String::from_utf8_lossy(&out.stderr).into_owned();
                    Ok(response)
                }
                Err(RunError::Compiler { stderr, .. }) => Ok(CompileResponse::fail(
                    id,
                    String::from_utf8_lossy(&stderr).into_owned(),
                )),
                Err(RunError::Cancelled) => Err(RequestError::Cancelled),
                Err(e) => internal(id, e),
            }
        }
        .instrument(span)
        .await
    }
}
