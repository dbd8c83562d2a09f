//! Sleep toolchain
//!
//! A toolchain whose "compiler" sleeps for the duration given by its first
//! argument (`250ms`, `2s`, or a bare number of milliseconds). It goes
//! through the same executors and managers as a real compiler, which makes
//! it useful for exercising scheduling without spawning processes.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kubecc_core::{
    spans, CompileRequest, CompileResponse, CompileResult, Contexts, RunRequest, RunResponse,
    Toolchain, ToolchainKind, ToolchainLang,
};
use tracing::{debug, info_span, Instrument};

use super::remote::{check_remote_response, RemoteCompileRunner};
use super::{ArgParser, ExecutorSet, StaticQuerier, ToolchainController, ToolchainRunnerStore};
use crate::client::SchedulerClient;
use crate::error::{RequestError, RunError, RunResult};
use crate::executor::Executor;
use crate::request::{CompileManager, RequestManager, RequestResult, RunManager};
use crate::task::{Runner, Task, TaskOutput};

/// Parses a sleep duration.
///
/// Accepts `"<n>ms"`, `"<n>s"` and bare integers (milliseconds).
pub fn parse_duration(arg: &str) -> Option<Duration> {
    let arg = arg.trim();
    if let Some(ms) = arg.strip_suffix("ms") {
        ms.parse().ok().map(Duration::from_millis)
    } else if let Some(secs) = arg.strip_suffix('s') {
        secs.parse::<f64>()
            .ok()
            .and_then(|s| Duration::try_from_secs_f64(s).ok())
    } else {
        arg.parse().ok().map(Duration::from_millis)
    }
}

fn duration_from_args(args: &[String]) -> Result<Duration, RequestError> {
    let first = args
        .first()
        .ok_or_else(|| RequestError::InvalidArgument("sleep needs a duration".into()))?;
    parse_duration(first)
        .ok_or_else(|| RequestError::InvalidArgument(format!("invalid sleep duration: {first}")))
}

/// Querier describing a sleep toolchain on this host
pub fn querier() -> StaticQuerier {
    StaticQuerier::new(
        Toolchain::new("", ToolchainKind::Sleep)
            .with_lang(ToolchainLang::Cxx)
            .with_target_arch(std::env::consts::ARCH)
            .with_version("1.0")
            .with_pic_default(true),
    )
}

/// Registers the sleep controller.
pub fn add_to_store(store: &mut ToolchainRunnerStore, executors: ExecutorSet) {
    store.add(ToolchainKind::Sleep, Arc::new(SleepController::new(executors)));
}

/// Sleeps, or stops early when the request is cancelled
#[derive(Debug, Clone, Copy)]
pub struct SleepRunner {
    duration: Duration,
}

impl SleepRunner {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

#[async_trait]
impl Runner for SleepRunner {
    async fn run(&self, ctx: &Contexts, _toolchain: &Toolchain) -> RunResult<TaskOutput> {
        tokio::select! {
            _ = ctx.client.cancelled() => Err(RunError::Cancelled),
            _ = tokio::time::sleep(self.duration) => Ok(TaskOutput::default()),
        }
    }

    fn name(&self) -> &'static str {
        "sleep"
    }
}

/// Every sleep can run remotely
#[derive(Debug, Clone, Default)]
pub struct SleepArgs {
    args: Vec<String>,
}

impl SleepArgs {
    pub fn new(args: &[String]) -> Self {
        Self {
            args: args.to_vec(),
        }
    }
}

impl ArgParser for SleepArgs {
    fn parse(&mut self) {}

    fn can_run_remote(&self) -> bool {
        true
    }

    fn args(&self) -> &[String] {
        &self.args
    }

    fn box_clone(&self) -> Box<dyn ArgParser> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct SleepController {
    executors: ExecutorSet,
}

impl SleepController {
    pub fn new(executors: ExecutorSet) -> Self {
        Self { executors }
    }
}

impl ToolchainController for SleepController {
    fn new_arg_parser(&self, args: &[String]) -> Box<dyn ArgParser> {
        Box::new(SleepArgs::new(args))
    }

    fn run_local(&self, toolchain: &Toolchain, _parser: Box<dyn ArgParser>) -> RunManager {
        Arc::new(LocalSleep {
            executor: self.executors.local.clone(),
            toolchain: toolchain.clone(),
        })
    }

    fn send_remote(
        &self,
        toolchain: &Toolchain,
        _parser: Box<dyn ArgParser>,
        client: Arc<dyn SchedulerClient>,
    ) -> RunManager {
        Arc::new(SendSleep {
            executor: self.executors.remote.clone(),
            toolchain: toolchain.clone(),
            client,
        })
    }

    fn recv_remote(&self, toolchain: &Toolchain) -> CompileManager {
        Arc::new(RecvSleep {
            executor: self.executors.local.clone(),
            toolchain: toolchain.clone(),
        })
    }
}

struct LocalSleep {
    executor: Arc<dyn Executor>,
    toolchain: Toolchain,
}

#[async_trait]
impl RequestManager<RunRequest, RunResponse> for LocalSleep {
    async fn process(&self, ctx: Contexts, request: RunRequest) -> RequestResult<RunResponse> {
        let span = info_span!(spans::RUN_LOCAL, request_id = %ctx.client.request_id());
        async move {
            let duration = duration_from_args(&request.args)?;
            let task = Arc::new(Task::new(ctx, self.toolchain.clone(), SleepRunner::new(duration)));
            match self.executor.exec(task).await {
                Ok(out) => Ok(RunResponse::success(out.stdout, out.stderr)),
                Err(RunError::Compiler { stdout, stderr, .. }) => {
                    Ok(RunResponse::failure(stdout, stderr))
                }
                Err(e) => Err(e.into()),
            }
        }
        .instrument(span)
        .await
    }
}

struct SendSleep {
    executor: Arc<dyn Executor>,
    toolchain: Toolchain,
    client: Arc<dyn SchedulerClient>,
}

#[async_trait]
impl RequestManager<RunRequest, RunResponse> for SendSleep {
    async fn process(&self, ctx: Contexts, request: RunRequest) -> RequestResult<RunResponse> {
        let span = info_span!(spans::RUN_REMOTE, request_id = %ctx.client.request_id());
        async move {
            duration_from_args(&request.args)?;
            let compile = CompileRequest::new(self.toolchain.clone(), request.args, Vec::new());
            let task = Arc::new(Task::new(
                ctx,
                self.toolchain.clone(),
                RemoteCompileRunner::new(self.client.clone(), compile),
            ));
            let out = self.executor.exec(task).await?;
            let response = out
                .response
                .ok_or_else(|| RequestError::internal("remote task returned no response"))?;
            let response = check_remote_response(response)?;
            debug!(result = %response.result, "Remote sleep finished");
            Ok(match response.result {
                CompileResult::Success => RunResponse::success(Vec::new(), Vec::new()),
                _ => RunResponse::failure(Vec::new(), response.error.into_bytes()),
            })
        }
        .instrument(span)
        .await
    }
}

struct RecvSleep {
    executor: Arc<dyn Executor>,
    toolchain: Toolchain,
}

#[async_trait]
impl RequestManager<CompileRequest, CompileResponse> for RecvSleep {
    async fn process(
        &self,
        ctx: Contexts,
        request: CompileRequest,
    ) -> RequestResult<CompileResponse> {
        let span = info_span!(spans::RUN_RECV, request_id = %request.request_id);
        async move {
            let duration = match duration_from_args(&request.args) {
                Ok(d) => d,
                Err(e) => {
                    return Ok(CompileResponse::internal_error(request.request_id, e.to_string()))
                }
            };
            let task = Arc::new(Task::new(ctx, self.toolchain.clone(), SleepRunner::new(duration)));
            match self.executor.exec(task).await {
                Ok(_) => Ok(CompileResponse::success(request.request_id, Vec::new())),
                Err(RunError::Cancelled) => Err(RequestError::Cancelled),
                Err(e) => Ok(CompileResponse::fail(request.request_id, e.to_string())),
            }
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use crate::executor::UnqueuedExecutor;
    use kubecc_core::{Component, RetryAction, ServerContext};

    fn contexts() -> Contexts {
        Contexts::for_request(&ServerContext::new(Component::Test))
    }

    fn controller() -> SleepController {
        SleepController::new(ExecutorSet::new(
            Arc::new(UnqueuedExecutor::new()),
            Arc::new(UnqueuedExecutor::new()),
        ))
    }

    fn request(arg: &str) -> RunRequest {
        RunRequest {
            compiler: "/usr/bin/sleep".into(),
            args: vec![arg.to_string()],
            ..Default::default()
        }
    }

    struct ReplyClient(CompileResponse);

    #[async_trait]
    impl SchedulerClient for ReplyClient {
        async fn compile(
            &self,
            _ctx: &Contexts,
            request: CompileRequest,
        ) -> Result<CompileResponse, ClientError> {
            let mut response = self.0.clone();
            response.request_id = request.request_id;
            Ok(response)
        }
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("2s"), Some(Duration::from_secs(2)));
        assert_eq!(parse_duration("15"), Some(Duration::from_millis(15)));
        assert_eq!(parse_duration("soon"), None);
        assert_eq!(parse_duration("-1s"), None);
        assert_eq!(parse_duration("infs"), None);
        assert_eq!(parse_duration("1e300s"), None);
    }

    #[tokio::test]
    async fn test_run_local_rejects_oversized_duration() {
        let tc = Toolchain::new("/usr/bin/sleep", ToolchainKind::Sleep);
        let parser = controller().new_arg_parser(&["1e300s".to_string()]);
        let manager = controller().run_local(&tc, parser);

        let err = manager.process(contexts(), request("1e300s")).await.unwrap_err();
        assert!(matches!(err, RequestError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_run_local() {
        let tc = Toolchain::new("/usr/bin/sleep", ToolchainKind::Sleep);
        let parser = controller().new_arg_parser(&["1ms".to_string()]);
        let manager = controller().run_local(&tc, parser);

        let response = manager.process(contexts(), request("1ms")).await.unwrap();
        assert_eq!(response.return_code, 0);

        let err = manager.process(contexts(), request("forever")).await.unwrap_err();
        assert!(matches!(err, RequestError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_run_local_cancelled() {
        let tc = Toolchain::new("/usr/bin/sleep", ToolchainKind::Sleep);
        let manager = controller().run_local(&tc, Box::new(SleepArgs::default()));
        let ctx = contexts();
        ctx.client.cancel();
        let err = manager.process(ctx, request("10s")).await.unwrap_err();
        assert_eq!(err, RequestError::Cancelled);
    }

    #[tokio::test]
    async fn test_send_remote_maps_retry_hints() {
        let tc = Toolchain::new("/usr/bin/sleep", ToolchainKind::Sleep);
        let id = uuid::Uuid::nil();

        let ok = controller().send_remote(
            &tc,
            Box::new(SleepArgs::default()),
            Arc::new(ReplyClient(CompileResponse::success(id, vec![]))),
        );
        assert_eq!(ok.process(contexts(), request("1ms")).await.unwrap().return_code, 0);

        let retry = controller().send_remote(
            &tc,
            Box::new(SleepArgs::default()),
            Arc::new(ReplyClient(CompileResponse::retry(id, RetryAction::Retry))),
        );
        assert_eq!(
            retry.process(contexts(), request("1ms")).await,
            Err(RequestError::NoAgentsRetry)
        );

        let local = controller().send_remote(
            &tc,
            Box::new(SleepArgs::default()),
            Arc::new(ReplyClient(CompileResponse::retry(id, RetryAction::DoNotRetry))),
        );
        assert_eq!(
            local.process(contexts(), request("1ms")).await,
            Err(RequestError::NoAgentsRunLocal)
        );
    }

    #[tokio::test]
    async fn test_recv_remote() {
        let tc = Toolchain::new("/usr/bin/sleep", ToolchainKind::Sleep);
        let manager = controller().recv_remote(&tc);

        let ok = manager
            .process(contexts(), CompileRequest::new(tc.clone(), vec!["1ms".into()], vec![]))
            .await
            .unwrap();
        assert_eq!(ok.result, CompileResult::Success);

        let bad = manager
            .process(contexts(), CompileRequest::new(tc, vec![], vec![]))
            .await
            .unwrap();
        assert_eq!(bad.result, CompileResult::InternalError);
    }
}
