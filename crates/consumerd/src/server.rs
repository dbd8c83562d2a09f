//! Consumer daemon request handling
//!
//! Each run request is resolved to a toolchain, parsed by that toolchain's
//! controller and then either compiled here directly or raced through the
//! split queue.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use kubecc_core::{
    Contexts, QueueParams, QueueParamsCompleter, QueueStatus, QueueStatusCompleter,
    RunRequest, RunResponse, ServerContext, TaskStatus, TaskStatusCompleter, Toolchain,
    UsageLimits,
};
use kubecc_run::toolchain::sleep;
use kubecc_run::{
    ArgParser, Executor, ExecutorSet, PackagedRequest, Querier, QueuedExecutor, RequestError,
    RequestManager, RunMode, SchedulerClient, ToolchainController, ToolchainError, ToolchainRunnerStore,
    ToolchainStore, UnqueuedExecutor,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};

use crate::availability::{watch_availability, AvailabilityChecker, AvailabilityEvent};
use crate::config::ConsumerdConfig;
use crate::error::{ConfigError, ConsumerdError};
use crate::mode::decide_run_mode;
use crate::queue::{SplitQueue, SplitTask};
use crate::reporter::{Completers, MetricsSink, TasksCompleted, TelemetryReporter};

pub struct Consumerd {
    server: ServerContext,
    config: ConsumerdConfig,
    store: Arc<ToolchainStore>,
    runners: ToolchainRunnerStore,
    querier: Arc<dyn Querier>,
    local: Arc<QueuedExecutor>,
    remote: Arc<UnqueuedExecutor>,
    queue: SplitQueue,
    client: Arc<dyn SchedulerClient>,
    /// Requests compiled here without going through the split queue
    direct_completed: AtomicU64,
}

impl Consumerd {
    /// Starts the executors and split queue.
    ///
    /// `availability` should follow the scheduler; the remote side of the
    /// split queue only runs while it reports a peer.
    ///
    /// Panics if `config.usage_limits` do not validate. Configuration read
    /// with [`ConsumerdConfig::from_env`] is already validated.
    pub async fn new(
        server: ServerContext,
        config: ConsumerdConfig,
        client: Arc<dyn SchedulerClient>,
        availability: Arc<AvailabilityChecker>,
    ) -> Self {
        let local = Arc::new(QueuedExecutor::with_name(
            "consumerd-local",
            config.usage_limits,
        ));
        let remote = Arc::new(UnqueuedExecutor::new());
        let executors = ExecutorSet::new(local.clone(), remote.clone());

        let mut runners = ToolchainRunnerStore::new();
        kubecc_cc::add_to_store(&mut runners, executors.clone());
        sleep::add_to_store(&mut runners, executors);

        let queue = SplitQueue::new(
            config.split_queue.clone(),
            config.usage_limits,
            availability,
        )
        .await;

        info!(
            server = %server.uuid(),
            kinds = ?runners.kinds(),
            "Consumerd started"
        );

        Self {
            server,
            config,
            store: Arc::new(ToolchainStore::new()),
            runners,
            querier: Arc::new(kubecc_cc::ExecQuerier::new()),
            local,
            remote,
            queue,
            client,
            direct_completed: AtomicU64::new(0),
        }
    }

    /// Replaces the querier used for compilers seen for the first time.
    pub fn with_querier(mut self, querier: Arc<dyn Querier>) -> Self {
        self.querier = querier;
        self
    }

    pub fn server(&self) -> &ServerContext {
        &self.server
    }

    pub fn config(&self) -> &ConsumerdConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<ToolchainStore> {
        &self.store
    }

    pub fn split_queue(&self) -> &SplitQueue {
        &self.queue
    }

    /// Registers a compiler with an explicit querier, e.g. a sleep toolchain.
    pub async fn add_toolchain(
        &self,
        executable: &Path,
        querier: Arc<dyn Querier>,
    ) -> Result<Toolchain, ConsumerdError> {
        Ok(self.store.find_or_add(executable, querier).await?)
    }

    /// Feeds scheduler liveness events into the split queue's availability
    /// checker until the daemon shuts down.
    pub fn watch_scheduler(&self, feed: mpsc::Receiver<AvailabilityEvent>) -> JoinHandle<()> {
        watch_availability(
            self.queue.availability().clone(),
            feed,
            self.server.shutdown_token().child_token(),
        )
    }

    /// Starts the telemetry reporter for this daemon.
    pub fn spawn_reporter(self: &Arc<Self>, sink: Arc<dyn MetricsSink>) -> JoinHandle<()> {
        TelemetryReporter::new(self.config.telemetry.clone(), self.clone(), sink)
            .spawn(self.server.shutdown_token().child_token())
    }

    /// Applies new usage limits to the local executor and the split queue.
    pub async fn set_usage_limits(&self, limits: UsageLimits) -> Result<(), ConfigError> {
        limits.validate()?;
        self.local.set_usage_limits(limits);
        self.queue.set_usage_limits(limits).await;
        Ok(())
    }

    /// Runs a compiler invocation on behalf of a consumer.
    ///
    /// Cancelling `cancel` abandons the request and returns
    /// [`RequestError::Cancelled`].
    pub async fn run(
        &self,
        request: RunRequest,
        cancel: CancellationToken,
    ) -> Result<RunResponse, ConsumerdError> {
        validate(&request)?;

        let ctx = Contexts::for_request(&self.server);
        let client = ctx.client.clone();
        let span = info_span!(
            "consumerd.run",
            request_id = %client.request_id(),
            compiler = %request.compiler.display()
        );
        async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Request cancelled by consumer");
                    client.cancel();
                    Err(ConsumerdError::Request(RequestError::Cancelled))
                }
                result = self.dispatch(ctx, request) => result,
            }
        }
        .instrument(span)
        .await
    }

    async fn dispatch(
        &self,
        ctx: Contexts,
        request: RunRequest,
    ) -> Result<RunResponse, ConsumerdError> {
        let toolchain = self.resolve_toolchain(&request.compiler).await?;
        let controller = self.runners.get(toolchain.kind)?;

        let mut parser = controller.new_arg_parser(&request.args);
        parser.parse();
        let mode = decide_run_mode(self.client.is_connected(), self.local.status(), parser.as_ref());
        debug!(toolchain = %toolchain, %mode, "Run mode decided");

        match mode {
            RunMode::RunRemote => {
                self.run_split(ctx, &toolchain, controller.as_ref(), parser, request)
                    .await
            }
            _ => {
                let response = controller
                    .run_local(&toolchain, parser)
                    .process(ctx, request)
                    .await?;
                self.direct_completed.fetch_add(1, Ordering::Relaxed);
                Ok(response)
            }
        }
    }

    async fn run_split(
        &self,
        ctx: Contexts,
        toolchain: &Toolchain,
        controller: &dyn ToolchainController,
        parser: Box<dyn ArgParser>,
        request: RunRequest,
    ) -> Result<RunResponse, ConsumerdError> {
        let local = PackagedRequest::package(
            controller.run_local(toolchain, parser.clone()),
            ctx.clone(),
            request.clone(),
        );
        let remote = PackagedRequest::package(
            controller.send_remote(toolchain, parser, self.client.clone()),
            ctx.clone(),
            request,
        );
        let (task, wait) = SplitTask::new(local, remote, ctx.client.clone());
        self.queue.exec(task).await?;

        let (location, result) = wait.wait().await;
        debug!(%location, ok = result.is_ok(), "Split task finished");
        Ok(result?)
    }

    /// Finds the toolchain for `compiler`, refreshing it if the executable
    /// changed and adding it if it has not been seen before.
    async fn resolve_toolchain(&self, compiler: &Path) -> Result<Toolchain, ConsumerdError> {
        match self.store.find(compiler) {
            Ok(toolchain) => {
                if self.store.update_if_needed(&toolchain).await? {
                    debug!(toolchain = %toolchain, "Toolchain refreshed");
                    return Ok(self.store.find(compiler)?);
                }
                Ok(toolchain)
            }
            Err(ToolchainError::NotFound(_)) => {
                Ok(self.store.find_or_add(compiler, self.querier.clone()).await?)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Stops accepting work and waits for in-flight tasks.
    pub async fn shutdown(&self) {
        info!("Consumerd shutting down");
        self.server.shutdown();
        self.queue.shutdown().await;
        self.local.shutdown().await;
    }
}

fn validate(request: &RunRequest) -> Result<(), ConsumerdError> {
    if request.compiler.as_os_str().is_empty() {
        return Err(ConsumerdError::InvalidArgument("no compiler given".into()));
    }
    if request.uid == 0 || request.gid == 0 {
        return Err(ConsumerdError::InvalidArgument(
            "refusing to run a compiler as root".into(),
        ));
    }
    Ok(())
}

impl QueueParamsCompleter for Consumerd {
    fn complete_queue_params(&self, params: &mut QueueParams) {
        self.local.complete_queue_params(params);
    }
}

impl TaskStatusCompleter for Consumerd {
    fn complete_task_status(&self, status: &mut TaskStatus) {
        self.local.complete_task_status(status);
        self.remote.complete_task_status(status);
        status.num_queued += self.queue.num_queued();
    }
}

impl QueueStatusCompleter for Consumerd {
    fn complete_queue_status(&self, status: &mut QueueStatus) {
        *status = self.local.status();
    }
}

impl Completers for Consumerd {
    fn tasks_completed(&self) -> TasksCompleted {
        TasksCompleted {
            local: self.queue.local_completed() + self.direct_completed.load(Ordering::Relaxed),
            remote: self.queue.remote_completed(),
        }
    }
}

impl std::fmt::Debug for Consumerd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumerd")
            .field("component", &self.server.component())
            .field("server", &self.server.uuid())
            .field("toolchains", &self.store.len())
            .finish()
    }
}
