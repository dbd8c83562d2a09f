//! Agent request handling

use std::path::Path;
use std::sync::Arc;

use kubecc_core::{
    CompileRequest, CompileResponse, Contexts, QueueParams, QueueParamsCompleter, QueueStatus,
    QueueStatusCompleter, RetryAction, ServerContext, TaskStatus, TaskStatusCompleter, Toolchain,
    UsageLimits,
};
use kubecc_run::toolchain::sleep;
use kubecc_run::{
    Executor, ExecutorSet, Querier, QueuedExecutor, RequestError, RequestManager,
    ToolchainRunnerStore, ToolchainStore,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::AgentConfig;
use crate::error::{AgentError, ConfigError};

/// Compiles preprocessed sources on behalf of remote consumers
pub struct Agent {
    server: ServerContext,
    store: Arc<ToolchainStore>,
    runners: ToolchainRunnerStore,
    executor: Arc<QueuedExecutor>,
}

impl Agent {
    /// Creates an agent and starts its executor. Must be called within a
    /// tokio runtime. Panics if `config.usage_limits` do not validate;
    /// [`AgentConfig::from_env`] always returns valid limits.
    pub fn new(server: ServerContext, config: AgentConfig) -> Self {
        let executor = Arc::new(QueuedExecutor::with_name("agent", config.usage_limits));
        // Received work has no further hop, so both roles share one executor
        let executors = ExecutorSet::new(executor.clone(), executor.clone());

        let mut runners = ToolchainRunnerStore::new();
        kubecc_cc::add_to_store(&mut runners, executors.clone());
        sleep::add_to_store(&mut runners, executors);

        info!(server = %server.uuid(), kinds = ?runners.kinds(), "Agent started");
        Self {
            server,
            store: Arc::new(ToolchainStore::new()),
            runners,
            executor,
        }
    }

    pub fn store(&self) -> &Arc<ToolchainStore> {
        &self.store
    }

    /// Makes a compiler on this host available to consumers.
    pub async fn add_toolchain(
        &self,
        executable: &Path,
        querier: Arc<dyn Querier>,
    ) -> Result<Toolchain, AgentError> {
        Ok(self.store.find_or_add(executable, querier).await?)
    }

    pub fn status(&self) -> QueueStatus {
        self.executor.status()
    }

    pub async fn set_usage_limits(&self, limits: UsageLimits) -> Result<(), ConfigError> {
        limits.validate()?;
        self.executor.apply_usage_limits(limits).await;
        Ok(())
    }

    /// Compiles a request sent by a consumer.
    ///
    /// A full queue is answered with a retry response so the scheduler can
    /// try another agent.
    pub async fn compile(
        &self,
        request: CompileRequest,
        cancel: CancellationToken,
    ) -> Result<CompileResponse, AgentError> {
        let span = info_span!("agent.compile", request_id = %request.request_id);
        async move {
            let status = self.executor.status();
            if status == QueueStatus::QueueFull {
                warn!(%status, "Rejecting request, queue is full");
                return Ok(CompileResponse::retry(request.request_id, RetryAction::Retry));
            }

            let toolchain = self
                .store
                .try_match(&request.toolchain)
                .map_err(|e| AgentError::InvalidArgument(e.to_string()))?;
            let controller = self.runners.get(toolchain.kind)?;
            debug!(toolchain = %toolchain, "Matched toolchain");

            let ctx = Contexts::for_request(&self.server);
            let client = ctx.client.clone();
            let manager = controller.recv_remote(&toolchain);
            tokio::select! {
                _ = cancel.cancelled() => {
                    client.cancel();
                    Err(AgentError::Request(RequestError::Cancelled))
                }
                result = manager.process(ctx, request) => Ok(result?),
            }
        }
        .instrument(span)
        .await
    }

    pub async fn shutdown(&self) {
        info!("Agent shutting down");
        self.server.shutdown();
        self.executor.shutdown().await;
    }
}

impl QueueParamsCompleter for Agent {
    fn complete_queue_params(&self, params: &mut QueueParams) {
        self.executor.complete_queue_params(params);
    }
}

impl TaskStatusCompleter for Agent {
    fn complete_task_status(&self, status: &mut TaskStatus) {
        self.executor.complete_task_status(status);
    }
}

impl QueueStatusCompleter for Agent {
    fn complete_queue_status(&self, status: &mut QueueStatus) {
        self.executor.complete_queue_status(status);
    }
}
