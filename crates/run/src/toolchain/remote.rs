use std::sync::Arc;

use async_trait::async_trait;
use kubecc_core::{CompileRequest, CompileResponse, CompileResult, Contexts, RetryAction, Toolchain};
use tracing::debug;

use crate::client::SchedulerClient;
use crate::error::{ClientError, RequestError, RunError, RunResult};
use crate::task::{Runner, TaskOutput};

/// Runner that sends one compile request to the scheduler and waits for the reply
///
/// The response is returned in [`TaskOutput::response`]. Transport failures
/// other than cancellation become a `Retry` response so the request is
/// requeued.
pub struct RemoteCompileRunner {
    client: Arc<dyn SchedulerClient>,
    request: CompileRequest,
}

impl RemoteCompileRunner {
    pub fn new(client: Arc<dyn SchedulerClient>, request: CompileRequest) -> Self {
        Self { client, request }
    }
}

#[async_trait]
impl Runner for RemoteCompileRunner {
    async fn run(&self, ctx: &Contexts, _toolchain: &Toolchain) -> RunResult<TaskOutput> {
        let request_id = self.request.request_id;
        match self.client.compile(ctx, self.request.clone()).await {
            Ok(response) => Ok(TaskOutput::from_response(response)),
            Err(ClientError::Cancelled) => Err(RunError::Cancelled),
            Err(e) => {
                debug!(request_id = %request_id, error = %e, "Remote compile failed in transit");
                Ok(TaskOutput::from_response(CompileResponse::retry(
                    request_id,
                    RetryAction::Retry,
                )))
            }
        }
    }

    fn name(&self) -> &'static str {
        "remote-compile"
    }
}

/// Classifies a remote response.
///
/// `Success` and `Fail` are returned as-is for the caller to turn into a
/// run response. A retry hint becomes [`RequestError::NoAgentsRetry`] or
/// [`RequestError::NoAgentsRunLocal`]; anything else is an internal error.
pub fn check_remote_response(response: CompileResponse) -> Result<CompileResponse, RequestError> {
    match response.result {
        CompileResult::Success | CompileResult::Fail => Ok(response),
        CompileResult::Retry => match response.retry_action {
            RetryAction::Retry => Err(RequestError::NoAgentsRetry),
            RetryAction::DoNotRetry => Err(RequestError::NoAgentsRunLocal),
        },
        CompileResult::InternalError => Err(RequestError::internal(if response.error.is_empty() {
            "remote reported an internal error".to_string()
        } else {
            response.error
        })),
    }
}
