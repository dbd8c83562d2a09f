//! Remote peer client contract.
//!
//! The transport is out of scope for this crate; consumerd is handed an
//! implementation of [`SchedulerClient`] that forwards compile requests to
//! the scheduler, which picks an agent.

use async_trait::async_trait;
use kubecc_core::{CompileRequest, CompileResponse, Contexts};

use crate::error::ClientError;

#[async_trait]
pub trait SchedulerClient: Send + Sync {
    /// Sends a preprocessed compile job and waits for the agent's response.
    async fn compile(
        &self,
        ctx: &Contexts,
        request: CompileRequest,
    ) -> Result<CompileResponse, ClientError>;

    /// Whether a connection to the scheduler is currently established.
    fn is_connected(&self) -> bool {
        true
    }
}
