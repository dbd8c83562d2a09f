//! Unqueued executor
//!
//! Runs every task as soon as it is submitted. Used for the remote dispatch
//! path, where the local host only waits on the network. Always reports
//! [`QueueStatus::Available`] and counts its tasks as delegated.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use kubecc_core::{
    QueueParams, QueueParamsCompleter, QueueStatus, QueueStatusCompleter, TaskStatus,
    TaskStatusCompleter,
};
use tracing::instrument;

use super::{Executor, GaugeGuard};
use crate::error::RunResult;
use crate::task::{Task, TaskOutput};

#[derive(Debug, Default)]
pub struct UnqueuedExecutor {
    delegated: AtomicI32,
}

impl UnqueuedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_delegated(&self) -> i32 {
        self.delegated.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Executor for UnqueuedExecutor {
    #[instrument(skip(self, task), fields(task_id = %task.id(), runner = task.name()))]
    async fn exec(&self, task: Arc<Task>) -> RunResult<TaskOutput> {
        let _delegated = GaugeGuard::increment(&self.delegated);
        task.run().await
    }

    fn status(&self) -> QueueStatus {
        QueueStatus::Available
    }
}

impl QueueParamsCompleter for UnqueuedExecutor {
    fn complete_queue_params(&self, _params: &mut QueueParams) {}
}

impl TaskStatusCompleter for UnqueuedExecutor {
    fn complete_task_status(&self, status: &mut TaskStatus) {
        status.num_delegated = self.num_delegated();
    }
}

impl QueueStatusCompleter for UnqueuedExecutor {
    fn complete_queue_status(&self, status: &mut QueueStatus) {
        *status = QueueStatus::Available;
    }
}
