//! Executors
//!
//! This module provides:
//! - [`Executor`] - The trait request managers hand their tasks to
//! - [`QueuedExecutor`] - Runs tasks on a worker pool sized by [`UsageLimits`](kubecc_core::UsageLimits)
//!   and reports queue pressure
//! - [`UnqueuedExecutor`] - Runs every task immediately; used where the
//!   bottleneck is a remote peer rather than local CPU
//!
//! # Architecture
//!
//! ```text
//! exec(task) ──► queued += 1 ──► input channel ──► WorkerPool
//!                                                    │
//!            queued -= 1, running += 1 ◄── started ──┘
//!                                                    │
//!            running -= 1, result     ◄── done ──────┘
//! ```

mod queued;
mod unqueued;

pub use queued::QueuedExecutor;
pub use unqueued::UnqueuedExecutor;

use crate::error::RunResult;
use crate::task::{Task, TaskOutput};
use async_trait::async_trait;
use kubecc_core::QueueStatus;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

/// Something that runs tasks
#[async_trait]
pub trait Executor: Send + Sync {
    /// Runs `task` and returns its result.
    ///
    /// Returns [`RunError::Cancelled`](crate::RunError::Cancelled) promptly if
    /// the task's client context is cancelled while it waits.
    async fn exec(&self, task: Arc<Task>) -> RunResult<TaskOutput>;

    /// Current load classification
    fn status(&self) -> QueueStatus;
}

/// Increments a gauge for as long as it is alive
pub(crate) struct GaugeGuard<'a>(&'a AtomicI32);

impl<'a> GaugeGuard<'a> {
    pub(crate) fn increment(gauge: &'a AtomicI32) -> Self {
        gauge.fetch_add(1, Ordering::SeqCst);
        Self(gauge)
    }
}

impl Drop for GaugeGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
