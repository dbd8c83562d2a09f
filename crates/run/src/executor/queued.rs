//! Queued executor
//!
//! Runs tasks on a [`WorkerPool`] whose size follows the current
//! [`UsageLimits`]. Tasks are admitted in the order `exec` was called.

use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use kubecc_core::{
    queue_status, QueueParams, QueueParamsCompleter, QueueStatus, QueueStatusCompleter,
    TaskStatus, TaskStatusCompleter, UsageLimits,
};
use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, instrument, trace};

use super::{Executor, GaugeGuard};
use crate::error::{RunError, RunResult};
use crate::task::{Task, TaskOutput};
use crate::worker::{WorkerPool, WorkerPoolOptions};

struct Job {
    task: Arc<Task>,
    started: oneshot::Sender<()>,
    done: oneshot::Sender<()>,
}

#[derive(Default)]
struct Gauges {
    running: AtomicI32,
    queued: AtomicI32,
}

/// Executor with a bounded number of concurrently running tasks
pub struct QueuedExecutor {
    input: mpsc::UnboundedSender<Job>,
    pool: Arc<WorkerPool<Job>>,
    limits: RwLock<UsageLimits>,
    /// Worker count the most recent limits asked for
    target_workers: Arc<AtomicUsize>,
    /// Held while reading `target_workers` and resizing
    resize: Arc<Mutex<()>>,
    gauges: Gauges,
}

impl QueuedExecutor {
    /// Creates an executor and starts sizing its pool to `limits`.
    ///
    /// An auto process limit is resolved to the host CPU count. Panics if
    /// `limits` do not validate.
    pub fn new(limits: UsageLimits) -> Self {
        Self::with_name("queued", limits)
    }

    pub fn with_name(name: &str, limits: UsageLimits) -> Self {
        let limits = limits.checked();
        let (input, rx) = mpsc::unbounded_channel::<Job>();
        let pool = Arc::new(WorkerPool::new(
            Mutex::new(rx),
            run_job,
            WorkerPoolOptions::new(name),
        ));

        let executor = Self {
            input,
            pool,
            limits: RwLock::new(limits),
            target_workers: Arc::new(AtomicUsize::new(0)),
            resize: Arc::new(Mutex::new(())),
            gauges: Gauges::default(),
        };
        executor.spawn_resize(&limits);
        executor
    }

    /// Replaces the usage limits and resizes the worker pool in the background.
    /// Panics if `limits` do not validate.
    ///
    /// Until the resize completes, [`status`](Executor::status) reflects the new
    /// limits while the pool may still be running at the old size.
    pub fn set_usage_limits(&self, limits: UsageLimits) {
        let limits = limits.checked();
        *self.limits.write() = limits;
        info!(
            concurrent_process_limit = limits.concurrent_process_limit,
            queue_pressure_multiplier = limits.queue_pressure_multiplier,
            queue_reject_multiplier = limits.queue_reject_multiplier,
            "Usage limits updated"
        );
        self.spawn_resize(&limits);
    }

    /// Replaces the usage limits and waits for the pool to match. Panics if
    /// `limits` do not validate.
    pub async fn apply_usage_limits(&self, limits: UsageLimits) {
        let limits = limits.checked();
        *self.limits.write() = limits;
        let _resize = self.resize.lock().await;
        let target = worker_target(&limits);
        self.target_workers.store(target, Ordering::SeqCst);
        self.pool.set_worker_count(target).await;
    }

    fn spawn_resize(&self, limits: &UsageLimits) {
        self.target_workers
            .store(worker_target(limits), Ordering::SeqCst);
        let pool = self.pool.clone();
        let target = self.target_workers.clone();
        let resize = self.resize.clone();
        tokio::spawn(async move {
            // Read the target under the lock so overlapping updates settle
            // on the most recent one.
            let _resize = resize.lock().await;
            pool.set_worker_count(target.load(Ordering::SeqCst)).await;
        });
    }

    pub fn usage_limits(&self) -> UsageLimits {
        *self.limits.read()
    }

    pub fn num_running(&self) -> i32 {
        self.gauges.running.load(Ordering::SeqCst)
    }

    pub fn num_queued(&self) -> i32 {
        self.gauges.queued.load(Ordering::SeqCst)
    }

    /// Number of pool workers currently alive.
    pub fn live_workers(&self) -> usize {
        self.pool.live_workers()
    }

    pub async fn worker_count(&self) -> usize {
        self.pool.worker_count().await
    }

    /// Stops all workers after their current task.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}

fn worker_target(limits: &UsageLimits) -> usize {
    limits.concurrent_process_limit as usize
}

async fn run_job(job: Job) {
    if job.task.contexts().client.is_cancelled() {
        trace!(task_id = %job.task.id(), "Skipping cancelled task");
        return;
    }
    if job.started.send(()).is_err() {
        trace!(task_id = %job.task.id(), "Caller went away before task started");
        return;
    }
    let _ = job.task.run().await;
    let _ = job.done.send(());
}

#[async_trait]
impl Executor for QueuedExecutor {
    #[instrument(skip(self, task), fields(task_id = %task.id(), runner = task.name()))]
    async fn exec(&self, task: Arc<Task>) -> RunResult<TaskOutput> {
        let client = task.contexts().client.clone();
        let queued = GaugeGuard::increment(&self.gauges.queued);

        let (started_tx, started_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        self.input
            .send(Job {
                task: task.clone(),
                started: started_tx,
                done: done_tx,
            })
            .map_err(|_| RunError::Internal("executor is shut down".to_string()))?;

        tokio::select! {
            biased;
            _ = client.cancelled() => {
                debug!("Task cancelled while queued");
                return Err(RunError::Cancelled);
            }
            started = started_rx => {
                if started.is_err() {
                    return Err(RunError::Internal("task dropped before it started".to_string()));
                }
            }
        }

        drop(queued);
        let _running = GaugeGuard::increment(&self.gauges.running);

        tokio::select! {
            biased;
            done = done_rx => match done {
                Ok(()) => task.result(),
                Err(_) => Err(RunError::Internal("worker stopped before task completed".to_string())),
            },
            _ = client.cancelled() => {
                debug!("Task cancelled while running");
                Err(RunError::Cancelled)
            }
        }
    }

    fn status(&self) -> QueueStatus {
        queue_status(self.num_running(), self.num_queued(), &self.usage_limits())
    }
}

impl QueueParamsCompleter for QueuedExecutor {
    fn complete_queue_params(&self, params: &mut QueueParams) {
        *params = QueueParams::from(self.usage_limits());
    }
}

impl TaskStatusCompleter for QueuedExecutor {
    fn complete_task_status(&self, status: &mut TaskStatus) {
        status.num_running = self.num_running();
        status.num_queued = self.num_queued();
    }
}

impl QueueStatusCompleter for QueuedExecutor {
    fn complete_queue_status(&self, status: &mut QueueStatus) {
        *status = self.status();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Runner;
    use kubecc_core::{Component, Contexts, ServerContext, Toolchain};
    use std::time::Duration;

    struct SleepRunner(Duration);

    #[async_trait]
    impl Runner for SleepRunner {
        async fn run(&self, _ctx: &Contexts, _tc: &Toolchain) -> RunResult<TaskOutput> {
            tokio::time::sleep(self.0).await;
            Ok(TaskOutput::default())
        }
    }

    fn sleep_task(server: &ServerContext, ms: u64) -> Arc<Task> {
        Arc::new(Task::new(
            Contexts::for_request(server),
            Toolchain::default(),
            SleepRunner(Duration::from_millis(ms)),
        ))
    }

    fn limits(n: i32) -> UsageLimits {
        UsageLimits::new(n)
            .with_queue_pressure_multiplier(1.0)
            .with_queue_reject_multiplier(2.0)
    }

    #[tokio::test]
    async fn test_exec_runs_task() {
        let server = ServerContext::new(Component::Test);
        let executor = QueuedExecutor::new(limits(2));
        let out = executor.exec(sleep_task(&server, 1)).await;
        assert!(out.is_ok());
        assert_eq!(executor.num_running(), 0);
        assert_eq!(executor.num_queued(), 0);
    }

    #[tokio::test]
    async fn test_cancel_while_queued_returns_promptly() {
        let server = ServerContext::new(Component::Test);
        let executor = Arc::new(QueuedExecutor::new(limits(1)));
        executor.apply_usage_limits(limits(1)).await;

        let blocker = sleep_task(&server, 300);
        let first = {
            let executor = executor.clone();
            tokio::spawn(async move { executor.exec(blocker).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let queued = sleep_task(&server, 1);
        let client = queued.contexts().client.clone();
        let second = {
            let executor = executor.clone();
            let queued = queued.clone();
            tokio::spawn(async move { executor.exec(queued).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(executor.num_queued(), 1);

        client.cancel();
        let result = tokio::time::timeout(Duration::from_millis(100), second)
            .await
            .expect("cancelled exec should return promptly")
            .unwrap();
        assert_eq!(result, Err(RunError::Cancelled));
        assert_eq!(executor.num_queued(), 0);

        assert!(first.await.unwrap().is_ok());
        // A task that reached its runner would have cached Ok.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(queued.run().await, Err(RunError::Cancelled));
    }

    #[tokio::test]
    async fn test_status_follows_limits() {
        let executor = QueuedExecutor::new(limits(4));
        assert_eq!(executor.status(), QueueStatus::Available);

        executor.set_usage_limits(limits(8));
        assert_eq!(executor.usage_limits().concurrent_process_limit, 8);

        let mut params = QueueParams::default();
        executor.complete_queue_params(&mut params);
        assert_eq!(params.concurrent_process_limit, 8);
        assert_eq!(params.queue_reject_multiplier, 2.0);
    }

    #[tokio::test]
    #[should_panic(expected = "invalid concurrent process limit: -5")]
    async fn test_negative_limit_panics() {
        let _ = QueuedExecutor::new(limits(-5));
    }

    #[tokio::test]
    #[should_panic(expected = "invalid concurrent process limit: 0")]
    async fn test_apply_zero_limit_panics() {
        let executor = QueuedExecutor::new(limits(2));
        executor.apply_usage_limits(limits(0)).await;
    }

    #[tokio::test]
    #[should_panic(expected = "invalid queue reject multiplier")]
    async fn test_set_invalid_multiplier_panics() {
        let executor = QueuedExecutor::new(limits(2));
        executor.set_usage_limits(limits(2).with_queue_reject_multiplier(0.5));
    }

    #[tokio::test]
    async fn test_auto_limit_resolves_to_cpu_count() {
        let executor = QueuedExecutor::new(UsageLimits::default());
        executor.apply_usage_limits(UsageLimits::default()).await;
        assert_eq!(
            executor.live_workers(),
            kubecc_core::metrics::auto_concurrent_process_limit() as usize
        );
    }

    #[tokio::test]
    async fn test_resize_converges_to_latest_limits() {
        let executor = QueuedExecutor::new(limits(2));
        for n in [6, 1, 9, 3] {
            executor.set_usage_limits(limits(n));
        }
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if executor.worker_count().await == 3 && executor.live_workers() == 3 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("pool should settle on the latest limit");
    }
}
