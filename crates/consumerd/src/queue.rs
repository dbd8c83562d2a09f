//! Split queue
//!
//! Races each request between a local worker pool and a remote worker pool
//! that both drain one shared input channel. A pool only pulls from the
//! channel when one of its workers is idle, so a request goes to whichever
//! side is free first.
//!
//! ```text
//!                        ┌──► local pool  (sized to the local process limit)
//! exec ──► input ────────┤        ▲
//!            ▲           │        └── local-only (requests pinned to this host)
//!            │           └──► remote pool (paused while no scheduler is available)
//!            │                    │
//!            └──── requeue ◄──────┘  retryable failure
//! ```
//!
//! A request that keeps bouncing off the remote side is pinned to the local
//! pool after `max_requeues` attempts.

use std::fmt;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;

use kubecc_core::{
    ClientContext, QueueParams, QueueParamsCompleter, RunResponse, TaskStatus, TaskStatusCompleter,
    UsageLimits,
};
use kubecc_run::{
    MergedSource, PackagedRequest, RequestError, RequestResult, SharedReceiver, WorkerPool,
    WorkerPoolOptions,
};
use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::availability::AvailabilityChecker;
use crate::config::SplitQueueConfig;

/// Side of the split queue that produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SplitTaskLocation {
    Unknown,
    Local,
    Remote,
}

impl fmt::Display for SplitTaskLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SplitTaskLocation::Unknown => "unknown",
            SplitTaskLocation::Local => "local",
            SplitTaskLocation::Remote => "remote",
        };
        f.write_str(s)
    }
}

/// One request packaged for both sides of the split queue
pub struct SplitTask {
    local: PackagedRequest<RunResponse>,
    remote: PackagedRequest<RunResponse>,
    client: ClientContext,
    requeues: u32,
}

/// Receiving half of a [`SplitTask`]
#[derive(Debug)]
pub struct SplitWait {
    local: oneshot::Receiver<RequestResult<RunResponse>>,
    remote: oneshot::Receiver<RequestResult<RunResponse>>,
}

impl SplitTask {
    /// Pairs the local and remote variants of a request. `client` is the
    /// request's context; a cancelled task is never requeued.
    pub fn new(
        local: (PackagedRequest<RunResponse>, oneshot::Receiver<RequestResult<RunResponse>>),
        remote: (PackagedRequest<RunResponse>, oneshot::Receiver<RequestResult<RunResponse>>),
        client: ClientContext,
    ) -> (Self, SplitWait) {
        let (local, local_rx) = local;
        let (remote, remote_rx) = remote;
        (
            Self {
                local,
                remote,
                client,
                requeues: 0,
            },
            SplitWait {
                local: local_rx,
                remote: remote_rx,
            },
        )
    }

    pub fn requeues(&self) -> u32 {
        self.requeues
    }

    fn is_cancelled(&self) -> bool {
        self.client.is_cancelled()
    }

    /// Nobody is waiting for either result anymore.
    fn is_abandoned(&self) -> bool {
        self.local.is_abandoned() && self.remote.is_abandoned()
    }
}

impl fmt::Debug for SplitTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SplitTask")
            .field("request_id", &self.client.request_id())
            .field("requeues", &self.requeues)
            .finish()
    }
}

impl SplitWait {
    /// Waits for whichever side delivers first.
    ///
    /// A task is only ever run by one side at a time and delivers a single
    /// result, so the other channel closes without a value once the task is
    /// dropped.
    pub async fn wait(self) -> (SplitTaskLocation, RequestResult<RunResponse>) {
        let SplitWait {
            mut local,
            mut remote,
        } = self;
        let mut local_open = true;
        let mut remote_open = true;
        loop {
            tokio::select! {
                result = &mut local, if local_open => match result {
                    Ok(result) => return (SplitTaskLocation::Local, result),
                    Err(_) => local_open = false,
                },
                result = &mut remote, if remote_open => match result {
                    Ok(result) => return (SplitTaskLocation::Remote, result),
                    Err(_) => remote_open = false,
                },
                else => {
                    return (
                        SplitTaskLocation::Unknown,
                        Err(RequestError::internal("split task dropped without a result")),
                    )
                }
            }
        }
    }
}

#[derive(Debug, Default)]
struct QueueStats {
    queued: AtomicI32,
    running: AtomicI32,
    delegated: AtomicI32,
    local_completed: AtomicU64,
    remote_completed: AtomicU64,
}

struct Gauge<'a>(&'a AtomicI32);

impl<'a> Gauge<'a> {
    fn increment(gauge: &'a AtomicI32) -> Self {
        gauge.fetch_add(1, Ordering::SeqCst);
        Self(gauge)
    }
}

impl Drop for Gauge<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// State shared by the pool runners
struct Shared {
    config: SplitQueueConfig,
    input: mpsc::Sender<SplitTask>,
    local_only: mpsc::Sender<SplitTask>,
    stats: QueueStats,
}

impl Shared {
    async fn run_local(self: Arc<Self>, mut task: SplitTask) {
        self.stats.queued.fetch_sub(1, Ordering::SeqCst);
        if task.is_abandoned() {
            trace!(?task, "Dropping abandoned task");
            return;
        }
        if task.is_cancelled() {
            task.local.deliver(Err(RequestError::Cancelled));
            return;
        }

        let result = {
            let _running = Gauge::increment(&self.stats.running);
            task.local.invoke().await
        };
        match result {
            Err(e) if e.is_retryable() && !task.is_cancelled() && task.requeues < self.config.max_requeues => {
                debug!(?task, error = %e, "Local attempt failed, requeueing");
                self.requeue(task, false);
            }
            result => {
                self.stats.local_completed.fetch_add(1, Ordering::Relaxed);
                task.local.deliver(result);
            }
        }
    }

    async fn run_remote(self: Arc<Self>, mut task: SplitTask) {
        self.stats.queued.fetch_sub(1, Ordering::SeqCst);
        if task.is_abandoned() {
            trace!(?task, "Dropping abandoned task");
            return;
        }
        if task.is_cancelled() {
            task.remote.deliver(Err(RequestError::Cancelled));
            return;
        }

        let result = {
            let _delegated = Gauge::increment(&self.stats.delegated);
            task.remote.invoke().await
        };
        match result {
            Err(e) if e.forces_local() => {
                debug!(?task, "Remote asked for a local run");
                self.requeue(task, true);
            }
            Err(e) if e.is_retryable() && !task.is_cancelled() => {
                let pin = task.requeues >= self.config.max_requeues;
                if pin {
                    warn!(?task, error = %e, "Requeue limit reached, running locally");
                } else {
                    debug!(?task, error = %e, "Remote attempt failed, requeueing");
                }
                self.requeue(task, pin);
            }
            result => {
                self.stats.remote_completed.fetch_add(1, Ordering::Relaxed);
                task.remote.deliver(result);
            }
        }
    }

    /// Offers the task again, on the shared input or to local workers only.
    ///
    /// Sending happens on a separate task so a worker never waits on a full
    /// input channel that only workers drain.
    fn requeue(&self, mut task: SplitTask, local_only: bool) {
        task.requeues += 1;
        self.stats.queued.fetch_add(1, Ordering::SeqCst);
        let tx = if local_only {
            self.local_only.clone()
        } else {
            self.input.clone()
        };
        let delay = self.config.requeue_delay;
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if let Err(mpsc::error::SendError(task)) = tx.send(task).await {
                warn!(?task, "Split queue closed, dropping requeued task");
            }
        });
    }
}

/// Races requests between local and remote execution
pub struct SplitQueue {
    shared: Arc<Shared>,
    local_workers: Arc<WorkerPool<SplitTask>>,
    remote_workers: Arc<WorkerPool<SplitTask>>,
    limits: RwLock<UsageLimits>,
    availability: Arc<AvailabilityChecker>,
    shutdown: CancellationToken,
    watcher: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl SplitQueue {
    /// Starts the queue with local workers sized to `limits` and the remote
    /// pool paused until `availability` reports a peer.
    pub async fn new(
        config: SplitQueueConfig,
        limits: UsageLimits,
        availability: Arc<AvailabilityChecker>,
    ) -> Self {
        let limits = limits.checked();
        let (input_tx, input_rx) = mpsc::channel(config.buffer_size.max(1));
        let (local_tx, local_rx) = mpsc::channel(config.buffer_size.max(1));
        let input = SharedReceiver::new(input_rx);
        let local_only = SharedReceiver::new(local_rx);

        let shared = Arc::new(Shared {
            config: config.clone(),
            input: input_tx,
            local_only: local_tx,
            stats: QueueStats::default(),
        });

        let local_shared = shared.clone();
        let local_workers = Arc::new(WorkerPool::new(
            MergedSource::new(local_only, input.clone()),
            move |task| local_shared.clone().run_local(task),
            WorkerPoolOptions::new("split-local"),
        ));
        let remote_shared = shared.clone();
        let remote_workers = Arc::new(WorkerPool::new(
            input,
            move |task| remote_shared.clone().run_remote(task),
            WorkerPoolOptions::new("split-remote").default_paused(),
        ));

        local_workers
            .set_worker_count(limits.concurrent_process_limit as usize)
            .await;
        remote_workers.set_worker_count(config.remote_worker_limit).await;

        let shutdown = CancellationToken::new();
        let watcher = tokio::spawn(follow_availability(
            availability.clone(),
            remote_workers.clone(),
            shutdown.clone(),
        ));

        info!(
            local_workers = limits.concurrent_process_limit,
            remote_workers = config.remote_worker_limit,
            buffer_size = config.buffer_size,
            "Split queue started"
        );

        Self {
            shared,
            local_workers,
            remote_workers,
            limits: RwLock::new(limits),
            availability,
            shutdown,
            watcher: parking_lot::Mutex::new(Some(watcher)),
        }
    }

    /// Queues `task`. Waits only while the input channel is full.
    pub async fn exec(&self, task: SplitTask) -> RequestResult<()> {
        self.shared.stats.queued.fetch_add(1, Ordering::SeqCst);
        if self.shared.input.send(task).await.is_err() {
            self.shared.stats.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(RequestError::internal("split queue is shut down"));
        }
        Ok(())
    }

    /// Resizes the local side to the new process limit. Panics if `limits`
    /// do not validate.
    pub async fn set_usage_limits(&self, limits: UsageLimits) {
        let limits = limits.checked();
        *self.limits.write() = limits;
        self.local_workers
            .set_worker_count(limits.concurrent_process_limit as usize)
            .await;
    }

    pub fn availability(&self) -> &Arc<AvailabilityChecker> {
        &self.availability
    }

    pub fn remote_paused(&self) -> bool {
        self.remote_workers.is_paused()
    }

    pub fn num_queued(&self) -> i32 {
        self.shared.stats.queued.load(Ordering::SeqCst)
    }

    pub fn num_running(&self) -> i32 {
        self.shared.stats.running.load(Ordering::SeqCst)
    }

    pub fn num_delegated(&self) -> i32 {
        self.shared.stats.delegated.load(Ordering::SeqCst)
    }

    pub fn local_completed(&self) -> u64 {
        self.shared.stats.local_completed.load(Ordering::Relaxed)
    }

    pub fn remote_completed(&self) -> u64 {
        self.shared.stats.remote_completed.load(Ordering::Relaxed)
    }

    /// Stops both pools after their in-flight tasks finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let watcher = self.watcher.lock().take();
        if let Some(watcher) = watcher {
            let _ = watcher.await;
        }
        self.local_workers.shutdown().await;
        self.remote_workers.shutdown().await;
    }
}

impl Drop for SplitQueue {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Resumes the remote pool while a peer is available and pauses it otherwise.
async fn follow_availability(
    availability: Arc<AvailabilityChecker>,
    remote_workers: Arc<WorkerPool<SplitTask>>,
    shutdown: CancellationToken,
) {
    loop {
        let mut token = tokio::select! {
            _ = shutdown.cancelled() => return,
            token = availability.ensure_available() => token,
        };
        remote_workers.resume();
        debug!("Remote is now available");

        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = token.lost() => {}
        }
        remote_workers.pause();
        debug!("Remote is no longer available");
    }
}

impl QueueParamsCompleter for SplitQueue {
    fn complete_queue_params(&self, params: &mut QueueParams) {
        *params = QueueParams::from(*self.limits.read());
    }
}

impl TaskStatusCompleter for SplitQueue {
    fn complete_task_status(&self, status: &mut TaskStatus) {
        status.num_queued = self.num_queued();
        status.num_running = self.num_running();
        status.num_delegated = self.num_delegated();
    }
}
