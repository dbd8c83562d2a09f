//! Worker pool
//!
//! A dynamic set of workers that run items pulled from a [`TaskSource`].
//! The worker count can be changed at any time and admission of new items
//! can be paused without interrupting work already in progress.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::pause::PauseController;
use super::source::TaskSource;

type RunFn<T> = Arc<dyn Fn(T) -> BoxFuture<'static, ()> + Send + Sync>;

/// A single-use handoff from the forwarder to an idle worker
type Slot<T> = oneshot::Sender<T>;

/// Worker pool options
#[derive(Debug, Clone, Default)]
pub struct WorkerPoolOptions {
    /// Start with admission paused
    pub paused: bool,
    /// Name used in log fields
    pub name: String,
}

impl WorkerPoolOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Start the pool paused instead of pausing it after creation, which
    /// would let the forwarder admit items in between.
    pub fn default_paused(mut self) -> Self {
        self.paused = true;
        self
    }
}

struct WorkerHandle {
    id: usize,
    stop: CancellationToken,
    join: JoinHandle<()>,
}

struct PoolInner<T> {
    name: String,
    runner: RunFn<T>,
    slots: mpsc::UnboundedSender<Slot<T>>,
    pause: PauseController,
    workers: Mutex<Vec<WorkerHandle>>,
    live: Arc<AtomicUsize>,
    next_id: AtomicUsize,
    shutdown: CancellationToken,
}

/// Dynamic pool of workers draining a shared source
pub struct WorkerPool<T> {
    inner: Arc<PoolInner<T>>,
    forwarder: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Creates a pool with no workers. Call [`set_worker_count`](Self::set_worker_count)
    /// to start some.
    pub fn new<S, F, Fut>(source: S, runner: F, options: WorkerPoolOptions) -> Self
    where
        S: TaskSource<T>,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (slots_tx, slots_rx) = mpsc::unbounded_channel();
        let pause = PauseController::new(options.paused);
        let shutdown = CancellationToken::new();
        let runner: RunFn<T> = Arc::new(move |item| runner(item).boxed());

        let forwarder = tokio::spawn(forward(
            options.name.clone(),
            source,
            slots_rx,
            pause.clone(),
            shutdown.clone(),
        ));

        Self {
            inner: Arc::new(PoolInner {
                name: options.name,
                runner,
                slots: slots_tx,
                pause,
                workers: Mutex::new(Vec::new()),
                live: Arc::new(AtomicUsize::new(0)),
                next_id: AtomicUsize::new(0),
                shutdown,
            }),
            forwarder: parking_lot::Mutex::new(Some(forwarder)),
        }
    }

    /// Resizes the pool to `count` workers.
    ///
    /// Growing spawns workers immediately. Shrinking signals the excess
    /// workers to stop and waits until they have finished their current
    /// item and exited. Concurrent calls are serialized.
    pub async fn set_worker_count(&self, count: usize) {
        let mut workers = self.inner.workers.lock().await;
        let current = workers.len();

        if count > current {
            for _ in current..count {
                workers.push(self.spawn_worker());
            }
            debug!(pool = %self.inner.name, from = current, to = count, "Worker pool grown");
        } else if count < current {
            let excess: Vec<WorkerHandle> = workers.drain(count..).collect();
            for worker in &excess {
                worker.stop.cancel();
            }
            for worker in excess {
                if let Err(e) = worker.join.await {
                    warn!(pool = %self.inner.name, worker = worker.id, error = %e, "Worker exited abnormally");
                }
            }
            debug!(pool = %self.inner.name, from = current, to = count, "Worker pool shrunk");
        }
    }

    fn spawn_worker(&self) -> WorkerHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let stop = self.inner.shutdown.child_token();
        let join = tokio::spawn(run_worker(
            id,
            self.inner.slots.clone(),
            stop.clone(),
            self.inner.runner.clone(),
            LiveGuard::new(self.inner.live.clone()),
        ));
        WorkerHandle { id, stop, join }
    }

    /// Number of workers the pool is sized for.
    pub async fn worker_count(&self) -> usize {
        self.inner.workers.lock().await.len()
    }

    /// Number of worker tasks currently alive.
    pub fn live_workers(&self) -> usize {
        self.inner.live.load(Ordering::SeqCst)
    }

    /// Stops admitting new items. Items already handed to workers keep running.
    pub fn pause(&self) {
        self.inner.pause.pause();
    }

    pub fn resume(&self) {
        self.inner.pause.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.inner.pause.is_paused()
    }

    /// Stops the forwarder and all workers, waiting for in-flight items to finish.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let forwarder = self.forwarder.lock().take();
        if let Some(forwarder) = forwarder {
            let _ = forwarder.await;
        }
        self.set_worker_count(0).await;
    }
}

impl<T> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

struct LiveGuard(Arc<AtomicUsize>);

impl LiveGuard {
    fn new(live: Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self(live)
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn run_worker<T: Send + 'static>(
    id: usize,
    slots: mpsc::UnboundedSender<Slot<T>>,
    stop: CancellationToken,
    runner: RunFn<T>,
    _live: LiveGuard,
) {
    trace!(worker = id, "Worker started");

    loop {
        let (slot, mut rx) = oneshot::channel();
        if slots.send(slot).is_err() {
            break;
        }

        let item = tokio::select! {
            biased;
            _ = stop.cancelled() => {
                // The forwarder may have filled the slot just before the stop
                // signal; closing first makes any later send fail back to it.
                rx.close();
                match rx.try_recv() {
                    Ok(item) => Some(item),
                    Err(_) => None,
                }
            }
            item = &mut rx => item.ok(),
        };

        match item {
            Some(item) => runner(item).await,
            None => break,
        }
        if stop.is_cancelled() {
            break;
        }
    }

    trace!(worker = id, "Worker stopped");
}

async fn forward<T, S>(
    name: String,
    source: S,
    mut slots: mpsc::UnboundedReceiver<Slot<T>>,
    pause: PauseController,
    shutdown: CancellationToken,
) where
    T: Send + 'static,
    S: TaskSource<T>,
{
    loop {
        // Wait for an idle worker before touching the source.
        let mut slot = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return,
            slot = slots.recv() => match slot {
                Some(slot) => slot,
                None => return,
            },
        };
        if slot.is_closed() {
            continue;
        }

        let item = loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return,
                _ = pause.wait_resumed() => {}
            }
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return,
                _ = pause.wait_paused() => continue,
                item = source.next() => break item,
            }
        };

        let Some(mut item) = item else {
            debug!(pool = %name, "Worker pool source closed");
            return;
        };

        // Hand off, retrying with the next idle worker if this one was stopped.
        loop {
            match slot.send(item) {
                Ok(()) => break,
                Err(returned) => {
                    item = returned;
                    slot = tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => return,
                        slot = slots.recv() => match slot {
                            Some(slot) => slot,
                            None => return,
                        },
                    };
                }
            }
        }
    }
}
