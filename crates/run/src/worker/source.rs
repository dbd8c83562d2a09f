//! Upstream sources for worker pools.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Where a worker pool pulls its items from
///
/// `next` must be cancel safe: if the returned future is dropped before it
/// completes, no item may be lost. The pool drops a pending `next` when it
/// is paused or shut down.
#[async_trait]
pub trait TaskSource<T>: Send + Sync + 'static {
    /// Next item, or `None` once the source is closed and drained.
    async fn next(&self) -> Option<T>;
}

/// A channel receiver that several consumers can pull from
///
/// Consumers take turns holding the lock while they wait, so each item is
/// received by exactly one of them.
#[derive(Debug)]
pub struct SharedReceiver<T> {
    rx: Arc<Mutex<mpsc::Receiver<T>>>,
}

impl<T> SharedReceiver<T> {
    pub fn new(rx: mpsc::Receiver<T>) -> Self {
        Self {
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    pub async fn recv(&self) -> Option<T> {
        self.rx.lock().await.recv().await
    }
}

impl<T> Clone for SharedReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
        }
    }
}

#[async_trait]
impl<T: Send + 'static> TaskSource<T> for SharedReceiver<T> {
    async fn next(&self) -> Option<T> {
        self.recv().await
    }
}

#[async_trait]
impl<T: Send + 'static> TaskSource<T> for Mutex<mpsc::UnboundedReceiver<T>> {
    async fn next(&self) -> Option<T> {
        self.lock().await.recv().await
    }
}

/// Two sources drained with priority given to the first
///
/// Closes only once both sources are closed.
pub struct MergedSource<T> {
    priority: SharedReceiver<T>,
    shared: SharedReceiver<T>,
}

impl<T> MergedSource<T> {
    pub fn new(priority: SharedReceiver<T>, shared: SharedReceiver<T>) -> Self {
        Self { priority, shared }
    }
}

#[async_trait]
impl<T: Send + 'static> TaskSource<T> for MergedSource<T> {
    async fn next(&self) -> Option<T> {
        let mut priority_open = true;
        let mut shared_open = true;
        loop {
            tokio::select! {
                biased;
                item = self.priority.recv(), if priority_open => match item {
                    Some(item) => return Some(item),
                    None => priority_open = false,
                },
                item = self.shared.recv(), if shared_open => match item {
                    Some(item) => return Some(item),
                    None => shared_open = false,
                },
                else => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_shared_receiver_delivers_each_item_once() {
        let (tx, rx) = mpsc::channel(16);
        let shared = SharedReceiver::new(rx);
        for i in 0..10 {
            tx.send(i).await.unwrap();
        }
        drop(tx);

        let a = shared.clone();
        let b = shared.clone();
        let ha = tokio::spawn(async move {
            let mut got = Vec::new();
            while let Some(i) = a.next().await {
                got.push(i);
            }
            got
        });
        let hb = tokio::spawn(async move {
            let mut got = Vec::new();
            while let Some(i) = b.next().await {
                got.push(i);
            }
            got
        });
        let mut all = ha.await.unwrap();
        all.extend(hb.await.unwrap());
        all.sort();
        assert_eq!(all, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_merged_source_prefers_priority() {
        let (ptx, prx) = mpsc::channel(4);
        let (stx, srx) = mpsc::channel(4);
        let merged = MergedSource::new(SharedReceiver::new(prx), SharedReceiver::new(srx));

        stx.send("shared").await.unwrap();
        ptx.send("priority").await.unwrap();
        assert_eq!(merged.next().await, Some("priority"));
        assert_eq!(merged.next().await, Some("shared"));

        drop(ptx);
        let pending = tokio::time::timeout(Duration::from_millis(20), merged.next()).await;
        assert!(pending.is_err(), "shared side is still open");

        drop(stx);
        assert_eq!(merged.next().await, None);
    }
}
