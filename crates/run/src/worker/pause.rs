//! Pause/resume gate backed by a watch channel.

use tokio::sync::watch;

/// Shared paused flag that tasks can wait on
///
/// Every waiter wakes on each transition, so any number of tasks can block
/// on [`wait_resumed`](Self::wait_resumed) at once.
#[derive(Debug, Clone)]
pub struct PauseController {
    tx: watch::Sender<bool>,
}

impl PauseController {
    pub fn new(paused: bool) -> Self {
        let (tx, _rx) = watch::channel(paused);
        Self { tx }
    }

    pub fn pause(&self) {
        self.tx.send_if_modified(|paused| !std::mem::replace(paused, true));
    }

    pub fn resume(&self) {
        self.tx.send_if_modified(|paused| std::mem::replace(paused, false));
    }

    pub fn is_paused(&self) -> bool {
        *self.tx.borrow()
    }

    /// Returns once the gate is open.
    pub async fn wait_resumed(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|paused| !*paused).await;
    }

    /// Returns once the gate is closed.
    pub async fn wait_paused(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|paused| *paused).await;
    }
}

impl Default for PauseController {
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_resumed_returns_immediately_when_open() {
        let pause = PauseController::default();
        tokio::time::timeout(Duration::from_millis(100), pause.wait_resumed())
            .await
            .expect("gate should be open");
    }

    #[tokio::test]
    async fn test_resume_wakes_all_waiters() {
        let pause = PauseController::new(true);
        let mut waiters = Vec::new();
        for _ in 0..8 {
            let pause = pause.clone();
            waiters.push(tokio::spawn(async move { pause.wait_resumed().await }));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(waiters.iter().all(|w| !w.is_finished()));

        pause.resume();
        for waiter in waiters {
            tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .expect("waiter should wake")
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_wait_paused() {
        let pause = PauseController::default();
        let waiter = {
            let pause = pause.clone();
            tokio::spawn(async move { pause.wait_paused().await })
        };
        pause.pause();
        assert!(pause.is_paused());
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }
}
