//! Remote availability tracking
//!
//! [`AvailabilityChecker`] follows a liveness feed for one kind of peer
//! (normally the scheduler) and lets tasks wait until a peer is up.
//!
//! ```text
//! Unknown ──peer added──► Available ──last peer removed──► Unavailable
//!                             ▲                                  │
//!                             └──────────peer added──────────────┘
//! ```

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use kubecc_core::Component;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteStatus {
    Unknown,
    Unavailable,
    Available,
}

impl fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RemoteStatus::Unknown => "unknown",
            RemoteStatus::Unavailable => "unavailable",
            RemoteStatus::Available => "available",
        };
        f.write_str(s)
    }
}

/// Liveness event from the peer feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AvailabilityEvent {
    PeerAdded { id: Uuid, component: Component },
    PeerRemoved { id: Uuid },
    /// Explicit health report for a known peer
    HealthChanged { id: Uuid, healthy: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct State {
    status: RemoteStatus,
    /// Incremented each time the status becomes `Available`
    epoch: u64,
}

/// Tracks whether any peer of the watched component is live
pub struct AvailabilityChecker {
    component: Component,
    peers: Mutex<HashSet<Uuid>>,
    state: watch::Sender<State>,
}

impl AvailabilityChecker {
    pub fn new(component: Component) -> Self {
        let (state, _rx) = watch::channel(State {
            status: RemoteStatus::Unknown,
            epoch: 0,
        });
        Self {
            component,
            peers: Mutex::new(HashSet::new()),
            state,
        }
    }

    pub fn component(&self) -> Component {
        self.component
    }

    pub fn status(&self) -> RemoteStatus {
        self.state.borrow().status
    }

    pub fn is_available(&self) -> bool {
        self.status() == RemoteStatus::Available
    }

    /// Waits until a peer is available.
    ///
    /// The returned token resolves once availability is lost. Every caller
    /// waiting here wakes on the same transition.
    pub async fn ensure_available(&self) -> AvailableToken {
        let mut rx = self.state.subscribe();
        let epoch = match rx.wait_for(|s| s.status == RemoteStatus::Available).await {
            Ok(state) => state.epoch,
            // The sender lives in `self`
            Err(_) => 0,
        };
        AvailableToken { rx, epoch }
    }

    /// Applies one feed event.
    pub fn handle_event(&self, event: AvailabilityEvent) {
        let mut peers = self.peers.lock();
        match event {
            AvailabilityEvent::PeerAdded { id, component } => {
                if component != self.component {
                    return;
                }
                peers.insert(id);
            }
            AvailabilityEvent::PeerRemoved { id } => {
                peers.remove(&id);
            }
            AvailabilityEvent::HealthChanged { id, healthy } => {
                if healthy {
                    // Health reports only arrive for peers we were told about
                    if !peers.contains(&id) {
                        return;
                    }
                } else {
                    peers.remove(&id);
                }
            }
        }
        let status = if peers.is_empty() {
            RemoteStatus::Unavailable
        } else {
            RemoteStatus::Available
        };
        drop(peers);
        self.set_status(status);
    }

    fn set_status(&self, status: RemoteStatus) {
        let changed = self.state.send_if_modified(|state| {
            if state.status == status {
                return false;
            }
            if status == RemoteStatus::Available {
                state.epoch += 1;
            }
            state.status = status;
            true
        });
        if changed {
            info!(component = %self.component, %status, "Remote availability changed");
        }
    }
}

impl fmt::Debug for AvailabilityChecker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AvailabilityChecker")
            .field("component", &self.component)
            .field("status", &self.status())
            .field("peers", &self.peers.lock().len())
            .finish()
    }
}

/// Held while a peer is available; resolves when availability is lost
#[derive(Debug)]
pub struct AvailableToken {
    rx: watch::Receiver<State>,
    epoch: u64,
}

impl AvailableToken {
    fn is_lost_in(&self, state: &State) -> bool {
        state.status != RemoteStatus::Available || state.epoch != self.epoch
    }

    pub fn is_lost(&self) -> bool {
        self.is_lost_in(&self.rx.borrow())
    }

    /// Resolves once the availability this token was issued for has ended.
    /// Returns immediately if it already has.
    pub async fn lost(&mut self) {
        let epoch = self.epoch;
        let _ = self
            .rx
            .wait_for(|s| s.status != RemoteStatus::Available || s.epoch != epoch)
            .await;
    }
}

/// Feeds events from `feed` into `checker` until the feed closes or
/// `shutdown` is cancelled.
pub fn watch_availability(
    checker: Arc<AvailabilityChecker>,
    mut feed: mpsc::Receiver<AvailabilityEvent>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = feed.recv() => match event {
                    Some(event) => {
                        debug!(?event, "Availability event");
                        checker.handle_event(event);
                    }
                    None => {
                        debug!("Availability feed closed");
                        break;
                    }
                },
            }
        }
    })
}
