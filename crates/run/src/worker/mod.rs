//! Resizable worker pools
//!
//! This module provides:
//! - [`WorkerPool`] - A dynamic set of workers pulling items from a shared source
//! - [`PauseController`] - Pause/resume gate for the pool's admission of new items
//! - [`TaskSource`] / [`SharedReceiver`] - Upstream sources a pool can drain
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         WorkerPool                            │
//! │                                                               │
//! │   TaskSource ──► Forwarder ──(slot)──► Worker 1 ─► runner(T)  │
//! │                    ▲   │                Worker 2 ─► runner(T)  │
//! │      PauseController   └──(slot)──►     Worker N ─► runner(T)  │
//! │                                                               │
//! │   idle workers request a slot; the forwarder only pulls from  │
//! │   the source once it holds a slot and the pool is not paused  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Because the forwarder never pulls an item without an idle worker to hand
//! it to, two pools draining the same source split the work according to
//! which one has free capacity first.

mod pause;
mod pool;
mod source;

pub use pause::PauseController;
pub use pool::{WorkerPool, WorkerPoolOptions};
pub use source::{MergedSource, SharedReceiver, TaskSource};
