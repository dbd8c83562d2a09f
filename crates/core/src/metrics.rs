//! Usage limits, queue status and telemetry snapshots.
//!
//! Executors report their state by filling snapshot structs through the
//! completer traits. Completers must only read atomics or clone immutable
//! values so that a reporter can call them at any time without blocking
//! the executor.

use crate::error::LimitsError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Process limit value meaning "use the host CPU count"
pub const AUTO_PROCESS_LIMIT: i32 = -1;

/// Number of CPUs available to this process, falling back to 1
pub fn auto_concurrent_process_limit() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(1)
}

// ============================================================================
// Usage Limits
// ============================================================================

/// Admission policy for a queued executor
///
/// Replaced as a whole whenever the host's resource budget changes; never
/// patched in place.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UsageLimits {
    /// Maximum simultaneously running tasks, or [`AUTO_PROCESS_LIMIT`]
    pub concurrent_process_limit: i32,
    /// Queue depth (as a multiple of the process limit) at which pressure is reported
    pub queue_pressure_multiplier: f64,
    /// Queue depth (as a multiple of the process limit) at which the queue is full
    pub queue_reject_multiplier: f64,
}

impl Default for UsageLimits {
    fn default() -> Self {
        Self {
            concurrent_process_limit: AUTO_PROCESS_LIMIT,
            queue_pressure_multiplier: 1.5,
            queue_reject_multiplier: 2.0,
        }
    }
}

impl UsageLimits {
    pub fn new(concurrent_process_limit: i32) -> Self {
        Self {
            concurrent_process_limit,
            ..Default::default()
        }
    }

    pub fn with_queue_pressure_multiplier(mut self, multiplier: f64) -> Self {
        self.queue_pressure_multiplier = multiplier;
        self
    }

    pub fn with_queue_reject_multiplier(mut self, multiplier: f64) -> Self {
        self.queue_reject_multiplier = multiplier;
        self
    }

    pub fn validate(&self) -> Result<(), LimitsError> {
        if self.concurrent_process_limit != AUTO_PROCESS_LIMIT && self.concurrent_process_limit < 1
        {
            return Err(LimitsError::InvalidProcessLimit(
                self.concurrent_process_limit,
            ));
        }
        if !(self.queue_pressure_multiplier >= 1.0) {
            return Err(LimitsError::InvalidMultiplier {
                name: "queue pressure",
                value: self.queue_pressure_multiplier,
            });
        }
        if !(self.queue_reject_multiplier >= 1.0) {
            return Err(LimitsError::InvalidMultiplier {
                name: "queue reject",
                value: self.queue_reject_multiplier,
            });
        }
        if self.queue_reject_multiplier < self.queue_pressure_multiplier {
            return Err(LimitsError::RejectBelowPressure {
                pressure: self.queue_pressure_multiplier,
                reject: self.queue_reject_multiplier,
            });
        }
        Ok(())
    }

    /// Returns a copy with an auto process limit replaced by the host CPU count.
    pub fn resolved(&self) -> Self {
        let mut limits = *self;
        if limits.concurrent_process_limit == AUTO_PROCESS_LIMIT {
            limits.concurrent_process_limit = auto_concurrent_process_limit();
        }
        limits
    }

    /// Resolves an auto process limit and checks the result.
    ///
    /// # Panics
    ///
    /// Panics if the limits do not [`validate`](Self::validate). Executors size
    /// their pools from these limits, so callers taking limits from outside
    /// must validate them first.
    pub fn checked(&self) -> Self {
        let limits = self.resolved();
        if let Err(e) = limits.validate() {
            panic!("usage limits must be validated before use: {e}");
        }
        limits
    }
}

// ============================================================================
// Queue Status
// ============================================================================

/// Load classification of a queued executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Fewer tasks running than the process limit
    Available,
    /// At the process limit, tasks are waiting
    Queueing,
    /// Queue depth passed the pressure threshold
    QueuePressure,
    /// Queue depth passed the reject threshold
    QueueFull,
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QueueStatus::Available => "available",
            QueueStatus::Queueing => "queueing",
            QueueStatus::QueuePressure => "queue_pressure",
            QueueStatus::QueueFull => "queue_full",
        };
        f.write_str(s)
    }
}

/// Classifies a queue from its gauges.
///
/// The limits are expected to be resolved (no auto process limit).
pub fn queue_status(running: i32, queued: i32, limits: &UsageLimits) -> QueueStatus {
    let limit = f64::from(limits.concurrent_process_limit);
    if running < limits.concurrent_process_limit {
        QueueStatus::Available
    } else if f64::from(queued) < limit * limits.queue_pressure_multiplier {
        QueueStatus::Queueing
    } else if f64::from(queued) < limit * limits.queue_reject_multiplier {
        QueueStatus::QueuePressure
    } else {
        QueueStatus::QueueFull
    }
}

// ============================================================================
// Snapshots
// ============================================================================

/// Usage limits as reported to telemetry
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueParams {
    pub concurrent_process_limit: i32,
    pub queue_pressure_multiplier: f64,
    pub queue_reject_multiplier: f64,
}

impl From<UsageLimits> for QueueParams {
    fn from(limits: UsageLimits) -> Self {
        Self {
            concurrent_process_limit: limits.concurrent_process_limit,
            queue_pressure_multiplier: limits.queue_pressure_multiplier,
            queue_reject_multiplier: limits.queue_reject_multiplier,
        }
    }
}

/// Task gauges as reported to telemetry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub num_running: i32,
    pub num_queued: i32,
    /// Tasks handed to an unqueued (remote) executor
    pub num_delegated: i32,
}

pub trait QueueParamsCompleter {
    fn complete_queue_params(&self, params: &mut QueueParams);
}

pub trait TaskStatusCompleter {
    fn complete_task_status(&self, status: &mut TaskStatus);
}

pub trait QueueStatusCompleter {
    fn complete_queue_status(&self, status: &mut QueueStatus);
}
