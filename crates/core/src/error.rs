//! Errors for values defined in this crate.

use thiserror::Error;

/// Rejected usage limits
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LimitsError {
    /// Concurrency limit must be positive (or -1 for auto)
    #[error("invalid concurrent process limit: {0}")]
    InvalidProcessLimit(i32),

    /// Multipliers must be at least 1.0
    #[error("invalid {name} multiplier: {value} (must be >= 1.0)")]
    InvalidMultiplier { name: &'static str, value: f64 },

    /// Reject threshold below pressure threshold
    #[error("queue reject multiplier ({reject}) is lower than queue pressure multiplier ({pressure})")]
    RejectBelowPressure { pressure: f64, reject: f64 },
}
