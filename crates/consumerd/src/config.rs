//! Consumerd configuration
//!
//! Every setting has a default and can be overridden from the environment.
//! [`load_dotenv`] reads a `.env` file first when one exists.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use kubecc_core::UsageLimits;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ConfigError;

/// Loads `.env` from the working directory or its parents, if present.
pub fn load_dotenv() -> Option<PathBuf> {
    match dotenvy::dotenv() {
        Ok(path) => {
            debug!(path = %path.display(), "Loaded .env file");
            Some(path)
        }
        Err(e) if e.not_found() => None,
        Err(e) => {
            warn!(error = %e, "Failed to load .env file");
            None
        }
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { name, value }),
        None => Ok(None),
    }
}

// =============================================================================
// Split queue
// =============================================================================

/// Split queue tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitQueueConfig {
    /// Capacity of the shared input channel
    pub buffer_size: usize,
    /// Number of remote workers, i.e. requests in flight to the scheduler
    pub remote_worker_limit: usize,
    /// Times a request may be requeued before it is pinned to local workers
    pub max_requeues: u32,
    /// Delay before a requeued request is offered again
    #[serde(with = "kubecc_core::duration_millis")]
    pub requeue_delay: Duration,
}

impl Default for SplitQueueConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1000,
            remote_worker_limit: 100,
            max_requeues: 8,
            requeue_delay: Duration::ZERO,
        }
    }
}

impl SplitQueueConfig {
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    pub fn with_remote_worker_limit(mut self, limit: usize) -> Self {
        self.remote_worker_limit = limit;
        self
    }

    pub fn with_max_requeues(mut self, max: u32) -> Self {
        self.max_requeues = max;
        self
    }

    pub fn with_requeue_delay(mut self, delay: Duration) -> Self {
        self.requeue_delay = delay;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid("split queue buffer size must be positive".into()));
        }
        Ok(())
    }
}

// =============================================================================
// Telemetry reporter
// =============================================================================

/// How often queue telemetry is posted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryReporterConfig {
    pub enabled: bool,
    /// Usage limits and totals
    #[serde(with = "kubecc_core::duration_millis")]
    pub slow_interval: Duration,
    /// Task and queue status
    #[serde(with = "kubecc_core::duration_millis")]
    pub fast_interval: Duration,
    /// Fraction of the interval each tick may deviate by
    pub jitter: f64,
}

impl Default for TelemetryReporterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            slow_interval: Duration::from_secs(5),
            fast_interval: Duration::from_millis(166),
            jitter: 0.25,
        }
    }
}

impl TelemetryReporterConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    pub fn with_intervals(mut self, slow: Duration, fast: Duration) -> Self {
        self.slow_interval = slow;
        self.fast_interval = fast;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }
}

// =============================================================================
// Consumerd
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ConsumerdConfig {
    pub usage_limits: UsageLimits,
    pub split_queue: SplitQueueConfig,
    pub telemetry: TelemetryReporterConfig,
}

impl ConsumerdConfig {
    /// Reads the configuration from `KUBECC_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`, which maps a variable name to its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(limit) = parse_var(&lookup, "KUBECC_CONCURRENT_PROCESS_LIMIT")? {
            config.usage_limits.concurrent_process_limit = limit;
        }
        if let Some(m) = parse_var(&lookup, "KUBECC_QUEUE_PRESSURE_MULTIPLIER")? {
            config.usage_limits.queue_pressure_multiplier = m;
        }
        if let Some(m) = parse_var(&lookup, "KUBECC_QUEUE_REJECT_MULTIPLIER")? {
            config.usage_limits.queue_reject_multiplier = m;
        }
        if let Some(size) = parse_var(&lookup, "KUBECC_SPLIT_BUFFER_SIZE")? {
            config.split_queue.buffer_size = size;
        }
        if let Some(limit) = parse_var(&lookup, "KUBECC_REMOTE_WORKER_LIMIT")? {
            config.split_queue.remote_worker_limit = limit;
        }
        if let Some(max) = parse_var(&lookup, "KUBECC_MAX_REQUEUES")? {
            config.split_queue.max_requeues = max;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "KUBECC_REQUEUE_DELAY_MS")? {
            config.split_queue.requeue_delay = Duration::from_millis(ms);
        }
        if let Some(enabled) = parse_var(&lookup, "KUBECC_TELEMETRY_ENABLED")? {
            config.telemetry.enabled = enabled;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_usage_limits(mut self, limits: UsageLimits) -> Self {
        self.usage_limits = limits;
        self
    }

    pub fn with_split_queue(mut self, split_queue: SplitQueueConfig) -> Self {
        self.split_queue = split_queue;
        self
    }

    pub fn with_telemetry(mut self, telemetry: TelemetryReporterConfig) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.usage_limits.validate()?;
        self.split_queue.validate()
    }
}
