//! Queue telemetry reporter
//!
//! Posts queue metrics on two cadences:
//! - slow: usage limits and completed task totals
//! - fast: task gauges and the queue status
//!
//! Both deadlines are jittered so a fleet of daemons does not report in lockstep.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kubecc_core::{
    QueueParams, QueueParamsCompleter, QueueStatus, QueueStatusCompleter, TaskStatus,
    TaskStatusCompleter,
};
use kubecc_run::QueuedExecutor;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::TelemetryReporterConfig;

/// Tasks completed since start, by where they ran
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TasksCompleted {
    pub local: u64,
    pub remote: u64,
}

/// Everything a reporter can read from a component
pub trait Completers:
    QueueParamsCompleter + TaskStatusCompleter + QueueStatusCompleter + Send + Sync
{
    fn tasks_completed(&self) -> TasksCompleted {
        TasksCompleted::default()
    }
}

impl Completers for QueuedExecutor {}

/// One telemetry sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Metric {
    QueueParams(QueueParams),
    TaskStatus(TaskStatus),
    QueueStatus { status: QueueStatus },
    TasksCompleted(TasksCompleted),
}

/// Destination for telemetry samples
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn post(&self, metric: Metric);
}

/// Writes samples to the debug log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl MetricsSink for LogSink {
    async fn post(&self, metric: Metric) {
        match serde_json::to_string(&metric) {
            Ok(json) => debug!(metric = %json, "Telemetry"),
            Err(e) => warn!(error = %e, "Failed to encode telemetry sample"),
        }
    }
}

fn queue_params(source: &dyn Completers) -> Metric {
    let mut params = QueueParams::default();
    source.complete_queue_params(&mut params);
    Metric::QueueParams(params)
}

fn task_status(source: &dyn Completers) -> Metric {
    let mut status = TaskStatus::default();
    source.complete_task_status(&mut status);
    Metric::TaskStatus(status)
}

fn queue_status(source: &dyn Completers) -> Metric {
    let mut status = QueueStatus::Available;
    source.complete_queue_status(&mut status);
    Metric::QueueStatus { status }
}

/// `interval` scaled by a random factor in `[1 - jitter, 1 + jitter]`
fn jittered(interval: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 {
        return interval;
    }
    let factor = rand::thread_rng().gen_range((1.0 - jitter)..=(1.0 + jitter));
    interval.mul_f64(factor.max(0.0))
}

pub struct TelemetryReporter {
    config: TelemetryReporterConfig,
    source: Arc<dyn Completers>,
    sink: Arc<dyn MetricsSink>,
}

impl TelemetryReporter {
    pub fn new(
        config: TelemetryReporterConfig,
        source: Arc<dyn Completers>,
        sink: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            config,
            source,
            sink,
        }
    }

    /// Starts reporting until `shutdown` is cancelled.
    ///
    /// Queue params are posted once up front so consumers have limits
    /// before the first gauge arrives.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            if !self.config.enabled {
                debug!("Telemetry reporter disabled");
                return;
            }
            self.sink.post(queue_params(self.source.as_ref())).await;

            let jitter = self.config.jitter;
            let mut slow = Instant::now() + jittered(self.config.slow_interval, jitter);
            let mut fast = Instant::now() + jittered(self.config.fast_interval, jitter);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep_until(slow) => {
                        self.sink.post(queue_params(self.source.as_ref())).await;
                        self.sink
                            .post(Metric::TasksCompleted(self.source.tasks_completed()))
                            .await;
                        slow = Instant::now() + jittered(self.config.slow_interval, jitter);
                    }
                    _ = tokio::time::sleep_until(fast) => {
                        self.sink.post(task_status(self.source.as_ref())).await;
                        self.sink.post(queue_status(self.source.as_ref())).await;
                        fast = Instant::now() + jittered(self.config.fast_interval, jitter);
                    }
                }
            }
            debug!("Telemetry reporter stopped");
        })
    }
}
