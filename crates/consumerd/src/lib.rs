// Kubecc Consumer Daemon
//
// Accepts compiler invocations on a developer machine and decides where
// each one runs.
//
// Key design decisions:
// - Local and remote workers race for requests on one shared channel
// - The remote side only pulls work while the scheduler is reported live
// - Requests bouncing off the remote too often are pinned to local workers
// - Queue telemetry is read through completer traits, never by locking the executors

pub mod availability;
pub mod config;
pub mod error;
pub mod mode;
pub mod queue;
pub mod reporter;
pub mod server;

pub use availability::{
    watch_availability, AvailabilityChecker, AvailabilityEvent, AvailableToken, RemoteStatus,
};
pub use config::{load_dotenv, ConsumerdConfig, SplitQueueConfig, TelemetryReporterConfig};
pub use error::{ConfigError, ConsumerdError};
pub use mode::decide_run_mode;
pub use queue::{SplitQueue, SplitTask, SplitTaskLocation, SplitWait};
pub use reporter::{Completers, LogSink, Metric, MetricsSink, TasksCompleted, TelemetryReporter};
pub use server::Consumerd;
