// Kubecc Core Types
//
// Shared vocabulary for every kubecc component.
//
// Key design decisions:
// - Toolchain descriptors are plain values compared by equivalence, not identity
// - Usage limits are replaced wholesale, so they are immutable once built
// - Server and client contexts are explicit structs carried by value, never a key-value bag
// - Queue telemetry is exposed through small completer traits that fill snapshots

pub mod context;
pub mod duration_millis;
pub mod error;
pub mod metrics;
pub mod telemetry;
pub mod toolchain;
pub mod types;

// Re-exports for convenience
pub use context::{ClientContext, Component, Contexts, ServerContext};
pub use error::LimitsError;
pub use metrics::{
    queue_status, QueueParams, QueueParamsCompleter, QueueStatus, QueueStatusCompleter,
    TaskStatus, TaskStatusCompleter, UsageLimits,
};
pub use telemetry::spans;
pub use toolchain::{Toolchain, ToolchainKind, ToolchainLang};
pub use types::{
    CompileRequest, CompileResponse, CompileResult, RetryAction, RunRequest, RunResponse,
};
