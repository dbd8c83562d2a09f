//! Run mode selection for incoming requests.

use kubecc_core::QueueStatus;
use kubecc_run::{ArgParser, RunMode};

/// Decides where a parsed request may run.
///
/// A request runs only on this host when there is no scheduler connection,
/// when local workers are idle, or when its arguments cannot be compiled
/// elsewhere. Every other request goes to the split queue.
pub fn decide_run_mode(
    remote_connected: bool,
    local_status: QueueStatus,
    parser: &dyn ArgParser,
) -> RunMode {
    if !remote_connected || local_status == QueueStatus::Available || !parser.can_run_remote() {
        RunMode::RunLocal
    } else {
        RunMode::RunRemote
    }
}
