// ── Controllers ──
//
// Each controller owns at most one session. The synchronous core
// (`start` / `handle_event` / `check_timeout` / `stop`) does all state
// mutation; the async `run` driver is a single loop that selects over
// cancellation, the session's next deadline, and the event bus, so no
// transition ever races another.

pub mod dfu;
pub mod harness;
pub mod ota;
pub mod provision;

use tokio::time::Instant;

pub use dfu::DfuDistributionController;
pub use harness::{HarnessReport, HarnessStage, HarnessStatus, ScanProvisionCycle, ScanProvisionHarness};
pub use ota::{OtaTransferController, parse_app_version};
pub use provision::ProvisioningController;

/// Sleep until `deadline`, or forever when there is none.
pub(crate) async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Earliest of a set of optional deadlines.
pub(crate) fn earliest(deadlines: impl IntoIterator<Item = Option<Instant>>) -> Option<Instant> {
    deadlines.into_iter().flatten().min()
}
