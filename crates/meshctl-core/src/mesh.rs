// ── Mesh stack collaborator ──
//
// The narrow command surface the controllers drive. Every command
// returns an immediate result code; long-running ones report their
// outcome later on the event bus.

use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::model::{DeviceId, DeviceRef, DfuKind, FirmwareMetadata, NodeInfo};

/// Immediate result of a mesh-stack command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultCode {
    Success,
    InvalidArguments,
    /// Also the "network busy / mid key-refresh" signal.
    InvalidState,
    Other(i32),
}

impl ResultCode {
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            0 => Self::Success,
            1 => Self::InvalidArguments,
            2 => Self::InvalidState,
            other => Self::Other(other),
        }
    }

    pub fn raw(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::InvalidArguments => 1,
            Self::InvalidState => 2,
            Self::Other(v) => v,
        }
    }

    pub fn is_success(self) -> bool {
        self == Self::Success
    }

    /// `Ok(())` on success, otherwise the translated [`CoreError`](crate::CoreError).
    pub fn into_result(self, operation: &str) -> Result<(), crate::CoreError> {
        if self.is_success() {
            Ok(())
        } else {
            Err(crate::CoreError::from_code(operation, self))
        }
    }
}

impl From<i32> for ResultCode {
    fn from(raw: i32) -> Self {
        Self::from_raw(raw)
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw())
    }
}

/// Commands the controllers issue against the mesh stack.
///
/// Implementations must be cheap to call from the controller's event
/// loop: commands are fire-and-forget and return without waiting for
/// the radio. Rename and delete resolve once the stack has an answer.
pub trait MeshStack: Send + Sync + 'static {
    // ── Scanning ─────────────────────────────────────────────────────
    fn start_scan(&self) -> ResultCode;
    fn stop_scan(&self) -> ResultCode;

    // ── Provisioning and node management ─────────────────────────────
    fn begin_provisioning(&self, device_id: &DeviceId, group: &str) -> ResultCode;

    fn rename_device(
        &self,
        old_name: &str,
        new_name: &str,
    ) -> impl Future<Output = ResultCode> + Send;

    fn delete_device(&self, name: &str) -> impl Future<Output = ResultCode> + Send;

    fn identify_device(&self, name: &str, duration_secs: u16) -> ResultCode;

    /// Network-database record for a provisioned device.
    fn node_info(&self, device_id: &DeviceId) -> Option<NodeInfo>;

    // ── Firmware distribution ────────────────────────────────────────
    fn start_dfu_distribution(
        &self,
        kind: DfuKind,
        firmware: &[u8],
        metadata: Option<&FirmwareMetadata>,
    ) -> ResultCode;

    fn stop_dfu_distribution(&self) -> ResultCode;

    /// Request periodic status reports. `0` stops reporting.
    fn poll_dfu_status(&self, interval_secs: u16) -> ResultCode;

    // ── Point-to-point OTA ───────────────────────────────────────────
    fn start_point_to_point_ota(&self, device: &DeviceRef, firmware: &[u8]) -> ResultCode;

    fn stop_ota(&self) -> ResultCode;
}
