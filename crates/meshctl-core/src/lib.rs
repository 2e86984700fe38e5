//! Controllers for a BLE mesh network: device provisioning, a repeating
//! scan/provision test harness, firmware distribution, and point-to-point
//! OTA.
//!
//! The radio itself sits behind the [`MeshStack`] trait. Commands return an
//! immediate [`ResultCode`]; long-running work reports back as
//! [`MeshEvent`]s on an [`EventBus`]:
//!
//! - **[`ProvisioningController`]**: Takes one device from unprovisioned to
//!   provisioned-and-configured, classifies it legal or illegal, and offers
//!   rename/delete afterwards. Busy submissions retry after a fixed back-off.
//!
//! - **[`ScanProvisionHarness`]**: Stress loop: scan, provision, identify,
//!   delete, repeat. Counts passes, halts on the first failure.
//!
//! - **[`DfuDistributionController`]**: Starts a distribution run and
//!   derives overall progress from the binary status payloads decoded in
//!   [`status`].
//!
//! - **[`OtaTransferController`]**: Direct single-device transfer with
//!   app-version readout.
//!
//! - **[`SimulatedMesh`]**: In-process stack with scripted result codes and
//!   an optional autopilot, used by the CLI's `simulate` commands and tests.
//!
//! Each controller exposes a synchronous core (`start`, `handle_event`,
//! `stop`) plus an async `run` driver, and publishes progress snapshots on a
//! `tokio::sync::watch` channel.

pub mod config;
pub mod controller;
pub mod error;
pub mod event;
pub mod mesh;
pub mod model;
pub mod sim;
pub mod status;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{HarnessConfig, MeshConfig};
pub use controller::{
    DfuDistributionController, HarnessReport, HarnessStage, HarnessStatus, OtaTransferController,
    ProvisioningController, ScanProvisionCycle, ScanProvisionHarness, parse_app_version,
};
pub use error::{CoreError, UserFacing};
pub use event::{DfuStatusReport, EventBus, EventSubscription, MeshEvent, OtaStatusReport};
pub use mesh::{MeshStack, ResultCode};
pub use sim::{Autopilot, CommandKind, MeshCommand, SimulatedMesh};
pub use status::{DecodeError, NodeReport, UploadStatus};

pub use model::{
    ComponentKind, DeviceId, DeviceRef, DfuKind, DfuProgress, DfuRequest, DfuSession, DfuState,
    DfuSummary, FirmwareMetadata, FirmwareVersion, NodeAddress, NodeInfo, NodeOutcome, NodePhase,
    NodeProgress, OtaCompletion, OtaProgress, OtaState, OtaSummary, OtaTransferSession,
    ProvisionProgress, ProvisionRequest, ProvisionStage, ProvisionedDevice, ProvisioningSession,
};
