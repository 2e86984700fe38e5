// ── Domain model ──
//
// Session and progress types for every controller, plus the identity
// newtypes they share.

pub mod dfu;
pub mod ids;
pub mod ota;
pub mod provision;

pub use dfu::{
    DfuKind, DfuProgress, DfuRequest, DfuSession, DfuState, DfuSummary, FirmwareMetadata,
    FirmwareVersion, NodeOutcome, NodePhase, NodeProgress,
};
pub use ids::{DeviceId, DeviceRef, NodeAddress};
pub use ota::{OtaCompletion, OtaProgress, OtaState, OtaSummary, OtaTransferSession};
pub use provision::{
    ComponentKind, NodeInfo, ProvisionProgress, ProvisionRequest, ProvisionStage,
    ProvisionedDevice, ProvisioningSession,
};
