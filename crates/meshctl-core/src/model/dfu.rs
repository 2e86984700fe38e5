// ── Firmware distribution domain types ──

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::ids::NodeAddress;

/// Distribution strategy. Strategies are mutually exclusive.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
#[serde(rename_all = "kebab-case")]
pub enum DfuKind {
    /// Upload straight to the connected device; no distributor fan-out.
    AppOtaToDevice,
    /// Distributor pushes the image to every node of the image's component.
    ProxyDfuToAll,
    /// Distributor pushes the image to every node in the network.
    ProxyDfuToAllDevices,
}

impl DfuKind {
    pub fn uses_distributor(self) -> bool {
        !matches!(self, Self::AppOtaToDevice)
    }
}

/// Overall state of a distribution session.
///
/// Declaration order is the forward order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
)]
pub enum DfuState {
    Idle,
    ValidatingNodes,
    SelectingDistributor,
    Uploading,
    Distributing,
    Applying,
    Complete,
    Failed,
}

impl DfuState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// Whether `self` may be entered by a session of the given kind.
    pub fn applies_to(self, kind: DfuKind) -> bool {
        kind.uses_distributor()
            || !matches!(
                self,
                Self::SelectingDistributor | Self::Distributing | Self::Applying
            )
    }
}

/// Per-node phase inside the distribution stage.
///
/// Raw values follow the mesh DFU "retrieved update phase" numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodePhase {
    Idle,
    TransferError,
    TransferActive,
    VerificationSucceeded,
    VerificationFailed,
    ApplySuccess,
    TransferCanceled,
    ApplyFailed,
    Unknown(u8),
}

impl NodePhase {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Idle,
            1 => Self::TransferError,
            2 => Self::TransferActive,
            3 => Self::VerificationSucceeded,
            4 => Self::VerificationFailed,
            5 => Self::ApplySuccess,
            6 => Self::TransferCanceled,
            7 => Self::ApplyFailed,
            other => Self::Unknown(other),
        }
    }

    pub fn raw(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::TransferError => 1,
            Self::TransferActive => 2,
            Self::VerificationSucceeded => 3,
            Self::VerificationFailed => 4,
            Self::ApplySuccess => 5,
            Self::TransferCanceled => 6,
            Self::ApplyFailed => 7,
            Self::Unknown(v) => v,
        }
    }

    /// Final-outcome reading used when logging the completion report.
    pub fn is_success(self) -> bool {
        matches!(self, Self::ApplySuccess | Self::VerificationSucceeded)
    }
}

impl fmt::Display for NodePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::TransferError => f.write_str("transfer error"),
            Self::TransferActive => f.write_str("transfer active"),
            Self::VerificationSucceeded => f.write_str("verification succeeded"),
            Self::VerificationFailed => f.write_str("verification failed"),
            Self::ApplySuccess => f.write_str("apply success"),
            Self::TransferCanceled => f.write_str("transfer canceled"),
            Self::ApplyFailed => f.write_str("apply failed"),
            Self::Unknown(v) => write!(f, "unknown ({v})"),
        }
    }
}

/// `major.minor.patch` firmware version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u16,
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for FirmwareVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split('.');
        let mut next = |label: &str| {
            parts
                .next()
                .ok_or_else(|| format!("missing {label} component in '{s}'"))
        };
        let major = next("major")?;
        let minor = next("minor")?;
        let patch = next("patch")?;
        if parts.next().is_some() {
            return Err(format!("too many components in '{s}'"));
        }
        Ok(Self {
            major: major.parse().map_err(|_| format!("invalid major '{major}'"))?,
            minor: minor.parse().map_err(|_| format!("invalid minor '{minor}'"))?,
            patch: patch.parse().map_err(|_| format!("invalid patch '{patch}'"))?,
        })
    }
}

/// Structured descriptor shipped alongside a firmware image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareMetadata {
    pub firmware_id: String,
    pub company_id: u16,
    pub product_id: u16,
    pub hardware_id: u16,
    pub version: FirmwareVersion,
}

/// Caller input for a distribution run.
#[derive(Debug, Clone)]
pub struct DfuRequest {
    pub kind: DfuKind,
    pub image: Bytes,
    pub metadata: Option<FirmwareMetadata>,
}

/// One node's phase and progress as last reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeProgress {
    pub phase: NodePhase,
    pub progress: u8,
}

/// Progress snapshot published to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DfuProgress {
    pub state: DfuState,
    /// Overall bar value, 0-100. `None` while upload has no percentage yet.
    pub overall_percent: Option<u8>,
}

impl Default for DfuProgress {
    fn default() -> Self {
        Self {
            state: DfuState::Idle,
            overall_percent: None,
        }
    }
}

/// Final per-node outcome listed on completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NodeOutcome {
    pub address: NodeAddress,
    pub phase: NodePhase,
}

/// Terminal success result of a distribution run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DfuSummary {
    pub kind: DfuKind,
    pub nodes: Vec<NodeOutcome>,
}

/// Live state of one distribution run.
#[derive(Debug, Clone)]
pub struct DfuSession {
    pub(crate) kind: DfuKind,
    pub(crate) firmware_image: Bytes,
    pub(crate) metadata: Option<FirmwareMetadata>,
    pub(crate) state: DfuState,
    pub(crate) upload_progress_percent: Option<u8>,
    pub(crate) per_node_progress: BTreeMap<NodeAddress, NodeProgress>,
    pub(crate) overall_percent: Option<u8>,
    pub(crate) is_running: bool,
}

impl DfuSession {
    pub(crate) fn new(request: DfuRequest) -> Self {
        Self {
            kind: request.kind,
            firmware_image: request.image,
            metadata: request.metadata,
            state: DfuState::Idle,
            upload_progress_percent: None,
            per_node_progress: BTreeMap::new(),
            overall_percent: None,
            is_running: false,
        }
    }

    pub fn kind(&self) -> DfuKind {
        self.kind
    }

    pub fn firmware_len(&self) -> usize {
        self.firmware_image.len()
    }

    pub fn metadata(&self) -> Option<&FirmwareMetadata> {
        self.metadata.as_ref()
    }

    pub fn state(&self) -> DfuState {
        self.state
    }

    pub fn upload_progress_percent(&self) -> Option<u8> {
        self.upload_progress_percent
    }

    pub fn per_node_progress(&self) -> &BTreeMap<NodeAddress, NodeProgress> {
        &self.per_node_progress
    }

    pub fn overall_percent(&self) -> Option<u8> {
        self.overall_percent
    }

    pub fn is_running(&self) -> bool {
        self.is_running
    }

    /// Enter `state`, dropping per-node data when leaving distribution.
    pub(crate) fn enter(&mut self, state: DfuState) {
        if state != DfuState::Distributing {
            self.per_node_progress.clear();
        }
        self.state = state;
    }

    pub(crate) fn progress(&self) -> DfuProgress {
        DfuProgress {
            state: self.state,
            overall_percent: self.overall_percent,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn app_ota_skips_distributor_states() {
        let kind = DfuKind::AppOtaToDevice;
        assert!(DfuState::Uploading.applies_to(kind));
        assert!(!DfuState::SelectingDistributor.applies_to(kind));
        assert!(!DfuState::Distributing.applies_to(kind));
        assert!(!DfuState::Applying.applies_to(kind));
        assert!(DfuState::Distributing.applies_to(DfuKind::ProxyDfuToAll));
    }

    #[test]
    fn node_phase_round_trips_raw_values() {
        for raw in 0..=9u8 {
            assert_eq!(NodePhase::from_raw(raw).raw(), raw);
        }
        assert_eq!(NodePhase::from_raw(42), NodePhase::Unknown(42));
    }

    #[test]
    fn firmware_version_parses_and_displays() {
        let v: FirmwareVersion = "1.4.12".parse().unwrap();
        assert_eq!(v, FirmwareVersion { major: 1, minor: 4, patch: 12 });
        assert_eq!(v.to_string(), "1.4.12");
        assert!("1.4".parse::<FirmwareVersion>().is_err());
        assert!("1.4.x".parse::<FirmwareVersion>().is_err());
        assert!("1.4.1.0".parse::<FirmwareVersion>().is_err());
    }

    #[test]
    fn dfu_kind_parses_kebab_case() {
        assert_eq!("proxy-dfu-to-all".parse::<DfuKind>().unwrap(), DfuKind::ProxyDfuToAll);
        assert_eq!(DfuKind::AppOtaToDevice.to_string(), "app-ota-to-device");
    }
}
