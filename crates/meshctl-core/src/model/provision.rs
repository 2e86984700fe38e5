// ── Provisioning domain types ──

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio::time::Instant;

use super::ids::DeviceId;

/// Lifecycle stage of a single provisioning session.
///
/// Declaration order is the legal forward order; `Failed` is reachable
/// from every non-terminal stage.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
)]
pub enum ProvisionStage {
    Idle,
    Scanning,
    Connecting,
    ExchangingKeys,
    Ending,
    Reconnecting,
    Configuring,
    Succeeded,
    Failed,
}

impl ProvisionStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Human-readable progress fraction shown next to the stage.
    pub fn progress(self) -> f32 {
        match self {
            Self::Idle => 0.0,
            Self::Scanning => 0.1,
            Self::Connecting => 0.2,
            Self::ExchangingKeys => 0.4,
            Self::Ending => 0.5,
            Self::Reconnecting => 0.6,
            Self::Configuring => 0.8,
            Self::Succeeded | Self::Failed => 1.0,
        }
    }

    /// Map a mesh-stack provisioning status code to a stage.
    ///
    /// Returns `None` for codes the controller does not track.
    pub fn from_status_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(Self::Connecting),
            2 => Some(Self::ExchangingKeys),
            3 => Some(Self::Ending),
            4 => Some(Self::Reconnecting),
            5 => Some(Self::Configuring),
            6 => Some(Self::Succeeded),
            7 => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Capability class a provisioned node reports.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(ascii_case_insensitive)]
#[non_exhaustive]
pub enum ComponentKind {
    Light,
    Switch,
    Plug,
    Sensor,
    Remote,
    Gateway,
    Other,
}

/// Node record the mesh stack holds for a provisioned device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    pub component_kind: ComponentKind,
    pub groups: Vec<String>,
    pub control_methods: Vec<String>,
    pub target_methods: Vec<String>,
}

impl NodeInfo {
    /// A node with no subscribed group and no control/target method is
    /// unreachable from the app and must be offered for deletion.
    pub fn is_legal(&self) -> bool {
        !(self.groups.is_empty() && self.control_methods.is_empty() && self.target_methods.is_empty())
    }
}

/// Caller input for a provisioning attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionRequest {
    pub device_id: DeviceId,
    pub original_name: String,
    pub group: String,
}

/// Terminal success result of a provisioning session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedDevice {
    pub device_id: DeviceId,
    pub name: String,
    pub component_kind: Option<ComponentKind>,
    pub is_legal: bool,
}

/// Progress snapshot published to observers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProvisionProgress {
    pub stage: ProvisionStage,
    pub fraction: f32,
}

impl Default for ProvisionProgress {
    fn default() -> Self {
        Self {
            stage: ProvisionStage::Idle,
            fraction: 0.0,
        }
    }
}

impl From<ProvisionStage> for ProvisionProgress {
    fn from(stage: ProvisionStage) -> Self {
        Self {
            stage,
            fraction: stage.progress(),
        }
    }
}

/// State of one device's unprovisioned-to-configured lifecycle.
///
/// `provisioned_name` is only ever set together with the `Succeeded`
/// stage; the fields are private so that pairing cannot be broken.
#[derive(Debug, Clone)]
pub struct ProvisioningSession {
    target_device_id: DeviceId,
    original_name: String,
    assigned_group: String,
    provisioned_name: Option<String>,
    component_kind: Option<ComponentKind>,
    current_stage: ProvisionStage,
    is_legal_device: bool,
    timeout_deadline: Option<Instant>,
}

impl ProvisioningSession {
    pub fn new(request: ProvisionRequest) -> Self {
        Self {
            target_device_id: request.device_id,
            original_name: request.original_name,
            assigned_group: request.group,
            provisioned_name: None,
            component_kind: None,
            current_stage: ProvisionStage::Idle,
            is_legal_device: false,
            timeout_deadline: None,
        }
    }

    pub fn target_device_id(&self) -> &DeviceId {
        &self.target_device_id
    }

    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    pub fn assigned_group(&self) -> &str {
        &self.assigned_group
    }

    pub fn provisioned_name(&self) -> Option<&str> {
        self.provisioned_name.as_deref()
    }

    pub fn component_kind(&self) -> Option<ComponentKind> {
        self.component_kind
    }

    pub fn current_stage(&self) -> ProvisionStage {
        self.current_stage
    }

    /// Only meaningful once the stage is `Succeeded`.
    pub fn is_legal_device(&self) -> bool {
        self.current_stage == ProvisionStage::Succeeded && self.is_legal_device
    }

    pub fn timeout_deadline(&self) -> Option<Instant> {
        self.timeout_deadline
    }

    pub fn is_active(&self) -> bool {
        self.current_stage != ProvisionStage::Idle && !self.current_stage.is_terminal()
    }

    pub(crate) fn arm(&mut self, deadline: Instant) {
        self.current_stage = ProvisionStage::Scanning;
        self.timeout_deadline = Some(deadline);
    }

    /// Move forward to a non-terminal stage. Returns `false` (and leaves
    /// the session untouched) for backward or terminal targets.
    pub(crate) fn advance(&mut self, stage: ProvisionStage) -> bool {
        if stage.is_terminal() || stage <= self.current_stage || self.current_stage.is_terminal() {
            return false;
        }
        self.current_stage = stage;
        true
    }

    pub(crate) fn succeed(&mut self, name: String, kind: Option<ComponentKind>, legal: bool) {
        self.provisioned_name = Some(name);
        self.component_kind = kind;
        self.is_legal_device = legal;
        self.current_stage = ProvisionStage::Succeeded;
        self.timeout_deadline = None;
    }

    pub(crate) fn fail(&mut self) {
        self.provisioned_name = None;
        self.is_legal_device = false;
        self.current_stage = ProvisionStage::Failed;
        self.timeout_deadline = None;
    }

    pub(crate) fn rename(&mut self, name: String) {
        if self.current_stage == ProvisionStage::Succeeded {
            self.provisioned_name = Some(name);
        }
    }

    pub(crate) fn to_device(&self) -> Option<ProvisionedDevice> {
        let name = self.provisioned_name.clone()?;
        Some(ProvisionedDevice {
            device_id: self.target_device_id.clone(),
            name,
            component_kind: self.component_kind,
            is_legal: self.is_legal_device,
        })
    }
}
