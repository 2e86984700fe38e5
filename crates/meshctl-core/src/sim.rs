// ── Simulated mesh stack ──
//
// In-process `MeshStack` used by the CLI's `simulate` commands and by
// tests. Every command is logged; result codes can be scripted per
// command kind; the optional autopilot plays back plausible status
// sequences on the event bus from spawned tokio tasks.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use strum::EnumDiscriminants;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::event::{DfuStatusReport, EventBus, MeshEvent, OtaStatusReport};
use crate::mesh::{MeshStack, ResultCode};
use crate::model::{
    ComponentKind, DeviceId, DeviceRef, DfuKind, DfuState, FirmwareMetadata, NodeInfo, NodePhase,
    OtaState,
};

/// A command as received by the simulated stack.
#[derive(Debug, Clone, PartialEq, Eq, EnumDiscriminants)]
#[strum_discriminants(name(CommandKind), derive(Hash))]
pub enum MeshCommand {
    StartScan,
    StopScan,
    BeginProvisioning { device_id: DeviceId, group: String },
    RenameDevice { old_name: String, new_name: String },
    DeleteDevice { name: String },
    IdentifyDevice { name: String, duration_secs: u16 },
    StartDfu { kind: DfuKind, image_len: usize },
    StopDfu,
    PollDfuStatus { interval_secs: u16 },
    StartOta { device: DeviceRef, image_len: usize },
    StopOta,
}

/// Scripted behaviour for the simulated radio.
#[derive(Debug, Clone)]
pub struct Autopilot {
    /// Gap between consecutive notifications.
    pub step_delay: Duration,
    /// Accepted provisioning attempts (1-based) that end in failure.
    pub fail_provision_attempts: Vec<u32>,
    /// Provisioned nodes come back with no group and no methods.
    pub provision_illegal: bool,
    pub dfu_nodes: u16,
    /// Report a distributor error instead of distributing.
    pub dfu_error_code: Option<i32>,
    pub ota_chunk: u64,
    /// Application-info string returned while reading app info.
    pub app_info: String,
}

impl Default for Autopilot {
    fn default() -> Self {
        Self {
            step_delay: Duration::from_millis(200),
            fail_provision_attempts: Vec::new(),
            provision_illegal: false,
            dfu_nodes: 3,
            dfu_error_code: None,
            ota_chunk: 4096,
            app_info: "CID:0x0211 PID:0x0001 VER:1.3.7".into(),
        }
    }
}

#[derive(Debug, Default)]
struct SimState {
    commands: Vec<MeshCommand>,
    scripted: HashMap<CommandKind, VecDeque<ResultCode>>,
    nodes: HashMap<DeviceId, NodeInfo>,
    beacons: Vec<(DeviceId, String)>,
    scanning: bool,
    accepted_provisions: u32,
    dfu_run: Option<CancellationToken>,
    ota_run: Option<CancellationToken>,
}

/// In-memory mesh stack.
///
/// With an autopilot attached, commands spawn tasks and must be issued
/// from inside a tokio runtime.
#[derive(Debug, Clone)]
pub struct SimulatedMesh {
    bus: EventBus,
    state: Arc<Mutex<SimState>>,
    autopilot: Option<Autopilot>,
}

impl SimulatedMesh {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            state: Arc::default(),
            autopilot: None,
        }
    }

    pub fn with_autopilot(mut self, autopilot: Autopilot) -> Self {
        self.autopilot = Some(autopilot);
        self
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Register an unprovisioned beacon that answers scans.
    pub fn add_beacon(&self, device_id: DeviceId, name: impl Into<String>) {
        self.lock().beacons.push((device_id, name.into()));
    }

    /// Seed the node database directly.
    pub fn insert_node(&self, device_id: DeviceId, node: NodeInfo) {
        self.lock().nodes.insert(device_id, node);
    }

    /// Queue result codes returned by the next commands of `kind`.
    /// Unscripted commands succeed.
    pub fn script(&self, kind: CommandKind, codes: impl IntoIterator<Item = ResultCode>) {
        self.lock().scripted.entry(kind).or_default().extend(codes);
    }

    pub fn commands(&self) -> Vec<MeshCommand> {
        self.lock().commands.clone()
    }

    pub fn count(&self, kind: CommandKind) -> usize {
        self.lock()
            .commands
            .iter()
            .filter(|c| CommandKind::from(*c) == kind)
            .count()
    }

    pub fn node_count(&self) -> usize {
        self.lock().nodes.len()
    }

    pub fn is_scanning(&self) -> bool {
        self.lock().scanning
    }

    // ── Internals ────────────────────────────────────────────────

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Log the command and pop its scripted result, if any.
    fn record(&self, command: MeshCommand) -> ResultCode {
        let kind = CommandKind::from(&command);
        trace!(?command, "simulated mesh command");
        let mut state = self.lock();
        state.commands.push(command);
        state
            .scripted
            .get_mut(&kind)
            .and_then(VecDeque::pop_front)
            .unwrap_or(ResultCode::Success)
    }

    fn spawn_scan_replies(&self, pilot: &Autopilot) {
        let beacons = {
            let state = self.lock();
            state
                .beacons
                .iter()
                .filter(|(id, _)| !state.nodes.contains_key(id))
                .cloned()
                .collect::<Vec<_>>()
        };
        let bus = self.bus.clone();
        let shared = Arc::clone(&self.state);
        let delay = pilot.step_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let scanning = shared.lock().unwrap_or_else(PoisonError::into_inner).scanning;
            if !scanning {
                return;
            }
            for (device_id, name) in beacons {
                bus.publish(MeshEvent::DeviceDiscovered {
                    device_id,
                    name: Some(name),
                    rssi: Some(-58),
                });
            }
        });
    }

    fn spawn_provisioning(&self, pilot: &Autopilot, device_id: DeviceId, group: String) {
        let attempt = {
            let mut state = self.lock();
            state.accepted_provisions += 1;
            state.accepted_provisions
        };
        let fails = pilot.fail_provision_attempts.contains(&attempt);
        let base_name = self
            .lock()
            .beacons
            .iter()
            .find(|(id, _)| *id == device_id)
            .map_or_else(|| "mesh-node".to_owned(), |(_, name)| name.clone());
        let node = NodeInfo {
            name: format!("{base_name}-{attempt}"),
            component_kind: ComponentKind::Light,
            groups: if pilot.provision_illegal { Vec::new() } else { vec![group] },
            control_methods: if pilot.provision_illegal {
                Vec::new()
            } else {
                vec!["onoff".into(), "level".into()]
            },
            target_methods: Vec::new(),
        };

        let bus = self.bus.clone();
        let shared = Arc::clone(&self.state);
        let delay = pilot.step_delay;
        tokio::spawn(async move {
            for code in 1..=5 {
                tokio::time::sleep(delay).await;
                bus.publish(MeshEvent::ProvisionStatus {
                    device_id: device_id.clone(),
                    code,
                });
            }
            tokio::time::sleep(delay).await;
            let code = if fails {
                7
            } else {
                shared
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .nodes
                    .insert(device_id.clone(), node);
                6
            };
            bus.publish(MeshEvent::ProvisionStatus { device_id, code });
        });
    }

    fn spawn_dfu(&self, pilot: &Autopilot, kind: DfuKind) {
        let cancel = CancellationToken::new();
        if let Some(previous) = self.lock().dfu_run.replace(cancel.clone()) {
            previous.cancel();
        }
        let bus = self.bus.clone();
        let delay = pilot.step_delay;
        let nodes = pilot.dfu_nodes;
        let error_code = pilot.dfu_error_code;

        tokio::spawn(async move {
            let mut script = vec![(DfuState::ValidatingNodes, 0, Bytes::new())];
            if kind.uses_distributor() {
                script.push((DfuState::SelectingDistributor, 0, Bytes::new()));
            }
            script.push((DfuState::Uploading, 0, Bytes::new()));
            for pct in [0u8, 25, 50, 75, 100] {
                script.push((DfuState::Uploading, 0, Bytes::copy_from_slice(&[pct])));
            }
            if let Some(code) = error_code {
                script.push((DfuState::Failed, code, Bytes::new()));
            } else if kind.uses_distributor() {
                let entries = |phase: NodePhase, pct: u8| {
                    (1..=nodes)
                        .map(|addr| (addr, phase, pct))
                        .collect::<Vec<_>>()
                };
                let mut warming = entries(NodePhase::TransferActive, 0);
                if let Some(last) = warming.last_mut() {
                    last.1 = NodePhase::Idle;
                }
                script.push((DfuState::Distributing, 0, node_report_payload(&warming)));
                for pct in [20u8, 40, 60, 80, 100] {
                    let payload = node_report_payload(&entries(NodePhase::TransferActive, pct));
                    script.push((DfuState::Distributing, 0, payload));
                }
                script.push((DfuState::Applying, 0, Bytes::new()));
                let done = node_report_payload(&entries(NodePhase::ApplySuccess, 100));
                script.push((DfuState::Complete, 0, done));
            } else {
                script.push((DfuState::Complete, 0, node_report_payload(&[])));
            }

            for (state, error_code, payload) in script {
                tokio::select! {
                    () = cancel.cancelled() => {
                        debug!("simulated distribution cancelled");
                        return;
                    }
                    () = tokio::time::sleep(delay) => {}
                }
                bus.publish(MeshEvent::DfuStatus(DfuStatusReport {
                    state,
                    error_code,
                    payload,
                }));
            }
        });
    }

    fn spawn_ota(&self, pilot: &Autopilot, image_len: usize) {
        let cancel = CancellationToken::new();
        if let Some(previous) = self.lock().ota_run.replace(cancel.clone()) {
            previous.cancel();
        }
        let bus = self.bus.clone();
        let delay = pilot.step_delay;
        let chunk = pilot.ota_chunk.max(1);
        let app_info = pilot.app_info.clone();
        let total = u64::try_from(image_len).unwrap_or(u64::MAX);

        tokio::spawn(async move {
            let report = |state, transferred, description: String| {
                MeshEvent::OtaStatus(OtaStatusReport {
                    state,
                    error_code: 0,
                    transferred,
                    total,
                    description,
                })
            };
            let mut script = vec![
                report(OtaState::DiscoveringService, 0, String::new()),
                report(OtaState::ReadingAppInfo, 0, app_info),
            ];
            let mut sent = 0u64;
            while sent < total {
                sent = sent.saturating_add(chunk).min(total);
                script.push(report(OtaState::TransferringData, sent, String::new()));
            }
            script.push(report(OtaState::Complete, total, String::new()));

            for event in script {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    () = tokio::time::sleep(delay) => {}
                }
                bus.publish(event);
            }
        });
    }
}

impl MeshStack for SimulatedMesh {
    fn start_scan(&self) -> ResultCode {
        let code = self.record(MeshCommand::StartScan);
        if code.is_success() {
            self.lock().scanning = true;
            if let Some(pilot) = &self.autopilot {
                self.spawn_scan_replies(pilot);
            }
        }
        code
    }

    fn stop_scan(&self) -> ResultCode {
        let code = self.record(MeshCommand::StopScan);
        self.lock().scanning = false;
        code
    }

    fn begin_provisioning(&self, device_id: &DeviceId, group: &str) -> ResultCode {
        let code = self.record(MeshCommand::BeginProvisioning {
            device_id: device_id.clone(),
            group: group.to_owned(),
        });
        if code.is_success() {
            if let Some(pilot) = &self.autopilot {
                self.spawn_provisioning(pilot, device_id.clone(), group.to_owned());
            }
        }
        code
    }

    fn rename_device(
        &self,
        old_name: &str,
        new_name: &str,
    ) -> impl Future<Output = ResultCode> + Send {
        let mut code = self.record(MeshCommand::RenameDevice {
            old_name: old_name.to_owned(),
            new_name: new_name.to_owned(),
        });
        if code.is_success() {
            let mut state = self.lock();
            match state.nodes.values_mut().find(|n| n.name == old_name) {
                Some(node) => node.name = new_name.to_owned(),
                None => code = ResultCode::Other(NODE_NOT_FOUND),
            }
        }
        std::future::ready(code)
    }

    fn delete_device(&self, name: &str) -> impl Future<Output = ResultCode> + Send {
        let mut code = self.record(MeshCommand::DeleteDevice {
            name: name.to_owned(),
        });
        if code.is_success() {
            let mut state = self.lock();
            let before = state.nodes.len();
            state.nodes.retain(|_, node| node.name != name);
            if state.nodes.len() == before {
                code = ResultCode::Other(NODE_NOT_FOUND);
            }
        }
        std::future::ready(code)
    }

    fn identify_device(&self, name: &str, duration_secs: u16) -> ResultCode {
        let code = self.record(MeshCommand::IdentifyDevice {
            name: name.to_owned(),
            duration_secs,
        });
        if code.is_success() && !self.lock().nodes.values().any(|n| n.name == name) {
            return ResultCode::Other(NODE_NOT_FOUND);
        }
        code
    }

    fn node_info(&self, device_id: &DeviceId) -> Option<NodeInfo> {
        self.lock().nodes.get(device_id).cloned()
    }

    fn start_dfu_distribution(
        &self,
        kind: DfuKind,
        firmware: &[u8],
        _metadata: Option<&FirmwareMetadata>,
    ) -> ResultCode {
        let code = self.record(MeshCommand::StartDfu {
            kind,
            image_len: firmware.len(),
        });
        if code.is_success() {
            if let Some(pilot) = &self.autopilot {
                self.spawn_dfu(pilot, kind);
            }
        }
        code
    }

    fn stop_dfu_distribution(&self) -> ResultCode {
        if let Some(run) = self.lock().dfu_run.take() {
            run.cancel();
        }
        self.record(MeshCommand::StopDfu)
    }

    fn poll_dfu_status(&self, interval_secs: u16) -> ResultCode {
        self.record(MeshCommand::PollDfuStatus { interval_secs })
    }

    fn start_point_to_point_ota(&self, device: &DeviceRef, firmware: &[u8]) -> ResultCode {
        let code = self.record(MeshCommand::StartOta {
            device: device.clone(),
            image_len: firmware.len(),
        });
        if code.is_success() {
            if let Some(pilot) = &self.autopilot {
                self.spawn_ota(pilot, firmware.len());
            }
        }
        code
    }

    fn stop_ota(&self) -> ResultCode {
        if let Some(run) = self.lock().ota_run.take() {
            run.cancel();
        }
        self.record(MeshCommand::StopOta)
    }
}

/// Result code the simulated stack uses for unknown node names.
pub const NODE_NOT_FOUND: i32 = 3;

/// Encode a distribute/complete node list the way the distributor does.
pub fn node_report_payload(entries: &[(u16, NodePhase, u8)]) -> Bytes {
    let count = u16::try_from(entries.len()).unwrap_or(u16::MAX);
    let mut out = Vec::with_capacity(2 + entries.len() * 4);
    out.extend_from_slice(&count.to_le_bytes());
    for &(addr, phase, progress) in entries.iter().take(usize::from(count)) {
        out.extend_from_slice(&addr.to_le_bytes());
        out.push(phase.raw());
        out.push(progress);
    }
    Bytes::from(out)
}
