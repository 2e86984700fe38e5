// ── Firmware distribution controller ──
//
// Starts a distribution run, turns DFU status notifications into an
// overall progress value and per-node state, and ends the periodic
// status reporting whenever the run terminates or is stopped.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MeshConfig;
use crate::error::CoreError;
use crate::event::{DfuStatusReport, EventSubscription, MeshEvent};
use crate::mesh::MeshStack;
use crate::model::{
    DfuKind, DfuProgress, DfuRequest, DfuSession, DfuState, DfuSummary, NodeOutcome, NodeProgress,
};
use crate::status::{
    UploadStatus, aggregate_distribution_progress, decode_node_report, decode_upload_status,
    distribution_overall_percent,
};

const OPERATION: &str = "DFU distribution";

/// Owner of a single [`DfuSession`].
pub struct DfuDistributionController<M: MeshStack> {
    mesh: Arc<M>,
    poll_interval_secs: u16,
    session: Option<DfuSession>,
    progress: watch::Sender<DfuProgress>,
}

impl<M: MeshStack> DfuDistributionController<M> {
    pub fn new(mesh: Arc<M>, config: &MeshConfig) -> Self {
        let (progress, _) = watch::channel(DfuProgress::default());
        Self {
            mesh,
            poll_interval_secs: config.dfu_poll_interval_secs,
            session: None,
            progress,
        }
    }

    pub fn session(&self) -> Option<&DfuSession> {
        self.session.as_ref()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<DfuProgress> {
        self.progress.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.session.as_ref().is_some_and(DfuSession::is_running)
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Issue "start distribution" and request periodic status reports.
    ///
    /// A busy network is reported as [`CoreError::NetworkBusy`] and is
    /// not retried.
    pub fn start(&mut self, request: DfuRequest) -> Result<(), CoreError> {
        if self.is_running() {
            return Err(CoreError::already_running("DFU"));
        }
        if request.image.is_empty() {
            return Err(CoreError::InvalidArguments {
                message: "firmware image is empty".into(),
            });
        }
        if request.kind.uses_distributor() && request.metadata.is_none() {
            return Err(CoreError::InvalidArguments {
                message: format!("{} requires firmware metadata", request.kind),
            });
        }

        let mut session = DfuSession::new(request);
        let submitted = self
            .mesh
            .start_dfu_distribution(session.kind, &session.firmware_image, session.metadata.as_ref())
            .into_result("start DFU distribution");
        if let Err(e) = submitted {
            warn!(kind = %session.kind, error = %e, "distribution not started");
            session.enter(DfuState::Failed);
            self.install(session);
            return Err(e);
        }

        session.is_running = true;
        session.enter(DfuState::ValidatingNodes);
        info!(
            kind = %session.kind,
            image_bytes = session.firmware_len(),
            firmware_id = ?session.metadata.as_ref().map(|m| m.firmware_id.as_str()),
            "distribution started"
        );
        self.install(session);

        let code = self.mesh.poll_dfu_status(self.poll_interval_secs);
        if !code.is_success() {
            warn!(%code, interval_secs = self.poll_interval_secs, "status reporting not enabled");
        }
        Ok(())
    }

    /// Stop the running distribution and end status reporting.
    /// Notifications arriving afterwards are ignored.
    pub fn stop(&mut self) {
        if !self.is_running() {
            return;
        }
        let code = self.mesh.stop_dfu_distribution();
        if !code.is_success() {
            warn!(%code, "stop distribution rejected");
        }
        self.stop_reporting();
        if let Some(session) = self.session.as_mut() {
            session.enter(DfuState::Idle);
            session.overall_percent = None;
            session.is_running = false;
        }
        info!("distribution stopped");
        self.publish();
    }

    /// Apply one notification. Returns the terminal outcome when reached.
    pub fn handle_event(&mut self, event: &MeshEvent) -> Option<Result<DfuSummary, CoreError>> {
        let MeshEvent::DfuStatus(report) = event else {
            return None;
        };
        let session = self.session.as_mut()?;
        if !session.is_running {
            debug!(state = %report.state, "ignoring status for stopped distribution");
            return None;
        }

        if report.state == DfuState::Failed || report.error_code != 0 {
            return Some(Err(self.finish_failed(report)));
        }
        if !report.state.applies_to(session.kind) {
            warn!(state = %report.state, kind = %session.kind, "status does not apply to this distribution kind");
            return None;
        }
        if report.state < session.state || report.state == DfuState::Idle {
            debug!(state = %report.state, current = %session.state, "ignoring out-of-order status");
            return None;
        }

        let previous = session.state;
        match report.state {
            DfuState::Uploading => {
                session.enter(DfuState::Uploading);
                let upload = decode_upload_status(&report.payload);
                if let UploadStatus::Percent(p) = upload {
                    session.upload_progress_percent = Some(p);
                }
                if let Some(overall) = upload.overall_percent() {
                    session.overall_percent = Some(overall);
                }
            }
            DfuState::Distributing => {
                let nodes = match decode_node_report(&report.payload) {
                    Ok(nodes) => nodes,
                    Err(e) => {
                        warn!(error = %e, len = report.payload.len(), "malformed distribution status; ignoring");
                        return None;
                    }
                };
                session.enter(DfuState::Distributing);
                session.per_node_progress = nodes
                    .iter()
                    .map(|n| {
                        (
                            n.address,
                            NodeProgress {
                                phase: n.phase,
                                progress: n.progress,
                            },
                        )
                    })
                    .collect();
                let aggregate = aggregate_distribution_progress(&nodes);
                session.overall_percent = Some(distribution_overall_percent(aggregate));
            }
            DfuState::Complete => {
                let kind = session.kind;
                return Some(Ok(self.finish_complete(kind, report)));
            }
            other => session.enter(other),
        }

        if previous != session.state {
            info!(from = %previous, to = %session.state, "distribution state changed");
        }
        debug!(state = %session.state, overall = ?session.overall_percent, "distribution progress");
        self.publish();
        None
    }

    /// Wait for the started run to complete or fail.
    pub async fn run(
        &mut self,
        events: &mut EventSubscription,
        cancel: &CancellationToken,
    ) -> Result<DfuSummary, CoreError> {
        if !self.is_running() {
            return Err(CoreError::InvalidState {
                message: "no distribution in progress".into(),
            });
        }
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    self.stop();
                    return Err(CoreError::Cancelled);
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        self.stop();
                        return Err(CoreError::Disconnected);
                    };
                    if let Some(outcome) = self.handle_event(&event) {
                        return outcome;
                    }
                }
            }
        }
    }

    // ── Private helpers ──────────────────────────────────────────

    fn finish_complete(&mut self, kind: DfuKind, report: &DfuStatusReport) -> DfuSummary {
        let nodes = match decode_node_report(&report.payload) {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!(error = %e, "malformed completion report; node outcomes unavailable");
                Vec::new()
            }
        };
        for node in &nodes {
            if node.phase.is_success() {
                info!(node = %node.address, phase = %node.phase, "node updated");
            } else {
                warn!(node = %node.address, phase = %node.phase, "node not updated");
            }
        }

        self.stop_reporting();
        if let Some(session) = self.session.as_mut() {
            session.enter(DfuState::Complete);
            session.overall_percent = Some(100);
            session.is_running = false;
        }
        info!(%kind, nodes = nodes.len(), "distribution complete");
        self.publish();

        DfuSummary {
            kind,
            nodes: nodes
                .into_iter()
                .map(|n| NodeOutcome {
                    address: n.address,
                    phase: n.phase,
                })
                .collect(),
        }
    }

    fn finish_failed(&mut self, report: &DfuStatusReport) -> CoreError {
        self.stop_reporting();
        if let Some(session) = self.session.as_mut() {
            session.enter(DfuState::Failed);
            session.is_running = false;
        }
        warn!(state = %report.state, error_code = report.error_code, "distribution failed");
        self.publish();
        CoreError::Failed {
            operation: OPERATION.into(),
            message: format!("distributor reported error code {}", report.error_code),
        }
    }

    fn stop_reporting(&self) {
        let code = self.mesh.poll_dfu_status(0);
        if !code.is_success() {
            warn!(%code, "could not stop status reporting");
        }
    }

    fn install(&mut self, session: DfuSession) {
        self.session = Some(session);
        self.publish();
    }

    fn publish(&self) {
        let snapshot = self
            .session
            .as_ref()
            .map_or_else(DfuProgress::default, DfuSession::progress);
        self.progress.send_replace(snapshot);
    }
}
