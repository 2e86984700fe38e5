// ── Provisioning controller ──
//
// Drives one device from unprovisioned to provisioned-and-configured.
// Notifications carry the mesh stack's status codes; anything for a
// different device, or arriving after a terminal stage, is dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::sleep_until_opt;
use crate::config::MeshConfig;
use crate::error::CoreError;
use crate::event::{EventSubscription, MeshEvent};
use crate::mesh::MeshStack;
use crate::model::{
    ProvisionProgress, ProvisionRequest, ProvisionStage, ProvisionedDevice, ProvisioningSession,
};

const OPERATION: &str = "provisioning";

/// Owner of a single [`ProvisioningSession`].
pub struct ProvisioningController<M: MeshStack> {
    mesh: Arc<M>,
    session: Option<ProvisioningSession>,
    timeout: Duration,
    armed_timeout: Duration,
    busy_backoff: Duration,
    busy_retry_limit: u32,
    progress: watch::Sender<ProvisionProgress>,
}

impl<M: MeshStack> ProvisioningController<M> {
    pub fn new(mesh: Arc<M>, config: &MeshConfig) -> Self {
        let (progress, _) = watch::channel(ProvisionProgress::default());
        Self {
            mesh,
            session: None,
            timeout: config.provision_timeout,
            armed_timeout: config.provision_timeout,
            busy_backoff: config.busy_backoff,
            busy_retry_limit: config.busy_retry_limit,
            progress,
        }
    }

    pub fn session(&self) -> Option<&ProvisioningSession> {
        self.session.as_ref()
    }

    pub fn stage(&self) -> ProvisionStage {
        self.session
            .as_ref()
            .map_or(ProvisionStage::Idle, ProvisioningSession::current_stage)
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<ProvisionProgress> {
        self.progress.subscribe()
    }

    /// Timeout deadline of the in-flight session, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.session
            .as_ref()
            .filter(|s| s.is_active())
            .and_then(ProvisioningSession::timeout_deadline)
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Validate the request and issue "begin provisioning".
    ///
    /// Submission failures leave the session in `Failed` and are returned
    /// directly; a busy network comes back as [`CoreError::NetworkBusy`].
    pub fn start(&mut self, request: ProvisionRequest, timeout: Duration) -> Result<(), CoreError> {
        if self.session.as_ref().is_some_and(ProvisioningSession::is_active) {
            return Err(CoreError::already_running(OPERATION));
        }

        let mut session = ProvisioningSession::new(request);
        let submitted = validate(&session).and_then(|()| {
            self.mesh
                .begin_provisioning(session.target_device_id(), session.assigned_group())
                .into_result("begin provisioning")
        });

        match submitted {
            Ok(()) => {
                session.arm(Instant::now() + timeout);
                self.armed_timeout = timeout;
                info!(
                    device = %session.target_device_id(),
                    group = session.assigned_group(),
                    timeout_secs = timeout.as_secs(),
                    "provisioning started"
                );
                self.install(session);
                Ok(())
            }
            Err(e) => {
                debug!(device = %session.target_device_id(), error = %e, "provisioning not submitted");
                session.fail();
                self.install(session);
                Err(e)
            }
        }
    }

    /// Apply one notification. Returns the terminal outcome when reached.
    pub fn handle_event(
        &mut self,
        event: &MeshEvent,
    ) -> Option<Result<ProvisionedDevice, CoreError>> {
        let session = self.session.as_mut()?;
        if !session.is_active() {
            debug!(stage = %session.current_stage(), "ignoring notification for finished session");
            return None;
        }

        match event {
            MeshEvent::ProvisionStatus { device_id, code } => {
                if device_id != session.target_device_id() {
                    debug!(device = %device_id, "ignoring status for another device");
                    return None;
                }
                let Some(stage) = ProvisionStage::from_status_code(*code) else {
                    debug!(code, "ignoring unknown provisioning status code");
                    return None;
                };
                match stage {
                    ProvisionStage::Succeeded => self.complete().map(Ok),
                    ProvisionStage::Failed => {
                        session.fail();
                        warn!(device = %session.target_device_id(), code, "provisioning failed");
                        self.publish();
                        Some(Err(CoreError::Failed {
                            operation: OPERATION.into(),
                            message: format!("mesh stack reported failure (status {code})"),
                        }))
                    }
                    _ => {
                        if session.advance(stage) {
                            info!(stage = %stage, progress = stage.progress(), "provisioning progress");
                            self.publish();
                        } else {
                            debug!(stage = %stage, current = %session.current_stage(), "ignoring out-of-order status");
                        }
                        None
                    }
                }
            }
            MeshEvent::NetworkDbChanged { network } => {
                debug!(network = %network, "network database changed during provisioning");
                None
            }
            _ => None,
        }
    }

    /// Fail the session if its deadline has passed.
    pub fn check_timeout(&mut self, now: Instant) -> Option<Result<ProvisionedDevice, CoreError>> {
        let deadline = self.deadline()?;
        if now < deadline {
            return None;
        }
        let session = self.session.as_mut()?;
        warn!(device = %session.target_device_id(), stage = %session.current_stage(), "provisioning timed out");
        session.fail();
        self.publish();
        Some(Err(CoreError::Timeout {
            operation: OPERATION.into(),
            timeout_secs: self.armed_timeout.as_secs(),
        }))
    }

    /// Drop the current session. Trailing notifications are ignored.
    pub fn reset(&mut self) {
        if let Some(session) = self.session.take() {
            if session.is_active() {
                info!(device = %session.target_device_id(), "abandoning in-flight provisioning");
            }
        }
        self.publish();
    }

    // ── Post-success operations ──────────────────────────────────

    pub async fn rename(&mut self, new_name: &str) -> Result<(), CoreError> {
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return Err(CoreError::InvalidArguments {
                message: "new device name is empty".into(),
            });
        }
        let old_name = self.provisioned_name()?;

        let mesh = Arc::clone(&self.mesh);
        mesh.rename_device(&old_name, new_name)
            .await
            .into_result("rename device")?;

        if let Some(session) = self.session.as_mut() {
            session.rename(new_name.to_owned());
        }
        info!(from = %old_name, to = new_name, "device renamed");
        Ok(())
    }

    /// Delete the provisioned device from the network and end the session.
    pub async fn delete(&mut self) -> Result<(), CoreError> {
        let name = self.provisioned_name()?;

        let mesh = Arc::clone(&self.mesh);
        mesh.delete_device(&name).await.into_result("delete device")?;

        self.session = None;
        self.publish();
        info!(name = %name, "device deleted");
        Ok(())
    }

    // ── Async drivers ────────────────────────────────────────────

    /// Wait for the started session to reach a terminal stage.
    ///
    /// Subscribe to the bus *before* calling [`start`](Self::start) so no
    /// notification is missed.
    pub async fn run(
        &mut self,
        events: &mut EventSubscription,
        cancel: &CancellationToken,
    ) -> Result<ProvisionedDevice, CoreError> {
        if let Some(session) = self.session.as_ref() {
            if session.current_stage() == ProvisionStage::Failed {
                return Err(CoreError::InvalidState {
                    message: "provisioning session already failed".into(),
                });
            }
            if let Some(device) = session.to_device() {
                return Ok(device);
            }
        }
        if self.deadline().is_none() {
            return Err(CoreError::InvalidState {
                message: "no provisioning session in progress".into(),
            });
        }

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    self.reset();
                    return Err(CoreError::Cancelled);
                }
                () = sleep_until_opt(self.deadline()) => {
                    if let Some(outcome) = self.check_timeout(Instant::now()) {
                        return outcome;
                    }
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        if let Some(session) = self.session.as_mut() {
                            session.fail();
                        }
                        self.publish();
                        return Err(CoreError::Disconnected);
                    };
                    if let Some(outcome) = self.handle_event(&event) {
                        return outcome;
                    }
                }
            }
        }
    }

    /// Start and drive a session, retrying busy submissions after a fixed
    /// back-off up to the configured limit. Reports exactly one outcome.
    pub async fn provision_with_retry(
        &mut self,
        request: ProvisionRequest,
        events: &mut EventSubscription,
        cancel: &CancellationToken,
    ) -> Result<ProvisionedDevice, CoreError> {
        let mut retries = 0u32;
        loop {
            match self.start(request.clone(), self.timeout) {
                Ok(()) => return self.run(events, cancel).await,
                Err(e) if e.is_busy() && retries < self.busy_retry_limit => {
                    retries += 1;
                    warn!(
                        attempt = retries,
                        backoff_secs = self.busy_backoff.as_secs(),
                        "mesh network busy; retrying provisioning"
                    );
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => {
                            self.reset();
                            return Err(CoreError::Cancelled);
                        }
                        () = tokio::time::sleep(self.busy_backoff) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    // ── Private helpers ──────────────────────────────────────────

    /// Finish a successful session: look up the node record, classify it.
    fn complete(&mut self) -> Option<ProvisionedDevice> {
        let session = self.session.as_mut()?;
        let node = self.mesh.node_info(session.target_device_id());

        let (name, kind, legal) = match node {
            Some(node) => {
                let legal = node.is_legal();
                (node.name, Some(node.component_kind), legal)
            }
            None => {
                warn!(device = %session.target_device_id(), "no node record after provisioning");
                (session.original_name().to_owned(), None, false)
            }
        };
        if !legal {
            warn!(name = %name, "provisioned device has no groups and no control methods; it should be deleted");
        }
        session.succeed(name, kind, legal);
        info!(device = %session.target_device_id(), name = ?session.provisioned_name(), legal, "provisioning succeeded");

        let device = session.to_device();
        self.publish();
        device
    }

    fn provisioned_name(&self) -> Result<String, CoreError> {
        self.session
            .as_ref()
            .filter(|s| s.current_stage() == ProvisionStage::Succeeded)
            .and_then(|s| s.provisioned_name().map(str::to_owned))
            .ok_or_else(|| CoreError::InvalidState {
                message: "device has not been provisioned".into(),
            })
    }

    fn install(&mut self, session: ProvisioningSession) {
        self.session = Some(session);
        self.publish();
    }

    fn publish(&self) {
        let snapshot = ProvisionProgress::from(self.stage());
        self.progress.send_replace(snapshot);
    }
}

fn validate(session: &ProvisioningSession) -> Result<(), CoreError> {
    let mut missing = Vec::new();
    if session.target_device_id().is_empty() {
        missing.push("device id");
    }
    if session.assigned_group().trim().is_empty() {
        missing.push("group");
    }
    if session.original_name().trim().is_empty() {
        missing.push("device name");
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(CoreError::InvalidArguments {
            message: format!("missing {}", missing.join(", ")),
        })
    }
}
