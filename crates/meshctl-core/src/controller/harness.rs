// ── Scan/provision stress harness ──
//
// Repeats scan → provision → identify → delete against one target
// device until stopped, counting passes. Any failure halts the loop;
// a busy network is retried after the fixed back-off. All three
// timers (re-scan watchdog, busy back-off, provisioning deadline) are
// plain deadlines polled by the `run` loop, so `stop` cancels them
// simply by clearing state.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::Display;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{ProvisioningController, earliest, sleep_until_opt};
use crate::config::{HarnessConfig, MeshConfig};
use crate::error::CoreError;
use crate::event::{EventSubscription, MeshEvent};
use crate::mesh::MeshStack;
use crate::model::{DeviceId, ProvisionRequest, ProvisionedDevice};

/// Where the harness currently is inside one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
pub enum HarnessStage {
    Idle,
    Scanning,
    Provisioning,
    Deleting,
}

/// Counters and flags of the repeating cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanProvisionCycle {
    pub stage: HarnessStage,
    /// Completed scan → provision → identify passes.
    pub pass_count: u32,
    /// Cleared on stop or failure; every transition checks it.
    pub enabled: bool,
    /// Start of the current pass.
    pub started_at: Option<Instant>,
}

impl Default for ScanProvisionCycle {
    fn default() -> Self {
        Self {
            stage: HarnessStage::Idle,
            pass_count: 0,
            enabled: false,
            started_at: None,
        }
    }
}

/// Snapshot published on every stage change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HarnessStatus {
    pub stage: HarnessStage,
    pub pass_count: u32,
    pub enabled: bool,
    pub slow_cycles: u32,
}

/// Outcome of a harness run.
#[derive(Debug, Clone)]
pub struct HarnessReport {
    pub pass_count: u32,
    /// Passes whose provisioning exceeded the slow threshold.
    pub slow_cycles: u32,
    pub started: Option<DateTime<Utc>>,
    pub finished: DateTime<Utc>,
    /// Stage the harness was in when it failed.
    pub failed_stage: Option<HarnessStage>,
    pub error: Option<CoreError>,
}

impl HarnessReport {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// What the back-off timer re-attempts when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingRetry {
    Provision,
    Delete,
}

#[derive(Debug, Default)]
struct Timers {
    rescan: Option<Instant>,
    backoff: Option<(Instant, PendingRetry)>,
}

impl Timers {
    fn clear(&mut self) {
        self.rescan = None;
        self.backoff = None;
    }
}

pub struct ScanProvisionHarness<M: MeshStack> {
    mesh: Arc<M>,
    provisioner: ProvisioningController<M>,
    config: HarnessConfig,
    provision_timeout: Duration,
    busy_backoff: Duration,
    busy_retry_limit: u32,

    cycle: ScanProvisionCycle,
    timers: Timers,
    busy_retries: u32,
    slow_cycles: u32,
    started: Option<DateTime<Utc>>,
    failed_stage: Option<HarnessStage>,
    last_error: Option<CoreError>,
    status: watch::Sender<HarnessStatus>,
}

impl<M: MeshStack> ScanProvisionHarness<M> {
    pub fn new(mesh: Arc<M>, config: &MeshConfig) -> Self {
        let cycle = ScanProvisionCycle::default();
        let (status, _) = watch::channel(HarnessStatus {
            stage: cycle.stage,
            pass_count: 0,
            enabled: false,
            slow_cycles: 0,
        });
        Self {
            provisioner: ProvisioningController::new(Arc::clone(&mesh), config),
            mesh,
            config: config.harness.clone(),
            provision_timeout: config.provision_timeout,
            busy_backoff: config.busy_backoff,
            busy_retry_limit: config.busy_retry_limit,
            cycle,
            timers: Timers::default(),
            busy_retries: 0,
            slow_cycles: 0,
            started: None,
            failed_stage: None,
            last_error: None,
            status,
        }
    }

    pub fn cycle(&self) -> &ScanProvisionCycle {
        &self.cycle
    }

    pub fn subscribe_status(&self) -> watch::Receiver<HarnessStatus> {
        self.status.subscribe()
    }

    /// Next instant at which [`on_timer`](Self::on_timer) has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        if !self.cycle.enabled {
            return None;
        }
        let provisioning = (self.cycle.stage == HarnessStage::Provisioning)
            .then(|| self.provisioner.deadline())
            .flatten();
        earliest([
            self.timers.rescan,
            self.timers.backoff.map(|(at, _)| at),
            provisioning,
        ])
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Reset counters and begin the first scan.
    pub fn start(&mut self) -> Result<(), CoreError> {
        if self.cycle.enabled {
            return Err(CoreError::already_running("harness"));
        }
        let target = self.target()?;
        if self.config.group.trim().is_empty() {
            return Err(CoreError::InvalidArguments {
                message: "harness group is empty".into(),
            });
        }

        self.cycle = ScanProvisionCycle {
            enabled: true,
            ..ScanProvisionCycle::default()
        };
        self.timers.clear();
        self.busy_retries = 0;
        self.slow_cycles = 0;
        self.failed_stage = None;
        self.last_error = None;
        self.started = Some(Utc::now());

        info!(target = %target, group = %self.config.group, "harness started");
        self.begin_scan();
        Ok(())
    }

    /// Graceful stop. Timers are invalidated before this returns.
    pub fn stop(&mut self) {
        if !self.cycle.enabled {
            return;
        }
        self.timers.clear();
        if self.cycle.stage == HarnessStage::Scanning {
            self.end_scan();
        }
        self.provisioner.reset();
        self.cycle.enabled = false;
        self.cycle.stage = HarnessStage::Idle;
        info!(passes = self.cycle.pass_count, "harness stopped");
        self.publish();
    }

    pub async fn handle_event(&mut self, event: &MeshEvent) {
        if !self.cycle.enabled {
            return;
        }
        match self.cycle.stage {
            HarnessStage::Scanning => {
                if let MeshEvent::DeviceDiscovered { device_id, .. } = event {
                    if self.config.target.as_ref() == Some(device_id) {
                        self.on_target_found(device_id);
                    }
                }
            }
            HarnessStage::Provisioning => {
                if let Some(outcome) = self.provisioner.handle_event(event) {
                    self.on_provisioned(outcome).await;
                }
            }
            HarnessStage::Idle | HarnessStage::Deleting => {}
        }
    }

    /// Fire every timer whose deadline is at or before `now`.
    pub async fn on_timer(&mut self, now: Instant) {
        if !self.cycle.enabled {
            return;
        }

        if self.timers.rescan.is_some_and(|at| at <= now) {
            self.rescan(now);
        }

        if let Some((at, retry)) = self.timers.backoff {
            if at <= now {
                self.timers.backoff = None;
                match retry {
                    PendingRetry::Provision => self.attempt_provision(),
                    PendingRetry::Delete => self.delete_device().await,
                }
            }
        }

        if self.cycle.enabled && self.cycle.stage == HarnessStage::Provisioning {
            if let Some(outcome) = self.provisioner.check_timeout(now) {
                self.on_provisioned(outcome).await;
            }
        }
    }

    /// Drive the harness until it stops, fails, or `cancel` fires.
    ///
    /// Returns immediately with an empty report when not started.
    pub async fn run(
        &mut self,
        events: &mut EventSubscription,
        cancel: &CancellationToken,
    ) -> HarnessReport {
        while self.cycle.enabled {
            let deadline = self.next_deadline();
            tokio::select! {
                biased;
                () = cancel.cancelled() => self.stop(),
                () = sleep_until_opt(deadline) => self.on_timer(Instant::now()).await,
                event = events.recv() => match event {
                    Some(event) => self.handle_event(&event).await,
                    None => self.fail(CoreError::Disconnected),
                },
            }
        }
        self.report()
    }

    pub fn report(&self) -> HarnessReport {
        HarnessReport {
            pass_count: self.cycle.pass_count,
            slow_cycles: self.slow_cycles,
            started: self.started,
            finished: Utc::now(),
            failed_stage: self.failed_stage,
            error: self.last_error.clone(),
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    fn begin_scan(&mut self) {
        if !self.cycle.enabled {
            return;
        }
        let code = self.mesh.start_scan();
        if !code.is_success() {
            warn!(%code, "scan did not start; watchdog will retry");
        }
        let now = Instant::now();
        self.cycle.stage = HarnessStage::Scanning;
        self.cycle.started_at = Some(now);
        self.timers.rescan = Some(now + self.config.rescan_interval);
        debug!(pass = self.cycle.pass_count + 1, "scanning for target");
        self.publish();
    }

    fn end_scan(&self) {
        let code = self.mesh.stop_scan();
        if !code.is_success() {
            warn!(%code, "stop scan rejected");
        }
    }

    fn rescan(&mut self, now: Instant) {
        if self.cycle.stage == HarnessStage::Scanning {
            debug!("re-scan watchdog fired");
            self.end_scan();
            let code = self.mesh.start_scan();
            if !code.is_success() {
                warn!(%code, "re-scan failed");
            }
            self.timers.rescan = Some(now + self.config.rescan_interval);
        } else {
            self.timers.rescan = None;
        }
    }

    fn on_target_found(&mut self, device_id: &DeviceId) {
        info!(device = %device_id, "target discovered");
        self.timers.rescan = None;
        self.end_scan();
        self.cycle.stage = HarnessStage::Provisioning;
        self.publish();
        self.attempt_provision();
    }

    fn attempt_provision(&mut self) {
        if !self.cycle.enabled {
            return;
        }
        let Ok(device_id) = self.target() else {
            return;
        };
        let request = ProvisionRequest {
            device_id,
            original_name: self.config.device_name.clone(),
            group: self.config.group.clone(),
        };
        match self.provisioner.start(request, self.provision_timeout) {
            Ok(()) => {}
            Err(e) if e.is_busy() => self.schedule_retry(PendingRetry::Provision, e),
            Err(e) => self.fail(e),
        }
    }

    async fn on_provisioned(&mut self, outcome: Result<ProvisionedDevice, CoreError>) {
        let device = match outcome {
            Ok(device) => device,
            Err(e) => return self.fail(e),
        };
        self.busy_retries = 0;

        if let (Some(threshold), Some(started)) =
            (self.config.slow_provision_threshold, self.cycle.started_at)
        {
            let elapsed = started.elapsed();
            if elapsed > threshold {
                self.slow_cycles += 1;
                warn!(
                    elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                    threshold_secs = threshold.as_secs(),
                    "provisioning pass was slow"
                );
            }
        }
        if !device.is_legal {
            debug!(name = %device.name, "provisioned device has no groups or methods");
        }

        let code = self
            .mesh
            .identify_device(&device.name, self.config.identify_duration_secs);
        if let Err(e) = code.into_result("identify device") {
            return self.fail(e);
        }

        self.cycle.pass_count += 1;
        info!(pass = self.cycle.pass_count, name = %device.name, "harness pass complete");
        self.cycle.stage = HarnessStage::Deleting;
        self.publish();
        self.delete_device().await;
    }

    async fn delete_device(&mut self) {
        if !self.cycle.enabled {
            return;
        }
        match self.provisioner.delete().await {
            Ok(()) => {
                self.busy_retries = 0;
                let finished = self
                    .config
                    .max_passes
                    .is_some_and(|max| self.cycle.pass_count >= max);
                if finished {
                    info!(passes = self.cycle.pass_count, "pass limit reached");
                    self.stop();
                } else {
                    self.begin_scan();
                }
            }
            Err(e) if e.is_busy() => self.schedule_retry(PendingRetry::Delete, e),
            Err(e) => self.fail(e),
        }
    }

    fn schedule_retry(&mut self, retry: PendingRetry, cause: CoreError) {
        if self.busy_retries >= self.busy_retry_limit {
            return self.fail(cause);
        }
        self.busy_retries += 1;
        warn!(
            attempt = self.busy_retries,
            backoff_secs = self.busy_backoff.as_secs(),
            ?retry,
            "mesh network busy; backing off"
        );
        self.timers.backoff = Some((Instant::now() + self.busy_backoff, retry));
    }

    fn fail(&mut self, cause: CoreError) {
        error!(stage = %self.cycle.stage, passes = self.cycle.pass_count, error = %cause, "harness failed");
        self.timers.clear();
        if self.cycle.stage == HarnessStage::Scanning {
            self.end_scan();
        }
        self.provisioner.reset();
        self.failed_stage = Some(self.cycle.stage);
        self.last_error = Some(cause);
        self.cycle.enabled = false;
        self.cycle.stage = HarnessStage::Idle;
        self.publish();
    }

    fn target(&self) -> Result<DeviceId, CoreError> {
        self.config
            .target
            .clone()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| CoreError::InvalidArguments {
                message: "no harness target device configured".into(),
            })
    }

    fn publish(&self) {
        self.status.send_replace(HarnessStatus {
            stage: self.cycle.stage,
            pass_count: self.cycle.pass_count,
            enabled: self.cycle.enabled,
            slow_cycles: self.slow_cycles,
        });
    }
}
