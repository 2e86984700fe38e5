// ── Point-to-point OTA controller ──
//
// Direct firmware transfer to one connected device, outside the mesh.
// The transport reports service discovery, application info, then byte
// counts; either an exact byte match or an explicit completion report
// ends the run.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::event::{EventSubscription, MeshEvent, OtaStatusReport};
use crate::mesh::MeshStack;
use crate::model::{DeviceRef, OtaCompletion, OtaProgress, OtaState, OtaSummary, OtaTransferSession};

const OPERATION: &str = "OTA transfer";
const VERSION_TAG: &str = "VER:";

/// Owner of a single [`OtaTransferSession`].
pub struct OtaTransferController<M: MeshStack> {
    mesh: Arc<M>,
    session: Option<OtaTransferSession>,
    progress: watch::Sender<OtaProgress>,
}

impl<M: MeshStack> OtaTransferController<M> {
    pub fn new(mesh: Arc<M>) -> Self {
        let (progress, _) = watch::channel(OtaProgress::default());
        Self {
            mesh,
            session: None,
            progress,
        }
    }

    pub fn session(&self) -> Option<&OtaTransferSession> {
        self.session.as_ref()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<OtaProgress> {
        self.progress.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.state != OtaState::Idle && !s.state.is_terminal())
    }

    pub fn start(&mut self, device: DeviceRef, image: Bytes) -> Result<(), CoreError> {
        if self.is_active() {
            return Err(CoreError::already_running("OTA"));
        }
        if device.as_str().trim().is_empty() {
            return Err(CoreError::InvalidArguments {
                message: "no target device".into(),
            });
        }
        if image.is_empty() {
            return Err(CoreError::InvalidArguments {
                message: "firmware image is empty".into(),
            });
        }

        let mut session = OtaTransferSession::new(device, image);
        let submitted = self
            .mesh
            .start_point_to_point_ota(&session.device_ref, &session.firmware_image)
            .into_result("start OTA");
        if let Err(e) = submitted {
            session.state = OtaState::Failed;
            self.install(session);
            return Err(e);
        }

        session.state = OtaState::DiscoveringService;
        info!(device = %session.device_ref, image_bytes = session.total_bytes, "OTA started");
        self.install(session);
        Ok(())
    }

    pub fn stop(&mut self) {
        if !self.is_active() {
            return;
        }
        let code = self.mesh.stop_ota();
        if !code.is_success() {
            warn!(%code, "stop OTA rejected");
        }
        if let Some(session) = self.session.as_mut() {
            session.state = OtaState::Idle;
        }
        info!("OTA stopped");
        self.publish();
    }

    /// Apply one notification. Returns the terminal outcome when reached.
    pub fn handle_event(&mut self, event: &MeshEvent) -> Option<Result<OtaSummary, CoreError>> {
        let MeshEvent::OtaStatus(report) = event else {
            return None;
        };
        if !self.is_active() {
            debug!(state = %report.state, "ignoring OTA status without active transfer");
            return None;
        }

        if report.state == OtaState::Failed || report.error_code != 0 {
            return Some(Err(self.fail(report)));
        }

        let session = self.session.as_mut()?;
        if report.state < session.state || report.state == OtaState::Idle {
            debug!(state = %report.state, current = %session.state, "ignoring out-of-order OTA status");
            return None;
        }

        let previous = session.state;
        match report.state {
            OtaState::ReadingAppInfo => {
                session.state = OtaState::ReadingAppInfo;
                if let Some(version) = parse_app_version(&report.description) {
                    info!(version = %version, "device application version");
                    session.app_version = Some(version);
                }
            }
            OtaState::TransferringData => {
                session.state = OtaState::TransferringData;
                session.record_transfer(report.transferred, report.total);
                if let Some(percent) = rounded_percent(session.transferred_bytes, session.total_bytes) {
                    if session.last_logged_percent != Some(percent) {
                        session.last_logged_percent = Some(percent);
                        info!(percent, "OTA progress");
                    }
                }
                if session.total_bytes > 0 && session.transferred_bytes == session.total_bytes {
                    return self.complete(OtaCompletion::ByteExact).map(Ok);
                }
            }
            OtaState::Complete => {
                session.record_transfer(report.transferred, report.total);
                return self.complete(OtaCompletion::Explicit).map(Ok);
            }
            other => session.state = other,
        }

        if previous != session.state {
            info!(from = %previous, to = %session.state, "OTA state changed");
        }
        self.publish();
        None
    }

    pub async fn run(
        &mut self,
        events: &mut EventSubscription,
        cancel: &CancellationToken,
    ) -> Result<OtaSummary, CoreError> {
        if !self.is_active() {
            return Err(CoreError::InvalidState {
                message: "no OTA transfer in progress".into(),
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

    fn complete(&mut self, completion: OtaCompletion) -> Option<OtaSummary> {
        let session = self.session.as_mut()?;
        session.state = OtaState::Complete;
        session.completion = Some(completion);
        let summary = OtaSummary {
            device: session.device_ref.clone(),
            transferred_bytes: session.transferred_bytes,
            total_bytes: session.total_bytes,
            completion,
            app_version: session.app_version.clone(),
        };
        info!(device = %summary.device, bytes = summary.transferred_bytes, ?completion, "OTA complete");
        self.publish();
        Some(summary)
    }

    fn fail(&mut self, report: &OtaStatusReport) -> CoreError {
        if let Some(session) = self.session.as_mut() {
            session.state = OtaState::Failed;
        }
        warn!(error_code = report.error_code, description = %report.description, "OTA failed");
        self.publish();
        let message = if report.description.is_empty() {
            format!("transport reported error code {}", report.error_code)
        } else {
            format!(
                "transport reported error code {}: {}",
                report.error_code, report.description
            )
        };
        CoreError::Failed {
            operation: OPERATION.into(),
            message,
        }
    }

    fn install(&mut self, session: OtaTransferSession) {
        self.session = Some(session);
        self.publish();
    }

    fn publish(&self) {
        let snapshot = self
            .session
            .as_ref()
            .map_or_else(OtaProgress::default, OtaTransferSession::progress);
        self.progress.send_replace(snapshot);
    }
}

/// Extract a firmware version from an application-info string.
///
/// Structured strings carry a `VER:` field; otherwise the last
/// space-separated token is used. Everything but digits and dots is
/// stripped, and an empty result means no version.
pub fn parse_app_version(app_info: &str) -> Option<String> {
    let token = match app_info.find(VERSION_TAG) {
        Some(at) => app_info
            .get(at + VERSION_TAG.len()..)
            .and_then(|rest| rest.split_whitespace().next())
            .unwrap_or_default(),
        None => app_info.split_whitespace().last().unwrap_or_default(),
    };
    let version: String = token
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    (!version.is_empty()).then_some(version)
}

fn rounded_percent(transferred: u64, total: u64) -> Option<u8> {
    if total == 0 {
        return None;
    }
    let pct = (u128::from(transferred) * 100 + u128::from(total) / 2) / u128::from(total);
    u8::try_from(pct.min(100)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_app_info_uses_ver_field() {
        assert_eq!(
            parse_app_version("CID:0x0211 PID:0x0001 VER:1.3.7").as_deref(),
            Some("1.3.7")
        );
        assert_eq!(parse_app_version("VER:v2.0.1-rc CID:7").as_deref(), Some("2.0.1"));
    }

    #[test]
    fn unstructured_app_info_uses_last_token() {
        assert_eq!(parse_app_version("Lamp firmware v4.2").as_deref(), Some("4.2"));
    }

    #[test]
    fn missing_version_is_none() {
        assert_eq!(parse_app_version(""), None);
        assert_eq!(parse_app_version("no version here"), None);
        assert_eq!(parse_app_version("VER:"), None);
    }

    #[test]
    fn percent_rounds_to_nearest() {
        assert_eq!(rounded_percent(0, 0), None);
        assert_eq!(rounded_percent(1, 3), Some(33));
        assert_eq!(rounded_percent(2, 3), Some(67));
        assert_eq!(rounded_percent(10, 10), Some(100));
    }
}
