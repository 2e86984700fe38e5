// ── Point-to-point OTA domain types ──

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use strum::Display;

use super::ids::DeviceRef;

/// State of a direct single-device firmware transfer.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
)]
pub enum OtaState {
    Idle,
    DiscoveringService,
    ReadingAppInfo,
    TransferringData,
    Complete,
    Failed,
}

impl OtaState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

/// How the transport told us the transfer finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OtaCompletion {
    /// Every byte was acknowledged.
    ByteExact,
    /// The transport sent its "transfer complete" signal.
    Explicit,
}

/// Progress snapshot published to observers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OtaProgress {
    pub state: OtaState,
    pub transferred_bytes: u64,
    pub total_bytes: u64,
}

impl OtaProgress {
    pub fn fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
        let f = self.transferred_bytes as f64 / self.total_bytes as f64;
        f.clamp(0.0, 1.0)
    }
}

impl Default for OtaProgress {
    fn default() -> Self {
        Self {
            state: OtaState::Idle,
            transferred_bytes: 0,
            total_bytes: 0,
        }
    }
}

/// Terminal success result of a direct transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OtaSummary {
    pub device: DeviceRef,
    pub transferred_bytes: u64,
    pub total_bytes: u64,
    pub completion: OtaCompletion,
    pub app_version: Option<String>,
}

/// Live state of one direct transfer.
///
/// `transferred_bytes <= total_bytes` always holds; updates are clamped.
#[derive(Debug, Clone)]
pub struct OtaTransferSession {
    pub(crate) device_ref: DeviceRef,
    pub(crate) firmware_image: Bytes,
    pub(crate) state: OtaState,
    pub(crate) transferred_bytes: u64,
    pub(crate) total_bytes: u64,
    pub(crate) app_version: Option<String>,
    pub(crate) completion: Option<OtaCompletion>,
    pub(crate) last_logged_percent: Option<u8>,
}

impl OtaTransferSession {
    pub(crate) fn new(device_ref: DeviceRef, firmware_image: Bytes) -> Self {
        let total_bytes = u64::try_from(firmware_image.len()).unwrap_or(u64::MAX);
        Self {
            device_ref,
            firmware_image,
            state: OtaState::Idle,
            transferred_bytes: 0,
            total_bytes,
            app_version: None,
            completion: None,
            last_logged_percent: None,
        }
    }

    pub fn device_ref(&self) -> &DeviceRef {
        &self.device_ref
    }

    pub fn firmware_len(&self) -> usize {
        self.firmware_image.len()
    }

    pub fn state(&self) -> OtaState {
        self.state
    }

    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn app_version(&self) -> Option<&str> {
        self.app_version.as_deref()
    }

    pub fn completion(&self) -> Option<OtaCompletion> {
        self.completion
    }

    pub(crate) fn record_transfer(&mut self, transferred: u64, total: u64) {
        if total > 0 {
            self.total_bytes = total;
        }
        self.transferred_bytes = transferred.min(self.total_bytes);
    }

    pub(crate) fn progress(&self) -> OtaProgress {
        OtaProgress {
            state: self.state,
            transferred_bytes: self.transferred_bytes,
            total_bytes: self.total_bytes,
        }
    }
}
