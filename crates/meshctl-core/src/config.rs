// ── Runtime controller configuration ──
//
// Timing and sizing knobs for the controllers. Plain data: the config
// crate loads these from disk/env and hands a `MeshConfig` in, core
// never reads files itself.

use std::time::Duration;

use crate::model::DeviceId;

/// Tuning shared by all controllers.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshConfig {
    /// Bounded wait for a terminal provisioning notification.
    pub provision_timeout: Duration,
    /// Fixed (non-exponential) wait before retrying a busy command.
    pub busy_backoff: Duration,
    /// How many busy retries one attempt may consume.
    pub busy_retry_limit: u32,
    /// Capacity of the notification broadcast channel.
    pub event_capacity: usize,
    /// Status reporting interval requested once distribution starts.
    pub dfu_poll_interval_secs: u16,
    pub harness: HarnessConfig,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            provision_timeout: Duration::from_secs(60),
            busy_backoff: Duration::from_secs(10),
            busy_retry_limit: 3,
            event_capacity: 256,
            dfu_poll_interval_secs: 5,
            harness: HarnessConfig::default(),
        }
    }
}

/// Scan/provision harness settings.
#[derive(Debug, Clone, PartialEq)]
pub struct HarnessConfig {
    /// Device the harness provisions over and over.
    pub target: Option<DeviceId>,
    pub group: String,
    /// Name given to the device before provisioning.
    pub device_name: String,
    /// Re-scan watchdog period; covers platforms whose scan silently stops.
    pub rescan_interval: Duration,
    /// Soft bound on one cycle's provisioning time. `None` disables the check.
    pub slow_provision_threshold: Option<Duration>,
    pub identify_duration_secs: u16,
    /// Stop gracefully after this many passes. `None` runs until stopped.
    pub max_passes: Option<u32>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            target: None,
            group: "Test".into(),
            device_name: "harness-device".into(),
            rescan_interval: Duration::from_secs(10),
            slow_provision_threshold: Some(Duration::from_secs(30)),
            identify_duration_secs: 5,
            max_passes: None,
        }
    }
}
