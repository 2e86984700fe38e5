//! Shared configuration for the meshctl tools.
//!
//! One TOML file plus `MESHCTL_*` environment overrides, translated into
//! `meshctl_core::MeshConfig`. Nested keys use a double underscore in the
//! environment, e.g. `MESHCTL_HARNESS__GROUP=Bench`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use meshctl_core::{DeviceId, HarnessConfig, MeshConfig};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub provisioning: ProvisioningSection,

    #[serde(default)]
    pub harness: HarnessSection,

    #[serde(default)]
    pub dfu: DfuSection,

    #[serde(default)]
    pub events: EventsSection,
}

/// CLI presentation defaults.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProvisioningSection {
    pub timeout_secs: u64,
    pub busy_backoff_secs: u64,
    pub busy_retry_limit: u32,
}

impl Default for ProvisioningSection {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            busy_backoff_secs: 10,
            busy_retry_limit: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HarnessSection {
    /// Device UUID (or platform peripheral id) to provision repeatedly.
    pub target: Option<String>,
    pub group: String,
    pub device_name: String,
    pub rescan_interval_secs: u64,
    /// `0` disables the slow-pass warning.
    pub slow_provision_threshold_secs: u64,
    pub identify_duration_secs: u16,
    pub max_passes: Option<u32>,
}

impl Default for HarnessSection {
    fn default() -> Self {
        Self {
            target: None,
            group: "Test".into(),
            device_name: "harness-device".into(),
            rescan_interval_secs: 10,
            slow_provision_threshold_secs: 30,
            identify_duration_secs: 5,
            max_passes: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DfuSection {
    pub poll_interval_secs: u16,
}

impl Default for DfuSection {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EventsSection {
    pub capacity: usize,
}

impl Default for EventsSection {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

// ── Validation and translation ──────────────────────────────────────

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("provisioning.timeout_secs", self.provisioning.timeout_secs),
            ("harness.rescan_interval_secs", self.harness.rescan_interval_secs),
            ("dfu.poll_interval_secs", u64::from(self.dfu.poll_interval_secs)),
            ("events.capacity", u64::try_from(self.events.capacity).unwrap_or(u64::MAX)),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(invalid(field, "must be greater than zero"));
            }
        }
        if self.harness.group.trim().is_empty() {
            return Err(invalid("harness.group", "must not be empty"));
        }
        if self.harness.device_name.trim().is_empty() {
            return Err(invalid("harness.device_name", "must not be empty"));
        }
        if self.harness.target.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(invalid("harness.target", "must not be empty when set"));
        }
        if self.harness.max_passes == Some(0) {
            return Err(invalid("harness.max_passes", "must be at least 1 when set"));
        }
        if !matches!(
            self.defaults.output.as_str(),
            "table" | "json" | "json-compact" | "yaml" | "plain"
        ) {
            return Err(invalid(
                "defaults.output",
                "expected 'table', 'json', 'json-compact', 'yaml', or 'plain'",
            ));
        }
        if !matches!(self.defaults.color.as_str(), "auto" | "always" | "never") {
            return Err(invalid(
                "defaults.color",
                "expected 'auto', 'always', or 'never'",
            ));
        }
        Ok(())
    }

    /// Build the runtime configuration the controllers consume.
    pub fn to_mesh_config(&self) -> Result<MeshConfig, ConfigError> {
        self.validate()?;
        let h = &self.harness;
        Ok(MeshConfig {
            provision_timeout: Duration::from_secs(self.provisioning.timeout_secs),
            busy_backoff: Duration::from_secs(self.provisioning.busy_backoff_secs),
            busy_retry_limit: self.provisioning.busy_retry_limit,
            event_capacity: self.events.capacity,
            dfu_poll_interval_secs: self.dfu.poll_interval_secs,
            harness: HarnessConfig {
                target: h.target.as_deref().map(|t| DeviceId::from(t.trim())),
                group: h.group.clone(),
                device_name: h.device_name.clone(),
                rescan_interval: Duration::from_secs(h.rescan_interval_secs),
                slow_provision_threshold: (h.slow_provision_threshold_secs > 0)
                    .then(|| Duration::from_secs(h.slow_provision_threshold_secs)),
                identify_duration_secs: h.identify_duration_secs,
                max_passes: h.max_passes,
            },
        })
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "meshctl", "meshctl").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("meshctl");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load from an explicit file. A missing file yields the defaults.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("MESHCTL_").split("__"));

    let config: Config = figment.extract()?;
    config.validate()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Validate, serialize to TOML, and write, creating parent directories.
pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    cfg.validate()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}
