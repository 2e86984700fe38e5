//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError`, `ConfigError` and `DecodeError` into user-facing
//! errors with actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use meshctl_config::ConfigError;
use meshctl_core::{CoreError, DecodeError};

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const REJECTED: i32 = 3;
    pub const CONFLICT: i32 = 6;
    pub const BUSY: i32 = 7;
    pub const TIMEOUT: i32 = 8;
    pub const CANCELLED: i32 = 130;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Mesh ─────────────────────────────────────────────────────────
    #[error("Mesh network is busy ({operation})")]
    #[diagnostic(
        code(meshctl::network_busy),
        help(
            "A key refresh or another procedure is in progress.\n\
             Try again shortly."
        )
    )]
    NetworkBusy { operation: String },

    #[error("{operation} rejected by mesh stack (code {code})")]
    #[diagnostic(code(meshctl::rejected))]
    Rejected { operation: String, code: String },

    #[error("{operation} failed: {message}")]
    #[diagnostic(code(meshctl::failed))]
    OperationFailed { operation: String, message: String },

    #[error("{operation} timed out after {seconds}s")]
    #[diagnostic(
        code(meshctl::timeout),
        help("Raise provisioning.timeout_secs in the config file if the device is slow.")
    )]
    Timeout { operation: String, seconds: u64 },

    #[error("{message}")]
    #[diagnostic(code(meshctl::invalid_state))]
    InvalidState { message: String },

    #[error("Operation cancelled")]
    #[diagnostic(code(meshctl::cancelled))]
    Cancelled,

    #[error("Mesh notification stream closed")]
    #[diagnostic(code(meshctl::disconnected))]
    Disconnected,

    // ── Decoding ─────────────────────────────────────────────────────
    #[error("Could not decode status payload")]
    #[diagnostic(
        code(meshctl::decode),
        help(
            "Node reports are a little-endian u16 node count followed by\n\
             4 bytes per node: address (u16le), phase, progress."
        )
    )]
    Decode(#[from] DecodeError),

    #[error("No application version found in '{text}'")]
    #[diagnostic(
        code(meshctl::no_version),
        help("Expected a 'VER:x.y.z' token or a trailing version number.")
    )]
    NoVersion { text: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(meshctl::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration file already exists")]
    #[diagnostic(
        code(meshctl::config_exists),
        help(
            "Path: {path}\n\
             Use --force to overwrite it."
        )
    )]
    ConfigExists { path: String },

    #[error(transparent)]
    #[diagnostic(
        code(meshctl::config),
        help("Check the config file (meshctl config path) and MESHCTL_* variables.")
    )]
    Config(Box<ConfigError>),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to render JSON: {0}")]
    #[diagnostic(code(meshctl::json))]
    Json(#[from] serde_json::Error),

    #[error("Failed to render YAML: {0}")]
    #[diagnostic(code(meshctl::yaml))]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to render TOML: {0}")]
    #[diagnostic(code(meshctl::toml))]
    Toml(#[from] toml::ser::Error),
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            other => Self::Config(Box::new(other)),
        }
    }
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NetworkBusy { .. } => exit_code::BUSY,
            Self::Rejected { .. } => exit_code::REJECTED,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Cancelled => exit_code::CANCELLED,
            Self::ConfigExists { .. } => exit_code::CONFLICT,
            Self::Validation { .. } | Self::Decode(_) => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NetworkBusy { operation } => CliError::NetworkBusy { operation },

            CoreError::InvalidArguments { message } => CliError::Validation {
                field: "arguments".into(),
                reason: message,
            },

            CoreError::InvalidState { message } => CliError::InvalidState { message },

            CoreError::Rejected { operation, code } => CliError::Rejected {
                operation,
                code: code.to_string(),
            },

            CoreError::Failed { operation, message } => {
                CliError::OperationFailed { operation, message }
            }

            CoreError::Timeout {
                operation,
                timeout_secs,
            } => CliError::Timeout {
                operation,
                seconds: timeout_secs,
            },

            CoreError::Cancelled => CliError::Cancelled,

            CoreError::Disconnected => CliError::Disconnected,

            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },
        }
    }
}
