// ── Core error types ──
//
// Outcomes every controller reports to its caller. Mesh-stack result
// codes are translated here; decode errors for status payloads live in
// `status` and never reach this type.

use thiserror::Error;

use crate::mesh::ResultCode;

/// Unified error type for the core crate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    // ── Caller errors ────────────────────────────────────────────────
    #[error("Invalid arguments: {message}")]
    InvalidArguments { message: String },

    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    // ── Mesh stack errors ────────────────────────────────────────────
    #[error("Mesh network is busy ({operation}); try again shortly")]
    NetworkBusy { operation: String },

    #[error("{operation} rejected by mesh stack (code {code})")]
    Rejected { operation: String, code: ResultCode },

    #[error("{operation} failed: {message}")]
    Failed { operation: String, message: String },

    #[error("{operation} timed out after {timeout_secs}s")]
    Timeout { operation: String, timeout_secs: u64 },

    // ── Lifecycle errors ─────────────────────────────────────────────
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Notification bus closed")]
    Disconnected,

    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// How a failure should be presented to a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserFacing {
    TryAgainShortly,
    GenericFailure,
    Cancelled,
}

impl CoreError {
    /// Translate a non-success mesh-stack result code.
    ///
    /// `InvalidState` is the stack's "mid key-refresh" signal and becomes
    /// [`CoreError::NetworkBusy`].
    pub fn from_code(operation: &str, code: ResultCode) -> Self {
        match code {
            ResultCode::InvalidState => Self::NetworkBusy {
                operation: operation.into(),
            },
            ResultCode::InvalidArguments => Self::InvalidArguments {
                message: format!("{operation} rejected its arguments"),
            },
            other => Self::Rejected {
                operation: operation.into(),
                code: other,
            },
        }
    }

    /// The only error class eligible for automatic retry.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::NetworkBusy { .. })
    }

    pub fn user_facing(&self) -> UserFacing {
        match self {
            Self::NetworkBusy { .. } => UserFacing::TryAgainShortly,
            Self::Cancelled => UserFacing::Cancelled,
            _ => UserFacing::GenericFailure,
        }
    }

    pub(crate) fn already_running(what: &str) -> Self {
        Self::InvalidState {
            message: format!("a {what} session is already in progress; stop it first"),
        }
    }
}
