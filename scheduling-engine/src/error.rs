use thiserror::Error;
use uuid::Uuid;

use crate::conflict::ConflictReport;
use crate::models::AppointmentStatus;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum SchedulingError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid time format: '{0}' (expected HH:MM)")]
    InvalidTimeFormat(String),

    #[error("Appointment conflicts detected: {} overlapping booking(s)", .report.conflicts.len())]
    Conflict { report: ConflictReport },

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidStateTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: Uuid },

    #[error("Transaction failed for {operation} after {attempts} attempt(s): {reason}")]
    TransactionFailed {
        operation: String,
        attempts: u32,
        reason: String,
    },

    #[error("Timed out after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SchedulingError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(resource: &'static str, id: Uuid) -> Self {
        Self::NotFound { resource, id }
    }

    /// Whether the transaction runner may retry the failed attempt.
    ///
    /// Generator, detector and state-machine errors are deterministic and never
    /// retried; only transient store failures and timeouts are.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::Timeout { .. } => true,
            _ => false,
        }
    }

    /// Stable machine-readable kind, used by the HTTP layer for status mapping.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) | Self::InvalidTimeFormat(_) => "validation_error",
            Self::Conflict { .. } => "conflict_error",
            Self::InvalidStateTransition { .. } => "invalid_state_transition",
            Self::NotFound { .. } => "not_found",
            Self::TransactionFailed { .. } => "transaction_failed",
            Self::Timeout { .. } => "timeout",
            Self::Store(_) => "store_error",
            Self::Config(_) => "config_error",
        }
    }
}

impl From<StoreError> for SchedulingError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound { resource, id } => Self::NotFound { resource, id },
            other => Self::Store(other),
        }
    }
}

impl From<::config::ConfigError> for SchedulingError {
    fn from(error: ::config::ConfigError) -> Self {
        Self::Config(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SchedulingError>;

/// Failure of a best-effort collaborator (notifications, video meetings).
/// Never surfaces from a scheduling operation; it is logged and dropped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("Collaborator rejected request: {0}")]
    Rejected(String),
}
