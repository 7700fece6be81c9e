//! Device subsystem errors.

use thiserror::Error;

use rocd_models::ValidationError;
use rocd_store::StoreError;

/// Errors reported by backend drivers.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend is not present on this host; it is silently skipped
    /// during backend selection.
    #[error("backend not available")]
    NotAvailable,

    /// No registered backend survived probing.
    #[error("no device backend available")]
    NoBackend,

    /// The event channel was already taken by a listener.
    #[error("backend events already consumed")]
    AlreadyListening,

    #[error("failed to run {command:?}: {reason}")]
    CommandFailed { command: String, reason: String },

    #[error("failed to parse {command:?} output: {reason}")]
    BadOutput { command: String, reason: String },

    #[error("failed to create device on backend")]
    CreateFailed,

    #[error("device did not appear on backend during timeout")]
    WaitTimeout,

    #[error("failed to delete device: owner module not known")]
    UnknownModule,

    #[error(transparent)]
    InvalidDevice(#[from] ValidationError),
}

/// Errors surfaced by the device manager to API clients.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device {0:?} not found")]
    NotFound(String),

    #[error("not a stream device")]
    NotStreamDevice,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("failed to save device: {0}")]
    Store(#[from] StoreError),
}

impl DeviceError {
    /// Whether the error was caused by invalid client input.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            DeviceError::Validation(_)
                | DeviceError::NotStreamDevice
                | DeviceError::Backend(BackendError::InvalidDevice(_))
        )
    }
}
