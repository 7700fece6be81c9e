//! Store errors.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("could not determine config directory")]
    NoConfigDir,

    #[error("failed to load configuration from {path:?}: {source}")]
    LoadFailed {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("failed to read configuration from {path:?}: {source}")]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to save configuration to {path:?}: {source}")]
    WriteFailed {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
