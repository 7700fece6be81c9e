//! Validation errors for model records.

use thiserror::Error;

/// Error returned when a client-supplied record violates an invariant.
///
/// These are reported to the caller, never retried.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("invalid uri {uri:?}: {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("{interface:?} uri does not support {scheme:?} protocol")]
    SchemeNotAllowed { interface: String, scheme: String },

    #[error("'audio_source' uri is missing")]
    MissingSource,

    #[error(
        "'audio_source' uri protocol implies fec scheme {fec:?} for repair packets, \
         but 'audio_repair' uri is missing"
    )]
    MissingRepair { fec: String },

    #[error(
        "'audio_source' uri protocol implies fec scheme {source_fec:?} for repair packets, \
         but 'audio_repair' uri implies fec scheme {repair_fec:?}"
    )]
    FecMismatch {
        source_fec: String,
        repair_fec: String,
    },

    #[error("{0}")]
    InvalidField(String),
}

impl ValidationError {
    pub fn invalid_field(msg: impl Into<String>) -> Self {
        Self::InvalidField(msg.into())
    }
}
