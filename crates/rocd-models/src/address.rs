//! Stream endpoint addresses.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::uri::{Interface, Uri};

/// A full stream endpoint: a source URI plus optional repair and
/// control URIs.
///
/// If the source URI implies a FEC scheme, a repair URI with the same
/// FEC scheme must be present.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address {
    pub audio_source: Uri,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_repair: Option<Uri>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_control: Option<Uri>,
}

impl Address {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.audio_source.is_empty() {
            self.audio_source.validate(Interface::AudioSource)?;
        }
        if let Some(repair) = &self.audio_repair {
            repair.validate(Interface::AudioRepair)?;
        }
        if let Some(control) = &self.audio_control {
            control.validate(Interface::AudioControl)?;
        }

        if self.audio_source.is_empty() {
            return Err(ValidationError::MissingSource);
        }

        match &self.audio_repair {
            None => {
                if let Some(fec) = self.audio_source.fec() {
                    return Err(ValidationError::MissingRepair {
                        fec: fec.to_string(),
                    });
                }
            }
            Some(repair) => {
                if self.audio_source.fec() != repair.fec() {
                    return Err(ValidationError::FecMismatch {
                        source_fec: self
                            .audio_source
                            .fec()
                            .map(|f| f.to_string())
                            .unwrap_or_default(),
                        repair_fec: repair.fec().map(|f| f.to_string()).unwrap_or_default(),
                    });
                }
            }
        }

        Ok(())
    }
}

/// Ordered list of addresses.
///
/// Wrapped in `Option` on device records so that a patch can
/// distinguish "field not provided" from "provided and empty".
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AddressList(pub Vec<Address>);

impl AddressList {
    pub fn validate(&self) -> Result<(), ValidationError> {
        for addr in &self.0 {
            addr.validate()?;
        }
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn first(&self) -> Option<&Address> {
        self.0.first()
    }
}

impl From<Vec<Address>> for AddressList {
    fn from(addrs: Vec<Address>) -> Self {
        Self(addrs)
    }
}
