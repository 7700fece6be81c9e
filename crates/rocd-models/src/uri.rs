//! Stream endpoint URIs.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ValidationError;

/// Forward-error-correction scheme for the packet repair stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fec {
    Rs8m,
    Ldpc,
}

impl Fec {
    /// Name used in backend module arguments.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Fec::Rs8m => "rs8m",
            Fec::Ldpc => "ldpc",
        }
    }
}

impl fmt::Display for Fec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Interface role a URI is validated against.
///
/// The sets of allowed schemes per role are disjoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interface {
    AudioSource,
    AudioRepair,
    AudioControl,
}

impl Interface {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Interface::AudioSource => "audio_source",
            Interface::AudioRepair => "audio_repair",
            Interface::AudioControl => "audio_control",
        }
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stream endpoint URI, e.g. `rtp+rs8m://192.168.0.101:10001`.
///
/// Stored as the raw string the client supplied. Structural and role
/// checks happen in [`Uri::validate`], not at deserialization time, so
/// that a record can be bound from external input first and rejected
/// with a proper reason later.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uri(String);

impl Uri {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Validate the URI against an interface role.
    pub fn validate(&self, interface: Interface) -> Result<(), ValidationError> {
        let url = self.parse()?;

        if url.cannot_be_a_base() {
            return Err(self.invalid("unsupported format"));
        }

        match url.scheme() {
            "rtp" | "rtp+rs8m" | "rs8m" | "rtp+ldpc" | "ldpc" | "rtcp" => {
                if !url.username().is_empty() || url.password().is_some() {
                    return Err(self.invalid("'user' component not supported"));
                }
                if url.host_str().map(str::is_empty).unwrap_or(true) {
                    return Err(self.invalid("'host' component missing"));
                }
                if url.port().is_none() {
                    return Err(self.invalid("'port' component missing"));
                }
                if !self.resource(&url).is_empty() {
                    return Err(self.invalid("'resource' component not supported"));
                }
            }
            "rtsp" => {
                if !url.username().is_empty() || url.password().is_some() {
                    return Err(self.invalid("'user' component not supported"));
                }
            }
            other => {
                return Err(self.invalid(format!("unknown scheme {other:?}")));
            }
        }

        let allowed = match interface {
            Interface::AudioSource => matches!(url.scheme(), "rtp" | "rtp+rs8m" | "rtp+ldpc"),
            Interface::AudioRepair => matches!(url.scheme(), "rs8m" | "ldpc"),
            Interface::AudioControl => url.scheme() == "rtcp",
        };
        if !allowed {
            return Err(ValidationError::SchemeNotAllowed {
                interface: interface.to_string(),
                scheme: url.scheme().to_string(),
            });
        }

        Ok(())
    }

    /// URI scheme, or empty string if the URI does not parse.
    #[must_use]
    pub fn scheme(&self) -> String {
        self.parse()
            .map(|u| u.scheme().to_string())
            .unwrap_or_default()
    }

    /// FEC scheme implied by the URI scheme.
    #[must_use]
    pub fn fec(&self) -> Option<Fec> {
        match self.scheme().as_str() {
            "rs8m" | "rtp+rs8m" => Some(Fec::Rs8m),
            "ldpc" | "rtp+ldpc" => Some(Fec::Ldpc),
            _ => None,
        }
    }

    /// Host component including port, or empty string.
    #[must_use]
    pub fn host(&self) -> String {
        self.parse()
            .ok()
            .and_then(|u| {
                let host = u.host_str()?.to_string();
                Some(match u.port() {
                    Some(port) => format!("{host}:{port}"),
                    None => host,
                })
            })
            .unwrap_or_default()
    }

    /// Host component without port, or empty string.
    #[must_use]
    pub fn ip(&self) -> String {
        self.parse()
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default()
    }

    /// Port component, or empty string.
    #[must_use]
    pub fn port(&self) -> String {
        self.parse()
            .ok()
            .and_then(|u| u.port().map(|p| p.to_string()))
            .unwrap_or_default()
    }

    fn parse(&self) -> Result<Url, ValidationError> {
        Url::parse(&self.0).map_err(|err| ValidationError::InvalidUri {
            uri: self.0.clone(),
            reason: err.to_string(),
        })
    }

    fn resource(&self, url: &Url) -> String {
        let mut ret = String::new();
        let path = url.path();
        if !path.is_empty() && path != "/" {
            ret.push_str(path);
        }
        if let Some(query) = url.query() {
            ret.push('?');
            ret.push_str(query);
        }
        if let Some(frag) = url.fragment() {
            ret.push('#');
            ret.push_str(frag);
        }
        ret
    }

    fn invalid(&self, reason: impl Into<String>) -> ValidationError {
        ValidationError::InvalidUri {
            uri: self.0.clone(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Uri {
    fn from(text: &str) -> Self {
        Self(text.to_string())
    }
}

impl From<String> for Uri {
    fn from(text: String) -> Self {
        Self(text)
    }
}
