//! Device records.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::address::AddressList;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Sink,
    Source,
}

impl DeviceType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Sink => "sink",
            DeviceType::Source => "source",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Disabled,
    Enabled,
    /// Device is in the desired set but missing from the backend.
    /// System-generated; never accepted from clients.
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceDriver {
    Pipewire,
    Pulseaudio,
}

impl DeviceDriver {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceDriver::Pipewire => "pipewire",
            DeviceDriver::Pulseaudio => "pulseaudio",
        }
    }
}

impl fmt::Display for DeviceDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An audio device, either discovered on the backend or declared by a
/// client.
///
/// Records are immutable values: every mutation clones the record, and
/// the manager's indices are the only mutable structures. The same
/// struct doubles as the HTTP patch document, which is why most fields
/// are optional or default to empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    // Immutable fields (assigned on creation).
    #[serde(rename = "device_uid", default)]
    pub uid: String,

    #[serde(default)]
    pub system_name: String,
    #[serde(default)]
    pub display_name: String,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<DeviceType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<DeviceDriver>,

    #[serde(rename = "hardware_device", default)]
    pub is_hardware: bool,
    #[serde(rename = "stream_device", default)]
    pub is_stream: bool,

    // Mutable fields (can be updated via HTTP).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<DeviceStatus>,
    #[serde(rename = "muted", default, skip_serializing_if = "Option::is_none")]
    pub is_muted: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_address: Option<AddressList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_address: Option<AddressList>,

    // Backend-internal handles (not visible via HTTP).
    #[serde(skip)]
    pub node_id: String,
    #[serde(skip)]
    pub module_id: String,
}

impl Device {
    /// Whether the device is not explicitly disabled.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.status != Some(DeviceStatus::Disabled)
    }

    #[must_use]
    pub fn muted(&self) -> bool {
        self.is_muted == Some(true)
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.is_muted = Some(muted);
    }

    /// Fill unset fields with their defaults.
    pub fn set_defaults(&mut self) {
        if self.status.is_none() {
            self.status = Some(DeviceStatus::Enabled);
        }
        if self.is_muted.is_none() {
            self.is_muted = Some(false);
        }
        if self.is_stream {
            match self.device_type {
                Some(DeviceType::Sink) => {
                    if self.to_address.is_none() {
                        self.to_address = Some(AddressList::default());
                    }
                }
                Some(DeviceType::Source) => {
                    if self.from_address.is_none() {
                        self.from_address = Some(AddressList::default());
                    }
                }
                None => {}
            }
        }
    }

    /// Stable ordering key: type first, then uid.
    #[must_use]
    pub fn sort_key(&self) -> (&'static str, &str) {
        let type_name = match self.device_type {
            Some(t) => t.as_str(),
            None => "",
        };
        (type_name, &self.uid)
    }
}
