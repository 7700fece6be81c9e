//! Change events reported to API clients.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    DeviceAdded,
    DeviceRemoved,
    DeviceUpdated,
}

/// One entity change, as delivered over the `/events` stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub device_uid: String,
}

impl Event {
    #[must_use]
    pub fn new(event_type: EventType, device_uid: impl Into<String>) -> Self {
        Self {
            event_type,
            device_uid: device_uid.into(),
        }
    }
}
