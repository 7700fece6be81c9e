//! On-disk document schema.
//!
//! The YAML key names differ from the JSON names used on the HTTP
//! surface (`uid` vs `device_uid`, internal handles visible here but
//! hidden there), so the store keeps its own serde records and
//! converts at the boundary.

use serde::{Deserialize, Serialize};

use rocd_models::{AddressList, Device, DeviceDriver, DeviceStatus, DeviceType, Stream, StreamType};

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct StoreDocument {
    pub stream_devices: Vec<StoredDevice>,
    pub streams: Vec<StoredStream>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct StoredDevice {
    pub uid: String,
    pub system_name: String,
    pub display_name: String,
    #[serde(rename = "type")]
    pub device_type: Option<DeviceType>,
    pub driver: Option<DeviceDriver>,
    pub hardware_device: bool,
    pub stream_device: bool,
    pub status: Option<DeviceStatus>,
    pub muted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_address: Option<AddressList>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_address: Option<AddressList>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub node_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub module_id: String,
}

impl From<&Device> for StoredDevice {
    fn from(dev: &Device) -> Self {
        Self {
            uid: dev.uid.clone(),
            system_name: dev.system_name.clone(),
            display_name: dev.display_name.clone(),
            device_type: dev.device_type,
            driver: dev.driver,
            hardware_device: dev.is_hardware,
            stream_device: dev.is_stream,
            status: dev.status,
            muted: dev.is_muted,
            to_address: dev.to_address.clone(),
            from_address: dev.from_address.clone(),
            node_id: dev.node_id.clone(),
            module_id: dev.module_id.clone(),
        }
    }
}

impl From<StoredDevice> for Device {
    fn from(rec: StoredDevice) -> Self {
        Self {
            uid: rec.uid,
            system_name: rec.system_name,
            display_name: rec.display_name,
            device_type: rec.device_type,
            driver: rec.driver,
            is_hardware: rec.hardware_device,
            is_stream: rec.stream_device,
            status: rec.status,
            is_muted: rec.muted,
            to_address: rec.to_address,
            from_address: rec.from_address,
            node_id: rec.node_id,
            module_id: rec.module_id,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct StoredStream {
    pub uid: String,
    #[serde(rename = "type")]
    pub stream_type: Option<StreamType>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub from_device: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_address: Option<AddressList>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub to_device: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_address: Option<AddressList>,
}

impl From<&Stream> for StoredStream {
    fn from(stream: &Stream) -> Self {
        Self {
            uid: stream.uid.clone(),
            stream_type: stream.stream_type,
            from_device: stream.from_device.clone(),
            to_address: stream.to_address.clone(),
            to_device: stream.to_device.clone(),
            from_address: stream.from_address.clone(),
        }
    }
}

impl From<StoredStream> for Stream {
    fn from(rec: StoredStream) -> Self {
        Self {
            uid: rec.uid,
            stream_type: rec.stream_type,
            from_device: rec.from_device,
            to_address: rec.to_address,
            to_device: rec.to_device,
            from_address: rec.from_address,
        }
    }
}
