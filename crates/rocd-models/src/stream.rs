//! Stream records.

use serde::{Deserialize, Serialize};

use crate::address::AddressList;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamType {
    Send,
    Recv,
}

/// A network stream between a local device and remote addresses.
///
/// Managed by the stream manager; the daemon only persists and reports
/// these records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stream {
    #[serde(rename = "stream_uid", default)]
    pub uid: String,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub stream_type: Option<StreamType>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub from_device: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_address: Option<AddressList>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub to_device: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_address: Option<AddressList>,
}

impl Stream {
    /// Stable ordering key: type first, then uid.
    #[must_use]
    pub fn sort_key(&self) -> (&'static str, &str) {
        let type_name = match self.stream_type {
            Some(StreamType::Send) => "send",
            Some(StreamType::Recv) => "recv",
            None => "",
        };
        (type_name, &self.uid)
    }
}
