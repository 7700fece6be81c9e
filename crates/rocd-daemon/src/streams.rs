//! Stream manager.
//!
//! Placeholder: stream routing is handled by an external component;
//! the daemon only exposes the persistence and the HTTP surface for
//! it.

use std::sync::Arc;

use tracing::info;

use rocd_devices::{DeviceError, DeviceManager};
use rocd_models::Stream;
use rocd_store::PersistStore;

pub struct StreamManager {
    _store: Arc<PersistStore>,
    _devices: Arc<DeviceManager>,
}

impl StreamManager {
    #[must_use]
    pub fn new(store: Arc<PersistStore>, devices: Arc<DeviceManager>) -> Self {
        info!("initializing streams");
        Self {
            _store: store,
            _devices: devices,
        }
    }

    pub async fn list_streams(&self) -> Result<Vec<Stream>, DeviceError> {
        Ok(Vec::new())
    }

    pub async fn get_stream(&self, _uid: &str) -> Result<Option<Stream>, DeviceError> {
        Ok(None)
    }

    pub async fn create_stream(&self, _stream: &Stream) -> Result<Option<Stream>, DeviceError> {
        Ok(None)
    }

    pub async fn update_stream(
        &self,
        _uid: &str,
        _stream: &Stream,
    ) -> Result<Option<Stream>, DeviceError> {
        Ok(None)
    }

    pub async fn delete_stream(&self, _uid: &str) -> Result<(), DeviceError> {
        Ok(())
    }
}
