//! rocd persistent store - atomic YAML snapshot of desired state.
//!
//! A single text document holds the declared stream devices and
//! streams. Writes go to a temporary file in the target directory and
//! are renamed into place, so a crash mid-save never corrupts state.

mod document;
pub mod error;

pub use error::{StoreError, StoreResult};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use directories::ProjectDirs;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use rocd_models::{Device, Stream};

use crate::document::{StoreDocument, StoredDevice, StoredStream};

const STATE_FILE: &str = "state.yaml";

#[derive(Default)]
struct Inner {
    // Device and Stream records are immutable; the maps are the only
    // mutable structures.
    devices: HashMap<String, Arc<Device>>,
    streams: HashMap<String, Arc<Stream>>,
}

/// Persistent store for declared stream devices and streams.
pub struct PersistStore {
    path: PathBuf,
    default_dir: Option<PathBuf>,
    inner: RwLock<Inner>,
}

impl PersistStore {
    /// Open the store at the default location under the user's config
    /// directory.
    pub fn open() -> StoreResult<Self> {
        let dir = Self::default_dir().ok_or(StoreError::NoConfigDir)?;
        Self::open_at(dir.join(STATE_FILE))
    }

    /// Open the store at a specific path.
    pub fn open_at(path: PathBuf) -> StoreResult<Self> {
        info!(?path, "initializing storage");

        let store = Self {
            path,
            default_dir: Self::default_dir(),
            inner: RwLock::new(Inner::default()),
        };
        store.load()?;

        {
            let inner = store.inner.read();
            debug!(
                devices = inner.devices.len(),
                streams = inner.streams.len(),
                "loaded state"
            );
        }

        Ok(store)
    }

    fn default_dir() -> Option<PathBuf> {
        ProjectDirs::from("org", "roc-streaming", "rocd").map(|d| d.config_dir().to_path_buf())
    }

    pub fn has_stream_device(&self, uid: &str) -> bool {
        self.inner.read().devices.contains_key(uid)
    }

    pub fn load_stream_devices(&self) -> Vec<Arc<Device>> {
        self.inner.read().devices.values().cloned().collect()
    }

    pub fn load_stream_device(&self, uid: &str) -> Option<Arc<Device>> {
        self.inner.read().devices.get(uid).cloned()
    }

    /// Save one stream device; skips the disk write when the record is
    /// unchanged. On write failure the in-memory map is rolled back.
    pub fn save_stream_device(&self, device: &Device) -> StoreResult<()> {
        assert!(device.is_stream, "not a stream device");

        let mut inner = self.inner.write();

        if let Some(old) = inner.devices.get(&device.uid) {
            if old.as_ref() == device {
                return Ok(());
            }
        }

        debug!(uid = %device.uid, "saving device");

        let previous = inner
            .devices
            .insert(device.uid.clone(), Arc::new(device.clone()));

        if let Err(err) = self.save(&inner) {
            match previous {
                Some(prev) => inner.devices.insert(device.uid.clone(), prev),
                None => inner.devices.remove(&device.uid),
            };
            return Err(err);
        }

        Ok(())
    }

    /// Save a batch of stream devices as a single write.
    pub fn save_stream_devices(&self, devices: &HashMap<String, Arc<Device>>) -> StoreResult<()> {
        let mut inner = self.inner.write();

        let mut replaced: Vec<(String, Option<Arc<Device>>)> = Vec::new();

        for (uid, new_dev) in devices {
            assert!(new_dev.is_stream, "not a stream device");

            let changed = match inner.devices.get(uid) {
                Some(old) => old != new_dev,
                None => true,
            };
            if changed {
                debug!(uid = %uid, "saving device");
                let previous = inner.devices.insert(uid.clone(), Arc::clone(new_dev));
                replaced.push((uid.clone(), previous));
            }
        }

        if replaced.is_empty() {
            return Ok(());
        }

        if let Err(err) = self.save(&inner) {
            for (uid, previous) in replaced {
                match previous {
                    Some(prev) => inner.devices.insert(uid, prev),
                    None => inner.devices.remove(&uid),
                };
            }
            return Err(err);
        }

        Ok(())
    }

    pub fn remove_stream_device(&self, uid: &str) -> StoreResult<()> {
        let mut inner = self.inner.write();

        let Some(previous) = inner.devices.remove(uid) else {
            return Ok(());
        };

        debug!(uid = %uid, "removing device");

        if let Err(err) = self.save(&inner) {
            inner.devices.insert(uid.to_string(), previous);
            return Err(err);
        }

        Ok(())
    }

    pub fn has_stream(&self, uid: &str) -> bool {
        self.inner.read().streams.contains_key(uid)
    }

    pub fn load_streams(&self) -> Vec<Arc<Stream>> {
        self.inner.read().streams.values().cloned().collect()
    }

    pub fn load_stream(&self, uid: &str) -> Option<Arc<Stream>> {
        self.inner.read().streams.get(uid).cloned()
    }

    pub fn save_stream(&self, stream: &Stream) -> StoreResult<()> {
        let mut inner = self.inner.write();

        if let Some(old) = inner.streams.get(&stream.uid) {
            if old.as_ref() == stream {
                return Ok(());
            }
        }

        debug!(uid = %stream.uid, "saving stream");

        let previous = inner
            .streams
            .insert(stream.uid.clone(), Arc::new(stream.clone()));

        if let Err(err) = self.save(&inner) {
            match previous {
                Some(prev) => inner.streams.insert(stream.uid.clone(), prev),
                None => inner.streams.remove(&stream.uid),
            };
            return Err(err);
        }

        Ok(())
    }

    pub fn remove_stream(&self, uid: &str) -> StoreResult<()> {
        let mut inner = self.inner.write();

        let Some(previous) = inner.streams.remove(uid) else {
            return Ok(());
        };

        debug!(uid = %uid, "removing stream");

        if let Err(err) = self.save(&inner) {
            inner.streams.insert(uid.to_string(), previous);
            return Err(err);
        }

        Ok(())
    }

    fn load(&self) -> StoreResult<()> {
        debug!(path = ?self.path, "loading configuration");

        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!("configuration file does not exist");
                String::new()
            }
            Err(err) => {
                return Err(StoreError::ReadFailed {
                    path: self.path.clone(),
                    source: err,
                })
            }
        };

        let doc: StoreDocument = if text.trim().is_empty() {
            StoreDocument::default()
        } else {
            serde_yaml::from_str(&text).map_err(|err| StoreError::LoadFailed {
                path: self.path.clone(),
                source: err,
            })?
        };

        let mut inner = self.inner.write();

        inner.devices.clear();
        for rec in doc.stream_devices {
            if rec.uid.is_empty() || !rec.stream_device {
                warn!("ignoring invalid device in state file");
                continue;
            }
            let dev: Device = rec.into();
            inner.devices.insert(dev.uid.clone(), Arc::new(dev));
        }

        inner.streams.clear();
        for rec in doc.streams {
            if rec.uid.is_empty() {
                warn!("ignoring invalid stream in state file");
                continue;
            }
            let stream: Stream = rec.into();
            inner.streams.insert(stream.uid.clone(), Arc::new(stream));
        }

        Ok(())
    }

    fn save(&self, inner: &Inner) -> StoreResult<()> {
        debug!(path = ?self.path, "saving configuration");

        let parent = self.path.parent().unwrap_or(Path::new("."));

        // The default directory is created automatically. If the user
        // pointed the store elsewhere, the directory must already exist.
        if let Some(default_dir) = &self.default_dir {
            if self.path.starts_with(default_dir) {
                std::fs::create_dir_all(parent).map_err(|err| StoreError::WriteFailed {
                    path: self.path.clone(),
                    source: err,
                })?;
            }
        }

        let mut doc = StoreDocument {
            stream_devices: inner.devices.values().map(|d| StoredDevice::from(d.as_ref())).collect(),
            streams: inner.streams.values().map(|s| StoredStream::from(s.as_ref())).collect(),
        };

        doc.stream_devices.sort_by(|a, b| {
            let key = |d: &StoredDevice| (d.device_type.map(|t| t.as_str()).unwrap_or(""), d.uid.clone());
            key(a).cmp(&key(b))
        });
        doc.streams.sort_by(|a, b| a.uid.cmp(&b.uid));

        // Marshal failure of in-memory state is a correctness bug.
        let text = serde_yaml::to_string(&doc).expect("failed to marshal yaml");

        let tmp = tempfile::NamedTempFile::new_in(parent).map_err(|err| StoreError::WriteFailed {
            path: self.path.clone(),
            source: err,
        })?;

        std::io::Write::write_all(&mut tmp.as_file(), text.as_bytes()).map_err(|err| {
            StoreError::WriteFailed {
                path: self.path.clone(),
                source: err,
            }
        })?;

        tmp.persist(&self.path).map_err(|err| StoreError::WriteFailed {
            path: self.path.clone(),
            source: err.error,
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rocd_models::{Address, AddressList, DeviceType, Uri};
    use tempfile::TempDir;

    fn stream_device(uid: &str, name: &str) -> Device {
        let mut dev = Device {
            uid: uid.into(),
            system_name: name.into(),
            display_name: "Roc Sender".into(),
            device_type: Some(DeviceType::Sink),
            is_stream: true,
            to_address: Some(AddressList(vec![Address {
                audio_source: Uri::new("rtp://192.168.0.1:10001"),
                audio_repair: None,
                audio_control: None,
            }])),
            ..Device::default()
        };
        dev.set_defaults();
        dev
    }

    fn open_store(dir: &TempDir) -> PersistStore {
        PersistStore::open_at(dir.path().join("state.yaml")).unwrap()
    }

    #[test]
    fn missing_file_is_empty_store() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        assert!(store.load_stream_devices().is_empty());
        assert!(store.load_streams().is_empty());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();

        let dev_a = stream_device("uid-a", "rocd.stream_sink.1.1");
        let dev_b = stream_device("uid-b", "rocd.stream_sink.1.2");

        {
            let store = open_store(&dir);
            store.save_stream_device(&dev_a).unwrap();
            store.save_stream_device(&dev_b).unwrap();
        }

        let store = open_store(&dir);
        let mut loaded = store.load_stream_devices();
        loaded.sort_by(|a, b| a.uid.cmp(&b.uid));

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].as_ref(), &dev_a);
        assert_eq!(loaded[1].as_ref(), &dev_b);
    }

    #[test]
    fn internal_handles_survive_round_trip() {
        let dir = TempDir::new().unwrap();

        let mut dev = stream_device("uid-a", "rocd.stream_sink.1.1");
        dev.node_id = "42".into();
        dev.module_id = "7".into();

        {
            let store = open_store(&dir);
            store.save_stream_device(&dev).unwrap();
        }

        let store = open_store(&dir);
        let loaded = store.load_stream_device("uid-a").unwrap();
        assert_eq!(loaded.node_id, "42");
        assert_eq!(loaded.module_id, "7");
    }

    #[test]
    fn unchanged_record_skips_write() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let dev = stream_device("uid-a", "rocd.stream_sink.1.1");
        store.save_stream_device(&dev).unwrap();

        let mtime = std::fs::metadata(dir.path().join("state.yaml"))
            .unwrap()
            .modified()
            .unwrap();

        std::thread::sleep(std::time::Duration::from_millis(20));
        store.save_stream_device(&dev).unwrap();

        let mtime2 = std::fs::metadata(dir.path().join("state.yaml"))
            .unwrap()
            .modified()
            .unwrap();
        assert_eq!(mtime, mtime2);
    }

    #[test]
    fn invalid_records_are_dropped_on_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.yaml");

        std::fs::write(
            &path,
            "stream_devices:\n\
             \x20- uid: \"\"\n\
             \x20  system_name: no-uid\n\
             \x20  stream_device: true\n\
             \x20- uid: not-a-stream\n\
             \x20  system_name: hw\n\
             \x20  stream_device: false\n\
             \x20- uid: good\n\
             \x20  system_name: ok\n\
             \x20  type: sink\n\
             \x20  stream_device: true\n\
             streams:\n\
             \x20- uid: \"\"\n",
        )
        .unwrap();

        let store = PersistStore::open_at(path).unwrap();
        let devices = store.load_stream_devices();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].uid, "good");
        assert!(store.load_streams().is_empty());
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.yaml");

        std::fs::write(
            &path,
            "stream_devices:\n\
             \x20- uid: good\n\
             \x20  system_name: ok\n\
             \x20  type: sink\n\
             \x20  stream_device: true\n\
             \x20  some_future_key: whatever\n",
        )
        .unwrap();

        let store = PersistStore::open_at(path).unwrap();
        assert_eq!(store.load_stream_devices().len(), 1);
    }

    #[test]
    fn malformed_file_fails_to_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.yaml");
        std::fs::write(&path, "stream_devices: [not: {valid").unwrap();

        assert!(matches!(
            PersistStore::open_at(path),
            Err(StoreError::LoadFailed { .. })
        ));
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let dev = stream_device("uid-a", "rocd.stream_sink.1.1");
        store.save_stream_device(&dev).unwrap();

        store.remove_stream_device("uid-a").unwrap();
        assert!(!store.has_stream_device("uid-a"));
        store.remove_stream_device("uid-a").unwrap();
    }

    #[test]
    fn batch_save_writes_once() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let mut batch = HashMap::new();
        for n in 0..3 {
            let dev = stream_device(&format!("uid-{n}"), &format!("rocd.stream_sink.1.{n}"));
            batch.insert(dev.uid.clone(), Arc::new(dev));
        }
        store.save_stream_devices(&batch).unwrap();

        assert_eq!(store.load_stream_devices().len(), 3);
    }

    #[test]
    fn failed_write_rolls_back_memory() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let dev = stream_device("uid-a", "rocd.stream_sink.1.1");
        store.save_stream_device(&dev).unwrap();

        // Replace the state file with a directory so the rename into
        // place fails.
        let path = dir.path().join("state.yaml");
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();

        let mut changed = stream_device("uid-a", "rocd.stream_sink.1.1");
        changed.set_muted(true);
        let result = store.save_stream_device(&changed);

        assert!(result.is_err());
        // The failing write is treated as if not made.
        let current = store.load_stream_device("uid-a").unwrap();
        assert!(!current.muted());
    }

    #[test]
    fn streams_round_trip() {
        let dir = TempDir::new().unwrap();

        let stream = Stream {
            uid: "stream-1".into(),
            stream_type: Some(rocd_models::StreamType::Send),
            from_device: "uid-a".into(),
            ..Stream::default()
        };

        {
            let store = open_store(&dir);
            store.save_stream(&stream).unwrap();
        }

        let store = open_store(&dir);
        let loaded = store.load_stream("stream-1").unwrap();
        assert_eq!(loaded.as_ref(), &stream);

        store.remove_stream("stream-1").unwrap();
        assert!(!store.has_stream("stream-1"));
    }
}
