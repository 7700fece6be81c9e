//! Device manager behavior against a scripted backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use rocd_devices::{
    make_device_uid, open_backend_from, pin_machine_id, Backend, BackendError, BackendEvent,
    BackendPriority, DeviceError, DeviceManager,
};
use rocd_events::EventDispatcher;
use rocd_models::{Address, AddressList, Device, DeviceDriver, DeviceStatus, DeviceType, Uri};
use rocd_store::PersistStore;

/// In-memory backend with a command log.
#[derive(Debug)]
struct MockBackend {
    driver: DeviceDriver,
    priority: BackendPriority,
    available: bool,

    devices: Mutex<HashMap<String, Device>>,
    log: Mutex<Vec<String>>,

    event_tx: mpsc::Sender<BackendEvent>,
    event_rx: Mutex<Option<mpsc::Receiver<BackendEvent>>>,

    next_node: AtomicU64,
}

impl MockBackend {
    fn new(driver: DeviceDriver, priority: BackendPriority, available: bool) -> Arc<Self> {
        let (event_tx, event_rx) = mpsc::channel(2);
        Arc::new(Self {
            driver,
            priority,
            available,
            devices: Mutex::new(HashMap::new()),
            log: Mutex::new(Vec::new()),
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
            next_node: AtomicU64::new(1),
        })
    }

    fn log_entries(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    fn count_in_log(&self, needle: &str) -> usize {
        self.log.lock().iter().filter(|e| e.as_str() == needle).count()
    }

    /// Plant a device as if it already existed on the backend.
    fn plant_device(&self, dev: &Device) {
        let mut dev = dev.clone();
        if dev.node_id.is_empty() {
            dev.node_id = self.next_node.fetch_add(1, Ordering::Relaxed).to_string();
        }
        dev.set_defaults();
        self.devices.lock().insert(dev.uid.clone(), dev);
    }

    async fn emit(&self, event: BackendEvent) {
        self.event_tx.send(event).await.expect("event channel");
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn driver(&self) -> DeviceDriver {
        self.driver
    }

    fn priority(&self) -> BackendPriority {
        self.priority
    }

    async fn init(
        &self,
        _store: Arc<PersistStore>,
        _shutdown: CancellationToken,
    ) -> Result<(), BackendError> {
        if !self.available {
            return Err(BackendError::NotAvailable);
        }
        self.log.lock().push("init".into());
        Ok(())
    }

    fn listen(&self) -> Result<mpsc::Receiver<BackendEvent>, BackendError> {
        self.event_rx.lock().take().ok_or(BackendError::AlreadyListening)
    }

    async fn fetch_devices(&self) -> Result<Vec<Device>, BackendError> {
        Ok(self.devices.lock().values().cloned().collect())
    }

    async fn reset_stream_device(&self, device: &mut Device) -> Result<(), BackendError> {
        if !device.enabled() {
            return Ok(());
        }
        self.log.lock().push(format!("reset {}", device.uid));

        device.node_id = self.next_node.fetch_add(1, Ordering::Relaxed).to_string();

        let mut stored = device.clone();
        stored.set_defaults();
        self.devices.lock().insert(stored.uid.clone(), stored);

        Ok(())
    }

    async fn destroy_stream_device(&self, device: &mut Device) -> Result<(), BackendError> {
        self.log.lock().push(format!("destroy {}", device.uid));
        self.devices.lock().remove(&device.uid);
        device.node_id.clear();
        Ok(())
    }

    async fn apply_enabled(&self, device: &mut Device) -> Result<(), BackendError> {
        self.log
            .lock()
            .push(format!("apply_enabled {} {}", device.uid, device.enabled()));

        if device.enabled() {
            self.reset_stream_device(device).await
        } else {
            self.destroy_stream_device(device).await
        }
    }

    async fn apply_muted(&self, device: &Device) -> Result<(), BackendError> {
        self.log
            .lock()
            .push(format!("apply_muted {} {}", device.uid, device.muted()));

        if let Some(stored) = self.devices.lock().get_mut(&device.uid) {
            stored.set_muted(device.muted());
        }
        Ok(())
    }

    async fn apply_address(&self, device: &mut Device) -> Result<(), BackendError> {
        self.log.lock().push(format!("apply_address {}", device.uid));

        // Settings can't change on the fly; re-create the device.
        self.destroy_stream_device(device).await?;
        self.reset_stream_device(device).await
    }
}

struct Harness {
    _dir: TempDir,
    store: Arc<PersistStore>,
    edisp: Arc<EventDispatcher>,
    backend: Arc<MockBackend>,
    manager: Arc<DeviceManager>,
}

async fn harness() -> Harness {
    harness_with(|_| {}).await
}

/// Build a manager over a mock backend, letting the caller seed the
/// store and the backend first.
async fn harness_with(seed: impl FnOnce(&SeedContext)) -> Harness {
    pin_machine_id("test-machine");

    let dir = TempDir::new().expect("tempdir");
    let store = Arc::new(
        PersistStore::open_at(dir.path().join("state.yaml")).expect("open store"),
    );
    let edisp = Arc::new(EventDispatcher::new());
    let backend = MockBackend::new(DeviceDriver::Pipewire, BackendPriority::High, true);

    seed(&SeedContext {
        store: &store,
        backend: &backend,
    });

    let shutdown = CancellationToken::new();
    backend
        .init(Arc::clone(&store), shutdown.clone())
        .await
        .expect("backend init");

    let manager = DeviceManager::with_backend(
        backend.clone(),
        Arc::clone(&store),
        Arc::clone(&edisp),
        shutdown,
    )
    .expect("manager");

    Harness {
        _dir: dir,
        store,
        edisp,
        backend,
        manager,
    }
}

struct SeedContext<'a> {
    store: &'a Arc<PersistStore>,
    backend: &'a Arc<MockBackend>,
}

fn sink_request(port: u16) -> Device {
    Device {
        device_type: Some(DeviceType::Sink),
        to_address: Some(AddressList(vec![Address {
            audio_source: Uri::new(format!("rtp+rs8m://10.0.0.1:{port}")),
            audio_repair: Some(Uri::new(format!("rs8m://10.0.0.1:{}", port + 1))),
            audio_control: None,
        }])),
        ..Device::default()
    }
}

/// A fully-formed stream device as it would exist after a create.
fn saved_sink(name: &str) -> Device {
    let mut dev = Device {
        uid: make_device_uid(name),
        system_name: name.into(),
        display_name: "Roc Sender".into(),
        device_type: Some(DeviceType::Sink),
        driver: Some(DeviceDriver::Pipewire),
        is_stream: true,
        to_address: Some(AddressList(vec![Address {
            audio_source: Uri::new("rtp://10.0.0.1:20001"),
            audio_repair: None,
            audio_control: None,
        }])),
        ..Device::default()
    };
    dev.set_defaults();
    dev
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

#[tokio::test(start_paused = true)]
async fn create_sink_sets_defaults_and_persists() {
    let h = harness().await;

    let created = h.manager.create_stream_device(&sink_request(10001)).await.unwrap();

    assert!(!created.uid.is_empty());
    assert!(
        created.system_name.starts_with("rocd.stream_sink.") && created.system_name.ends_with(".1"),
        "unexpected name {:?}",
        created.system_name
    );
    assert_eq!(created.display_name, "Roc Sender");
    assert_eq!(created.status, Some(DeviceStatus::Enabled));
    assert_eq!(created.is_muted, Some(false));
    assert_eq!(created.driver, Some(DeviceDriver::Pipewire));
    assert!(created.is_stream);
    assert!(!created.is_hardware);
    assert_eq!(created.uid, make_device_uid(&created.system_name));

    // Exactly this record is persisted.
    let stored = h.store.load_stream_device(&created.uid).expect("persisted");
    assert_eq!(stored.as_ref(), created.as_ref());

    // And the backend was asked to create it once.
    assert_eq!(h.backend.count_in_log(&format!("reset {}", created.uid)), 1);
}

#[tokio::test(start_paused = true)]
async fn create_generates_sequential_names() {
    let h = harness().await;

    let first = h.manager.create_stream_device(&sink_request(10001)).await.unwrap();
    let second = h.manager.create_stream_device(&sink_request(10003)).await.unwrap();

    assert!(first.system_name.ends_with(".1"));
    assert!(second.system_name.ends_with(".2"));
}

#[tokio::test(start_paused = true)]
async fn create_rejects_bad_requests() {
    let h = harness().await;

    // Non-empty uid.
    let mut req = sink_request(10001);
    req.uid = "some-uid".into();
    assert!(matches!(
        h.manager.create_stream_device(&req).await,
        Err(DeviceError::Validation(_))
    ));

    // Missing type.
    let req = Device::default();
    assert!(matches!(
        h.manager.create_stream_device(&req).await,
        Err(DeviceError::Validation(_))
    ));

    // Sink with from_address.
    let mut req = sink_request(10001);
    req.from_address = Some(AddressList(vec![Address {
        audio_source: Uri::new("rtp://10.0.0.1:30001"),
        audio_repair: None,
        audio_control: None,
    }]));
    assert!(h.manager.create_stream_device(&req).await.is_err());

    // Invalid address (fec source without repair).
    let mut req = sink_request(10001);
    req.to_address = Some(AddressList(vec![Address {
        audio_source: Uri::new("rtp+rs8m://10.0.0.1:10001"),
        audio_repair: None,
        audio_control: None,
    }]));
    assert!(matches!(
        h.manager.create_stream_device(&req).await,
        Err(DeviceError::Validation(_))
    ));

    // Nothing leaked into the store.
    assert!(h.store.load_stream_devices().is_empty());
}

#[tokio::test(start_paused = true)]
async fn create_rejects_duplicate_system_name() {
    let h = harness().await;

    let mut req = sink_request(10001);
    req.system_name = "custom-name".into();
    h.manager.create_stream_device(&req).await.unwrap();

    let mut req = sink_request(10003);
    req.system_name = "custom-name".into();
    assert!(matches!(
        h.manager.create_stream_device(&req).await,
        Err(DeviceError::Validation(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn update_rejects_immutable_field_changes() {
    let h = harness().await;
    let created = h.manager.create_stream_device(&sink_request(10001)).await.unwrap();

    let cases: Vec<Device> = vec![
        Device {
            uid: "other-uid".into(),
            ..Device::default()
        },
        Device {
            system_name: "other-name".into(),
            ..Device::default()
        },
        Device {
            display_name: "Other".into(),
            ..Device::default()
        },
        Device {
            device_type: Some(DeviceType::Source),
            ..Device::default()
        },
    ];

    for patch in cases {
        let err = h
            .manager
            .update_stream_device(&created.uid, &patch)
            .await
            .expect_err("immutable change must fail");
        assert!(matches!(err, DeviceError::Validation(_)), "{err}");
    }

    // Store and index are unchanged.
    let stored = h.store.load_stream_device(&created.uid).unwrap();
    assert_eq!(stored.as_ref(), created.as_ref());
    let current = h.manager.get_stream_device(&created.uid).await.unwrap();
    assert_eq!(current.as_ref(), created.as_ref());
}

#[tokio::test(start_paused = true)]
async fn update_rejects_unavailable_status() {
    let h = harness().await;
    let created = h.manager.create_stream_device(&sink_request(10001)).await.unwrap();

    let patch = Device {
        status: Some(DeviceStatus::Unavailable),
        ..Device::default()
    };
    assert!(matches!(
        h.manager.update_stream_device(&created.uid, &patch).await,
        Err(DeviceError::Validation(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn update_mute_reaches_backend_and_store() {
    let h = harness().await;
    let created = h.manager.create_stream_device(&sink_request(10001)).await.unwrap();

    let patch = Device {
        is_muted: Some(true),
        ..Device::default()
    };
    let updated = h.manager.update_stream_device(&created.uid, &patch).await.unwrap();

    assert!(updated.muted());
    assert_eq!(h.backend.count_in_log(&format!("apply_muted {} true", created.uid)), 1);
    assert!(h.store.load_stream_device(&created.uid).unwrap().muted());

    // Same mute again is a no-op towards the backend.
    h.manager.update_stream_device(&created.uid, &patch).await.unwrap();
    assert_eq!(h.backend.count_in_log(&format!("apply_muted {} true", created.uid)), 1);
}

#[tokio::test(start_paused = true)]
async fn update_address_recreates_device() {
    let h = harness().await;
    let created = h.manager.create_stream_device(&sink_request(10001)).await.unwrap();

    let patch = Device {
        to_address: sink_request(10005).to_address,
        ..Device::default()
    };
    let updated = h.manager.update_stream_device(&created.uid, &patch).await.unwrap();

    assert_eq!(updated.to_address, patch.to_address);
    assert_eq!(updated.display_name, created.display_name);
    assert_eq!(updated.system_name, created.system_name);

    // The address change is effected by destroy + reset.
    let log = h.backend.log_entries();
    let apply_pos = log
        .iter()
        .position(|e| e == &format!("apply_address {}", created.uid))
        .expect("apply_address logged");
    assert!(log[apply_pos..].contains(&format!("destroy {}", created.uid)));
    assert!(log[apply_pos..].contains(&format!("reset {}", created.uid)));

    // Persisted record carries the new address.
    let stored = h.store.load_stream_device(&created.uid).unwrap();
    assert_eq!(stored.to_address, patch.to_address);
}

#[tokio::test(start_paused = true)]
async fn disable_then_enable_round_trips_through_backend() {
    let h = harness().await;
    let created = h.manager.create_stream_device(&sink_request(10001)).await.unwrap();

    let disable = Device {
        status: Some(DeviceStatus::Disabled),
        ..Device::default()
    };
    let disabled = h.manager.update_stream_device(&created.uid, &disable).await.unwrap();

    assert_eq!(disabled.status, Some(DeviceStatus::Disabled));
    // Disabled devices are removed from the backend, not kept.
    assert!(!h.backend.devices.lock().contains_key(&created.uid));

    let enable = Device {
        status: Some(DeviceStatus::Enabled),
        ..Device::default()
    };
    let enabled = h.manager.update_stream_device(&created.uid, &enable).await.unwrap();

    assert_eq!(enabled.status, Some(DeviceStatus::Enabled));
    assert!(h.backend.devices.lock().contains_key(&created.uid));
}

#[tokio::test(start_paused = true)]
async fn delete_removes_backend_store_and_index() {
    let h = harness().await;
    let created = h.manager.create_stream_device(&sink_request(10001)).await.unwrap();

    h.manager.delete_stream_device(&created.uid).await.unwrap();

    assert!(!h.backend.devices.lock().contains_key(&created.uid));
    assert!(!h.store.has_stream_device(&created.uid));
    assert!(matches!(
        h.manager.get_device(&created.uid).await,
        Err(DeviceError::NotFound(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn delete_unknown_device_is_not_found() {
    let h = harness().await;
    assert!(matches!(
        h.manager.delete_stream_device("no-such-uid").await,
        Err(DeviceError::NotFound(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn delete_works_for_store_only_device() {
    let h = harness_with(|ctx| {
        // Present in the store, missing on the backend.
        ctx.store.save_stream_device(&saved_sink("ghost")).unwrap();
    })
    .await;

    let uid = make_device_uid("ghost");
    h.manager.delete_stream_device(&uid).await.unwrap();
    assert!(!h.store.has_stream_device(&uid));
}

#[tokio::test(start_paused = true)]
async fn saved_device_missing_from_backend_is_unavailable() {
    let h = harness_with(|ctx| {
        ctx.store.save_stream_device(&saved_sink("lost")).unwrap();
    })
    .await;

    let uid = make_device_uid("lost");
    let dev = h.manager.get_stream_device(&uid).await.unwrap();
    assert_eq!(dev.status, Some(DeviceStatus::Unavailable));

    // A disabled saved device stays disabled instead.
    let mut disabled = saved_sink("off");
    disabled.status = Some(DeviceStatus::Disabled);
    h.store.save_stream_device(&disabled).unwrap();

    let dev = h.manager.get_stream_device(&make_device_uid("off")).await.unwrap();
    assert_eq!(dev.status, Some(DeviceStatus::Disabled));
}

#[tokio::test(start_paused = true)]
async fn backend_side_changes_propagate_to_store() {
    let h = harness_with(|ctx| {
        // Disabled in the store, but alive and enabled on the backend.
        let mut dev = saved_sink("overridden");
        dev.status = Some(DeviceStatus::Disabled);
        ctx.store.save_stream_device(&dev).unwrap();

        let mut on_backend = saved_sink("overridden");
        on_backend.status = Some(DeviceStatus::Enabled);
        ctx.backend.plant_device(&on_backend);
    })
    .await;

    let uid = make_device_uid("overridden");
    let dev = h.manager.get_stream_device(&uid).await.unwrap();
    assert_eq!(dev.status, Some(DeviceStatus::Enabled));

    // The backend state won and was written back.
    let stored = h.store.load_stream_device(&uid).unwrap();
    assert_eq!(stored.status, Some(DeviceStatus::Enabled));
}

#[tokio::test(start_paused = true)]
async fn reread_twice_is_a_noop() {
    let h = harness_with(|ctx| {
        ctx.store.save_stream_device(&saved_sink("steady")).unwrap();
        ctx.backend.plant_device(&saved_sink("steady"));
    })
    .await;

    let first = h.manager.list_devices().await.unwrap();
    let second = h.manager.list_devices().await.unwrap();

    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(a.as_ref(), b.as_ref());
    }
}

#[tokio::test(start_paused = true)]
async fn list_wiped_restores_saved_devices() {
    let h = harness_with(|ctx| {
        ctx.store.save_stream_device(&saved_sink("restoreme")).unwrap();
    })
    .await;

    let uid = make_device_uid("restoreme");

    h.backend.emit(BackendEvent::ListWiped).await;

    let backend = h.backend.clone();
    let wanted = uid.clone();
    wait_until(move || backend.devices.lock().contains_key(&wanted)).await;

    // Re-created exactly once, and re-observed enabled.
    assert_eq!(h.backend.count_in_log(&format!("reset {uid}")), 1);
    let dev = h.manager.get_stream_device(&uid).await.unwrap();
    assert_eq!(dev.status, Some(DeviceStatus::Enabled));

    // Subscribers observed the device.
    let edisp = h.edisp.clone();
    let uid2 = uid.clone();
    wait_until(move || edisp.current().devices.contains_key(&uid2)).await;
}

#[tokio::test(start_paused = true)]
async fn out_of_band_removal_disables_device() {
    let h = harness_with(|ctx| {
        ctx.store.save_stream_device(&saved_sink("killed")).unwrap();
        ctx.backend.plant_device(&saved_sink("killed"));
    })
    .await;

    let uid = make_device_uid("killed");

    // The user removed the device with OS tools; the backend no
    // longer reports it.
    h.backend.devices.lock().remove(&uid);
    h.backend
        .emit(BackendEvent::Removed {
            device_uid: uid.clone(),
        })
        .await;

    let store = h.store.clone();
    let uid2 = uid.clone();
    wait_until(move || {
        store
            .load_stream_device(&uid2)
            .map(|d| d.status == Some(DeviceStatus::Disabled))
            .unwrap_or(false)
    })
    .await;

    // The device was not re-created.
    assert_eq!(h.backend.count_in_log(&format!("reset {uid}")), 0);

    // And it shows up disabled, with settings retained.
    let dev = h.manager.get_stream_device(&uid).await.unwrap();
    assert_eq!(dev.status, Some(DeviceStatus::Disabled));
    assert!(dev.to_address.is_some());
}

#[tokio::test(start_paused = true)]
async fn uid_migration_runs_at_startup() {
    let h = harness_with(|ctx| {
        let mut dev = saved_sink("renamed");
        dev.uid = "00000000-stale".into();
        ctx.store.save_stream_device(&dev).unwrap();
    })
    .await;

    let new_uid = make_device_uid("renamed");
    assert!(!h.store.has_stream_device("00000000-stale"));
    let migrated = h.store.load_stream_device(&new_uid).expect("migrated");
    assert_eq!(migrated.system_name, "renamed");
}

#[tokio::test(start_paused = true)]
async fn backend_selection_honors_priority() {
    pin_machine_id("test-machine");
    let dir = TempDir::new().unwrap();
    let store = Arc::new(PersistStore::open_at(dir.path().join("state.yaml")).unwrap());

    // Both available: the high-priority one wins.
    let high = MockBackend::new(DeviceDriver::Pipewire, BackendPriority::High, true);
    let medium = MockBackend::new(DeviceDriver::Pulseaudio, BackendPriority::Medium, true);

    let selected = open_backend_from(
        vec![medium as Arc<dyn Backend>, high as Arc<dyn Backend>],
        Arc::clone(&store),
        CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(selected.driver(), DeviceDriver::Pipewire);

    // High unavailable: fall through to medium.
    let high = MockBackend::new(DeviceDriver::Pipewire, BackendPriority::High, false);
    let medium = MockBackend::new(DeviceDriver::Pulseaudio, BackendPriority::Medium, true);

    let selected = open_backend_from(
        vec![high as Arc<dyn Backend>, medium as Arc<dyn Backend>],
        Arc::clone(&store),
        CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(selected.driver(), DeviceDriver::Pulseaudio);

    // None available: startup fails.
    let high = MockBackend::new(DeviceDriver::Pipewire, BackendPriority::High, false);
    let medium = MockBackend::new(DeviceDriver::Pulseaudio, BackendPriority::Medium, false);

    let err = open_backend_from(
        vec![high as Arc<dyn Backend>, medium as Arc<dyn Backend>],
        store,
        CancellationToken::new(),
    )
    .await
    .expect_err("no backend");
    assert!(matches!(err, BackendError::NoBackend));
}
