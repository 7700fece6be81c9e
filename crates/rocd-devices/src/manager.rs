//! Device manager - the single-writer reconciler.
//!
//! Owns three views of device state: the persisted desired set, the
//! backend-observed actual set, and the in-memory merged index. Every
//! public operation and every backend event reaction serializes
//! through one lock; backend calls happen while the lock is held, so
//! the reconciler is strictly single-writer.

use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng;
use tokio::sync::{mpsc, Mutex};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use rocd_events::EventDispatcher;
use rocd_models::{Device, DeviceStatus, DeviceType, ValidationError};
use rocd_store::PersistStore;

use crate::backend::{
    open_backend, Backend, BackendEvent, EVENT_CHECK_INTERVAL, EVENT_MIN_INTERVAL,
    FETCH_RETRY_COUNT, FETCH_RETRY_INTERVAL,
};
use crate::error::DeviceError;
use crate::uid::make_device_uid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeviceFilter {
    Any,
    StreamOnly,
}

#[derive(Default)]
struct ManagerState {
    // Device records are immutable; when a device changes, a new
    // record is allocated. The maps are the only mutable structures.
    device_by_uid: HashMap<String, Arc<Device>>,
    device_by_name: HashMap<String, Arc<Device>>,

    // Backend snapshot kept for when a re-fetch fails entirely.
    last_fetch: Vec<Device>,

    last_index: u64,
}

pub struct DeviceManager {
    state: Mutex<ManagerState>,

    backend: Arc<dyn Backend>,
    store: Arc<PersistStore>,
    edisp: Arc<EventDispatcher>,

    base_index: u64,
}

impl DeviceManager {
    /// Select a backend for this host and start the manager.
    pub async fn open(
        store: Arc<PersistStore>,
        edisp: Arc<EventDispatcher>,
        shutdown: CancellationToken,
    ) -> Result<Arc<Self>, DeviceError> {
        let backend = open_backend(Arc::clone(&store), shutdown.clone()).await?;
        Self::with_backend(backend, store, edisp, shutdown)
    }

    /// Start the manager on an already-initialized backend.
    pub fn with_backend(
        backend: Arc<dyn Backend>,
        store: Arc<PersistStore>,
        edisp: Arc<EventDispatcher>,
        shutdown: CancellationToken,
    ) -> Result<Arc<Self>, DeviceError> {
        info!("initializing devices");

        let manager = Arc::new(Self {
            state: Mutex::new(ManagerState {
                last_index: 1,
                ..ManagerState::default()
            }),
            backend,
            store,
            edisp,
            base_index: rand::thread_rng().gen_range(0..10000),
        });

        manager.migrate_devices()?;

        let events = manager.backend.listen()?;
        tokio::spawn(event_loop(Arc::clone(&manager), events, shutdown));

        Ok(manager)
    }

    pub async fn list_devices(&self) -> Result<Vec<Arc<Device>>, DeviceError> {
        let mut state = self.state.lock().await;
        self.reread_devices(&mut state).await?;
        Ok(Self::collect_devices(&state, DeviceFilter::Any))
    }

    pub async fn get_device(&self, uid: &str) -> Result<Arc<Device>, DeviceError> {
        let mut state = self.state.lock().await;
        self.reread_devices(&mut state).await?;
        Self::lookup_device(&state, uid, DeviceFilter::Any)
    }

    pub async fn update_device(&self, uid: &str, patch: &Device) -> Result<Arc<Device>, DeviceError> {
        let mut state = self.state.lock().await;
        self.reread_devices(&mut state).await?;
        self.update_locked(&mut state, uid, patch, DeviceFilter::Any)
            .await?;
        self.reread_devices(&mut state).await?;
        Self::lookup_device(&state, uid, DeviceFilter::Any)
    }

    pub async fn list_stream_devices(&self) -> Result<Vec<Arc<Device>>, DeviceError> {
        let mut state = self.state.lock().await;
        self.reread_devices(&mut state).await?;
        Ok(Self::collect_devices(&state, DeviceFilter::StreamOnly))
    }

    pub async fn get_stream_device(&self, uid: &str) -> Result<Arc<Device>, DeviceError> {
        let mut state = self.state.lock().await;
        self.reread_devices(&mut state).await?;
        Self::lookup_device(&state, uid, DeviceFilter::StreamOnly)
    }

    pub async fn update_stream_device(
        &self,
        uid: &str,
        patch: &Device,
    ) -> Result<Arc<Device>, DeviceError> {
        let mut state = self.state.lock().await;
        self.reread_devices(&mut state).await?;
        self.update_locked(&mut state, uid, patch, DeviceFilter::StreamOnly)
            .await?;
        self.reread_devices(&mut state).await?;
        Self::lookup_device(&state, uid, DeviceFilter::StreamOnly)
    }

    pub async fn create_stream_device(&self, device: &Device) -> Result<Arc<Device>, DeviceError> {
        let mut state = self.state.lock().await;
        self.reread_devices(&mut state).await?;
        let uid = self.create_locked(&mut state, device).await?;
        self.reread_devices(&mut state).await?;
        Self::lookup_device(&state, &uid, DeviceFilter::StreamOnly)
    }

    pub async fn delete_stream_device(&self, uid: &str) -> Result<(), DeviceError> {
        let mut state = self.state.lock().await;
        self.reread_devices(&mut state).await?;
        self.delete_locked(&mut state, uid).await
    }

    fn collect_devices(state: &ManagerState, filter: DeviceFilter) -> Vec<Arc<Device>> {
        let mut devices: Vec<Arc<Device>> = state
            .device_by_uid
            .values()
            .filter(|dev| filter == DeviceFilter::Any || dev.is_stream)
            .cloned()
            .collect();

        devices.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        devices
    }

    fn lookup_device(
        state: &ManagerState,
        uid: &str,
        filter: DeviceFilter,
    ) -> Result<Arc<Device>, DeviceError> {
        let dev = state
            .device_by_uid
            .get(uid)
            .ok_or_else(|| DeviceError::NotFound(uid.to_string()))?;

        if filter == DeviceFilter::StreamOnly && !dev.is_stream {
            return Err(DeviceError::NotStreamDevice);
        }

        Ok(Arc::clone(dev))
    }

    async fn update_locked(
        &self,
        state: &mut ManagerState,
        uid: &str,
        patch: &Device,
        filter: DeviceFilter,
    ) -> Result<(), DeviceError> {
        debug!(uid = %uid, "updating device");

        let current = Self::lookup_device(state, uid, filter)?;
        // Don't modify the committed record.
        let mut dev = current.as_ref().clone();

        // Refuse to update immutable fields. Fields like driver and
        // the device flags are not checked because they're unlikely to
        // be provided intentionally; be liberal with external input.
        if !patch.uid.is_empty() && patch.uid != dev.uid {
            return Err(ValidationError::invalid_field("'device_uid' should be same or empty").into());
        }
        if !patch.system_name.is_empty() && patch.system_name != dev.system_name {
            return Err(ValidationError::invalid_field("'system_name' should be same or empty").into());
        }
        if !patch.display_name.is_empty() && patch.display_name != dev.display_name {
            return Err(
                ValidationError::invalid_field("'display_name' should be same or empty").into(),
            );
        }
        if patch.device_type.is_some() && patch.device_type != dev.device_type {
            return Err(ValidationError::invalid_field("'type' should be same or empty").into());
        }

        // The tri-valued "unavailable" is system-generated.
        if patch.status == Some(DeviceStatus::Unavailable) {
            return Err(ValidationError::invalid_field(
                "'status' should be \"enabled\", \"disabled\", or empty",
            )
            .into());
        }

        if dev.is_stream {
            match dev.device_type {
                Some(DeviceType::Sink) => {
                    if let Some(to) = &patch.to_address {
                        to.validate().map_err(|err| {
                            ValidationError::invalid_field(format!("invalid 'to_address': {err}"))
                        })?;
                    }
                    if patch.from_address.as_ref().map(|l| l.len()).unwrap_or(0) != 0 {
                        return Err(ValidationError::invalid_field(
                            "with 'type' \"sink\", use 'to_address', not 'from_address'",
                        )
                        .into());
                    }
                }
                Some(DeviceType::Source) => {
                    if let Some(from) = &patch.from_address {
                        from.validate().map_err(|err| {
                            ValidationError::invalid_field(format!("invalid 'from_address': {err}"))
                        })?;
                    }
                    if patch.to_address.as_ref().map(|l| l.len()).unwrap_or(0) != 0 {
                        return Err(ValidationError::invalid_field(
                            "with 'type' \"source\", use 'from_address', not 'to_address'",
                        )
                        .into());
                    }
                }
                None => {}
            }
        } else {
            if patch.status.is_some() && patch.status != dev.status {
                return Err(
                    ValidationError::invalid_field("only stream devices can have 'status'").into(),
                );
            }
            let has_addresses = patch.to_address.as_ref().map(|l| l.len()).unwrap_or(0) != 0
                || patch.from_address.as_ref().map(|l| l.len()).unwrap_or(0) != 0;
            if has_addresses {
                return Err(ValidationError::invalid_field(
                    "only stream devices can have 'from_address' or 'to_address'",
                )
                .into());
            }
        }

        // Apply changes, field by field; the first backend failure
        // aborts the update, leaving earlier applies in effect (they
        // reflect backend reality).
        let status_changes = match patch.status {
            Some(DeviceStatus::Disabled) => dev.status != Some(DeviceStatus::Disabled),
            Some(DeviceStatus::Enabled) => dev.status != Some(DeviceStatus::Enabled),
            _ => false,
        };
        if status_changes {
            dev.status = patch.status;
            self.backend.apply_enabled(&mut dev).await?;
        }

        if let Some(muted) = patch.is_muted {
            if muted != dev.muted() {
                dev.set_muted(muted);
                self.backend.apply_muted(&dev).await?;
            }
        }

        if let Some(to) = &patch.to_address {
            if Some(to) != dev.to_address.as_ref() {
                dev.to_address = Some(to.clone());
                self.backend.apply_address(&mut dev).await?;
            }
        }
        if let Some(from) = &patch.from_address {
            if Some(from) != dev.from_address.as_ref() {
                dev.from_address = Some(from.clone());
                self.backend.apply_address(&mut dev).await?;
            }
        }

        // Stream devices are stored persistently, before commit.
        if dev.is_stream {
            self.store.save_stream_device(&dev)?;
        }

        // Commit.
        let dev = Arc::new(dev);
        state
            .device_by_uid
            .insert(dev.uid.clone(), Arc::clone(&dev));
        state.device_by_name.insert(dev.system_name.clone(), dev);

        Ok(())
    }

    async fn create_locked(
        &self,
        state: &mut ManagerState,
        device: &Device,
    ) -> Result<String, DeviceError> {
        debug!("creating new virtual device");

        // We own this copy.
        let mut dev = device.clone();

        // Refuse fields that are generated here. Driver and the device
        // flags are not checked; be liberal with external input.
        if !dev.uid.is_empty() {
            return Err(ValidationError::invalid_field("'device_uid' should be empty").into());
        }

        let Some(device_type) = dev.device_type else {
            return Err(
                ValidationError::invalid_field("'type' should be \"sink\" or \"source\"").into(),
            );
        };

        match device_type {
            DeviceType::Sink => {
                if let Some(to) = &dev.to_address {
                    to.validate().map_err(|err| {
                        ValidationError::invalid_field(format!("invalid 'to_address': {err}"))
                    })?;
                }
                if dev.from_address.as_ref().map(|l| l.len()).unwrap_or(0) != 0 {
                    return Err(ValidationError::invalid_field(
                        "with 'type' \"sink\", use 'to_address', not 'from_address'",
                    )
                    .into());
                }
            }
            DeviceType::Source => {
                if let Some(from) = &dev.from_address {
                    from.validate().map_err(|err| {
                        ValidationError::invalid_field(format!("invalid 'from_address': {err}"))
                    })?;
                }
                if dev.to_address.as_ref().map(|l| l.len()).unwrap_or(0) != 0 {
                    return Err(ValidationError::invalid_field(
                        "with 'type' \"source\", use 'from_address', not 'to_address'",
                    )
                    .into());
                }
            }
        }

        // Set defaults.
        if dev.system_name.is_empty() {
            dev.system_name = self.generate_device_name(state, device_type);
        } else if state.device_by_name.contains_key(&dev.system_name) {
            return Err(ValidationError::invalid_field(format!(
                "'system_name' {:?} already exists",
                dev.system_name
            ))
            .into());
        }

        if dev.display_name.is_empty() {
            dev.display_name = match device_type {
                DeviceType::Sink => "Roc Sender".to_string(),
                DeviceType::Source => "Roc Receiver".to_string(),
            };
        }

        if dev.status.is_none() || dev.status == Some(DeviceStatus::Unavailable) {
            dev.status = Some(DeviceStatus::Enabled);
        }

        dev.uid = make_device_uid(&dev.system_name);
        dev.driver = Some(self.backend.driver());

        dev.is_hardware = false;
        dev.is_stream = true;

        dev.set_defaults();

        if state.device_by_uid.contains_key(&dev.uid) {
            return Err(ValidationError::invalid_field(format!(
                "device {:?} already exists",
                dev.uid
            ))
            .into());
        }

        // (Re)create the device on the backend first; nothing is
        // persisted when this fails.
        self.backend.reset_stream_device(&mut dev).await?;

        debug!(uid = %dev.uid, name = %dev.system_name, "initialized device");

        self.store.save_stream_device(&dev)?;

        // Commit.
        let uid = dev.uid.clone();
        let dev = Arc::new(dev);
        state
            .device_by_uid
            .insert(dev.uid.clone(), Arc::clone(&dev));
        state.device_by_name.insert(dev.system_name.clone(), dev);

        Ok(uid)
    }

    async fn delete_locked(&self, state: &mut ManagerState, uid: &str) -> Result<(), DeviceError> {
        debug!(uid = %uid, "deleting virtual device");

        let has_in_store = self.store.has_stream_device(uid);
        let indexed = state.device_by_uid.get(uid).cloned();

        if indexed.is_none() && !has_in_store {
            return Err(DeviceError::NotFound(uid.to_string()));
        }

        if let Some(dev) = &indexed {
            if !dev.is_stream {
                return Err(DeviceError::NotStreamDevice);
            }
        }

        if let Some(dev) = &indexed {
            debug!(uid = %uid, "destroying device on backend");

            let mut dev = dev.as_ref().clone();
            self.backend.destroy_stream_device(&mut dev).await?;
        }

        if has_in_store {
            self.store.remove_stream_device(uid)?;
        }

        if let Some(dev) = indexed {
            state.device_by_uid.remove(&dev.uid);
            state.device_by_name.remove(&dev.system_name);
        }

        Ok(())
    }

    /// Detect saved devices whose UID became inconsistent with their
    /// system name. This can happen when the machine id changed or the
    /// UID algorithm changed; migrating on startup lets the rest of
    /// the code assume UID and system name always agree.
    fn migrate_devices(&self) -> Result<(), DeviceError> {
        for saved in self.store.load_stream_devices() {
            let recalc_uid = make_device_uid(&saved.system_name);
            if saved.uid == recalc_uid {
                continue;
            }

            warn!(
                old_uid = %saved.uid,
                new_uid = %recalc_uid,
                "detected uid change, migrating device"
            );

            self.store.remove_stream_device(&saved.uid)?;

            let mut dev = saved.as_ref().clone();
            dev.uid = recalc_uid;
            self.store.save_stream_device(&dev)?;
        }

        Ok(())
    }

    /// Re-create or re-enable saved devices which are enabled in
    /// storage but missing or not enabled on the backend.
    ///
    /// Runs when rocd starts and when the backend reports that it
    /// wiped its device list (e.g. a PipeWire restart).
    async fn restore_devices(&self, state: &mut ManagerState) {
        info!("restoring saved devices");

        let mut n_restored = 0;
        let mut n_errors = 0;

        for saved in self.store.load_stream_devices() {
            if !saved.enabled() {
                continue;
            }

            let indexed = state.device_by_uid.get(&saved.uid).cloned();
            if let Some(dev) = &indexed {
                if dev.status == Some(DeviceStatus::Enabled) {
                    continue;
                }
            }

            if indexed.is_none() {
                // Missing from the backend; re-create it.
                debug!(uid = %saved.uid, "creating device");

                let mut create_dev = saved.as_ref().clone();
                create_dev.uid.clear();
                create_dev.status = Some(DeviceStatus::Enabled);

                match self.create_locked(state, &create_dev).await {
                    Ok(uid) => {
                        // UID is derived from the unchanged system
                        // name, so it can't legally change.
                        assert_eq!(uid, saved.uid, "unexpected uid change");
                    }
                    Err(err) => {
                        error!(uid = %saved.uid, error = %err, "failed to create device");
                        n_errors += 1;
                        continue;
                    }
                }
            } else {
                // Present on the backend but not enabled; enable it.
                debug!(uid = %saved.uid, "enabling device");

                let mut update_dev = saved.as_ref().clone();
                update_dev.status = Some(DeviceStatus::Enabled);

                if let Err(err) = self
                    .update_locked(state, &saved.uid, &update_dev, DeviceFilter::StreamOnly)
                    .await
                {
                    error!(uid = %saved.uid, error = %err, "failed to enable device");
                    n_errors += 1;
                    continue;
                }
            }

            n_restored += 1;

            // Write the committed record back if it drifted from what
            // the store holds.
            if let Some(committed) = state.device_by_uid.get(&saved.uid) {
                let stored = self.store.load_stream_device(&saved.uid);
                if stored.as_deref() != Some(committed.as_ref()) {
                    if let Err(err) = self.store.save_stream_device(committed) {
                        error!(uid = %saved.uid, error = %err, "failed to save device");
                        n_errors += 1;
                    }
                }
            }
        }

        if n_errors == 0 {
            info!(restored = n_restored, "restored devices");
        } else {
            warn!(restored = n_restored, errors = n_errors, "restored devices with errors");
        }
    }

    /// Re-read the device list from the backend into memory and
    /// storage, rebuilding both indices.
    async fn reread_devices(&self, state: &mut ManagerState) -> Result<(), DeviceError> {
        // Desired set from persistent storage.
        let mut saved_devices: HashMap<String, Device> = HashMap::new();
        for dev in self.store.load_stream_devices() {
            let mut dev = dev.as_ref().clone();
            dev.set_defaults();
            saved_devices.insert(dev.uid.clone(), dev);
        }

        // Actual set from the backend.
        let mut backend_devices: HashMap<String, Device> = HashMap::new();
        for dev in self.fetch_devices(state).await {
            let mut dev = dev;
            dev.set_defaults();
            backend_devices.insert(dev.uid.clone(), dev);
        }

        // Propagate backend-side changes to storage.
        let mut updated_devices: HashMap<String, Arc<Device>> = HashMap::new();
        for (uid, saved) in &saved_devices {
            let Some(backend_dev) = backend_devices.get(uid) else {
                continue;
            };
            if !backend_dev.is_stream || backend_dev == saved {
                continue;
            }
            if !saved.enabled() && backend_dev.enabled() {
                warn!(uid = %uid, "enabling device because it's present on backend");
            }
            updated_devices.insert(uid.clone(), Arc::new(backend_dev.clone()));
        }
        if !updated_devices.is_empty() {
            self.store.save_stream_devices(&updated_devices)?;
        }

        // Rebuild the merged index: actual devices win; saved devices
        // missing from the backend appear as unavailable (unless they
        // were disabled on purpose). The name index tracks backend
        // reality only.
        state.device_by_uid.clear();
        state.device_by_name.clear();
        for dev in backend_devices.values() {
            let dev = Arc::new(dev.clone());
            state
                .device_by_uid
                .insert(dev.uid.clone(), Arc::clone(&dev));
            state.device_by_name.insert(dev.system_name.clone(), dev);
        }
        for (uid, mut dev) in saved_devices {
            if state.device_by_uid.contains_key(&uid) {
                continue;
            }
            if dev.status == Some(DeviceStatus::Enabled) {
                dev.status = Some(DeviceStatus::Unavailable);
            }
            state.device_by_uid.insert(uid, Arc::new(dev));
        }

        Ok(())
    }

    /// Fetch the backend device list, retrying transient failures.
    /// After the retry budget is exhausted, fall back to the last
    /// successfully fetched list.
    async fn fetch_devices(&self, state: &mut ManagerState) -> Vec<Device> {
        let mut last_err = None;

        for attempt in 0..FETCH_RETRY_COUNT {
            if attempt != 0 {
                tokio::time::sleep(FETCH_RETRY_INTERVAL).await;
            }
            match self.backend.fetch_devices().await {
                Ok(devices) => {
                    state.last_fetch = devices.clone();
                    return devices;
                }
                Err(err) => last_err = Some(err),
            }
        }

        if let Some(err) = last_err {
            warn!(error = %err, "failed to fetch device list");
        }

        state.last_fetch.clone()
    }

    fn generate_device_name(&self, state: &mut ManagerState, device_type: DeviceType) -> String {
        loop {
            let name = format!(
                "rocd.stream_{}.{}.{}",
                device_type, self.base_index, state.last_index
            );
            state.last_index += 1;

            if state.device_by_name.contains_key(&name) {
                continue;
            }
            let used = self
                .store
                .load_stream_devices()
                .iter()
                .any(|dev| dev.system_name == name);
            if used {
                continue;
            }

            return name;
        }
    }

    async fn process_event(&self, event: BackendEvent) {
        let mut state = self.state.lock().await;

        if event != BackendEvent::PeriodicTick {
            info!(event = ?event, "processing event");
        }

        match event {
            BackendEvent::ListWiped => {
                // The backend lost all configured devices (e.g. a
                // PipeWire restart); re-create the saved ones.
                if let Err(err) = self.reread_devices(&mut state).await {
                    error!(error = %err, "failed to re-read devices");
                    return;
                }

                self.restore_devices(&mut state).await;

                if let Err(err) = self.reread_devices(&mut state).await {
                    error!(error = %err, "failed to re-read devices");
                }
            }

            BackendEvent::ListUpdated | BackendEvent::PeriodicTick => {
                if let Err(err) = self.reread_devices(&mut state).await {
                    error!(error = %err, "failed to re-read devices");
                    return;
                }
            }

            BackendEvent::Removed { device_uid } => {
                if let Err(err) = self.process_removed_device(&device_uid) {
                    error!(error = %err, "failed to process removed device");
                    return;
                }
                if let Err(err) = self.reread_devices(&mut state).await {
                    error!(error = %err, "failed to re-read devices");
                }
            }
        }

        // Detect changes and fan events out to subscribers.
        self.edisp.update_devices(&state.device_by_uid);
    }

    /// When the user explicitly removed a device on the backend with
    /// OS tools, disable it instead of re-creating it. Settings are
    /// kept, so the device can be re-enabled via the API later.
    fn process_removed_device(&self, uid: &str) -> Result<(), DeviceError> {
        let Some(saved) = self.store.load_stream_device(uid) else {
            return Ok(());
        };
        if !saved.enabled() {
            return Ok(());
        }

        warn!(uid = %uid, "disabling device because it was removed from backend");

        let mut dev = saved.as_ref().clone();
        dev.status = Some(DeviceStatus::Disabled);

        self.store.save_stream_device(&dev)?;

        Ok(())
    }
}

/// The manager's long-lived event loop: waits on the backend channel
/// and the periodic re-read timer, rate-limits, and dispatches.
async fn event_loop(
    manager: Arc<DeviceManager>,
    mut events: mpsc::Receiver<BackendEvent>,
    shutdown: CancellationToken,
) {
    let mut check = tokio::time::interval_at(
        tokio::time::Instant::now() + EVENT_CHECK_INTERVAL,
        EVENT_CHECK_INTERVAL,
    );
    check.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut limiter = tokio::time::interval(EVENT_MIN_INTERVAL);
    limiter.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
            _ = check.tick() => BackendEvent::PeriodicTick,
        };

        // Rate-limit event handling.
        limiter.tick().await;

        manager.process_event(event).await;
    }

    debug!("device event loop stopped");
}
