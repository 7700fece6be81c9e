//! Backend driver abstraction.
//!
//! A backend adapts one host audio subsystem (PipeWire, PulseAudio)
//! into an event channel plus a command surface. Backends are probed
//! in priority order during startup; the first one whose control
//! programs respond wins.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use rocd_models::{Device, DeviceDriver};
use rocd_store::PersistStore;

use crate::error::BackendError;
use crate::pipewire::PipewireBackend;
use crate::pulseaudio::PulseaudioBackend;

/// Retry budget when fetching the device list from the backend.
pub(crate) const FETCH_RETRY_COUNT: usize = 5;
pub(crate) const FETCH_RETRY_INTERVAL: Duration = Duration::from_millis(20);

/// How long to wait before reconnecting to the backend event program.
pub(crate) const BACKEND_RECONNECT_INTERVAL: Duration = Duration::from_secs(3);
/// How long to wait until the backend handles a request.
pub(crate) const BACKEND_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);
/// How often to ping the backend during connection establishment.
pub(crate) const BACKEND_PING_INTERVAL: Duration = Duration::from_millis(20);

/// Rate limit for backend event handling.
pub(crate) const EVENT_MIN_INTERVAL: Duration = Duration::from_millis(20);
/// Period of the re-read timer that catches lost backend events.
pub(crate) const EVENT_CHECK_INTERVAL: Duration = Duration::from_secs(15);

/// Events emitted by a backend towards the device manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    /// The backend forgot its configured devices (e.g. it restarted);
    /// saved devices must be restored.
    ListWiped,
    /// Some device was added, changed, or removed; the device list
    /// must be re-read. Coalescible: may be dropped when the channel
    /// is full because the next re-read subsumes it.
    ListUpdated,
    /// A specific stream device was removed out-of-band by the user;
    /// it must be disabled rather than re-created.
    Removed { device_uid: String },
    /// Synthetic timer tick, emitted by the device manager itself to
    /// catch events lost by the backend.
    PeriodicTick,
}

/// Backend selection order during startup, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BackendPriority {
    Low,
    Medium,
    High,
}

/// Capability surface of one host audio subsystem.
///
/// All methods except `init` and `listen` are invoked while the device
/// manager holds its lock, so implementations never race each other.
#[async_trait]
pub trait Backend: Send + Sync + std::fmt::Debug {
    fn driver(&self) -> DeviceDriver;
    fn priority(&self) -> BackendPriority;

    /// Probe and initialize the backend.
    ///
    /// [`BackendError::NotAvailable`] means the backend is silently
    /// skipped; any other error aborts daemon initialization. On
    /// success the backend spawns its monitor tasks, tied to
    /// `shutdown`.
    async fn init(
        &self,
        store: Arc<PersistStore>,
        shutdown: CancellationToken,
    ) -> Result<(), BackendError>;

    /// Take the backend event channel. Can be taken once.
    fn listen(&self) -> Result<mpsc::Receiver<BackendEvent>, BackendError>;

    /// Query the backend for a fresh snapshot of observable devices.
    async fn fetch_devices(&self) -> Result<Vec<Device>, BackendError>;

    /// Create or re-create a stream device. Idempotent.
    async fn reset_stream_device(&self, device: &mut Device) -> Result<(), BackendError>;
    /// Tear down a stream device. Best-effort.
    async fn destroy_stream_device(&self, device: &mut Device) -> Result<(), BackendError>;

    /// Apply the device's enabled/disabled status.
    async fn apply_enabled(&self, device: &mut Device) -> Result<(), BackendError>;
    /// Apply the device's mute flag.
    async fn apply_muted(&self, device: &Device) -> Result<(), BackendError>;
    /// Apply the device's address list.
    async fn apply_address(&self, device: &mut Device) -> Result<(), BackendError>;
}

/// Bounded backend event channel with the coalescing send policy.
pub(crate) struct EventChannel {
    tx: mpsc::Sender<BackendEvent>,
    rx: parking_lot::Mutex<Option<mpsc::Receiver<BackendEvent>>>,
}

impl EventChannel {
    pub(crate) fn new() -> Self {
        // Deliberately small: ListUpdated coalesces, the rest block.
        let (tx, rx) = mpsc::channel(2);
        Self {
            tx,
            rx: parking_lot::Mutex::new(Some(rx)),
        }
    }

    pub(crate) fn take(&self) -> Result<mpsc::Receiver<BackendEvent>, BackendError> {
        self.rx.lock().take().ok_or(BackendError::AlreadyListening)
    }

    pub(crate) fn sender(&self) -> EventSender {
        EventSender {
            tx: self.tx.clone(),
        }
    }
}

#[derive(Clone)]
pub(crate) struct EventSender {
    tx: mpsc::Sender<BackendEvent>,
}

impl EventSender {
    /// Forward an event to the device manager.
    ///
    /// `ListUpdated` is dropped when the channel is full: the manager
    /// is guaranteed to re-read the list soon, so subsequent updates
    /// are squashed into one. Other events must not be lost, so the
    /// send blocks.
    pub(crate) async fn send(&self, event: BackendEvent) {
        match event {
            BackendEvent::ListUpdated => {
                let _ = self.tx.try_send(event);
            }
            _ => {
                let _ = self.tx.send(event).await;
            }
        }
    }
}

/// All backends compiled into this build, unordered.
fn registered_backends() -> Vec<Arc<dyn Backend>> {
    vec![
        Arc::new(PipewireBackend::new()),
        Arc::new(PulseaudioBackend::new()),
    ]
}

/// Select and initialize the backend for this host.
pub async fn open_backend(
    store: Arc<PersistStore>,
    shutdown: CancellationToken,
) -> Result<Arc<dyn Backend>, BackendError> {
    open_backend_from(registered_backends(), store, shutdown).await
}

/// Probe `backends` in (descending priority, ascending driver) order
/// and return the first that is available.
pub async fn open_backend_from(
    mut backends: Vec<Arc<dyn Backend>>,
    store: Arc<PersistStore>,
    shutdown: CancellationToken,
) -> Result<Arc<dyn Backend>, BackendError> {
    backends.sort_by_key(|b| (std::cmp::Reverse(b.priority()), b.driver()));

    for backend in backends {
        match backend.init(Arc::clone(&store), shutdown.clone()).await {
            Ok(()) => {
                debug!(driver = %backend.driver(), "using backend");
                return Ok(backend);
            }
            Err(BackendError::NotAvailable) => continue,
            Err(err) => return Err(err),
        }
    }

    Err(BackendError::NoBackend)
}
