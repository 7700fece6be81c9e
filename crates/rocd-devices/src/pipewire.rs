//! PipeWire backend.
//!
//! Drives PipeWire entirely through its command line tools: `pw-dump`
//! for device snapshots, `pw-mon` for change events, `pw-cli` for node
//! creation and teardown, and `pactl` for mute (mute is not reachable
//! through `pw-cli`).

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use once_cell::sync::OnceCell;
use regex::Regex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use rocd_models::{Device, DeviceDriver, DeviceType};
use rocd_store::PersistStore;

use crate::backend::{
    Backend, BackendEvent, BackendPriority, EventChannel, EventSender,
    BACKEND_RECONNECT_INTERVAL, BACKEND_RESPONSE_TIMEOUT,
};
use crate::command;
use crate::error::BackendError;
use crate::uid::make_device_uid;

const NODE_INTERFACE: &str = "PipeWire:Interface:Node";

/// Handle to one running `pw-cli load-module` helper.
struct StreamDeviceHandle {
    generation: u64,
    stop: CancellationToken,
}

pub struct PipewireBackend {
    store: OnceCell<Arc<PersistStore>>,

    events: EventChannel,
    /// Wakes `wait_device` when the event thread or a helper watcher
    /// observed progress.
    wakeup: Arc<Notify>,

    /// Live helper subprocesses by device uid. Mutated by both the
    /// manager (under its lock) and the helper watcher tasks.
    stream_devices: Arc<Mutex<HashMap<String, StreamDeviceHandle>>>,
    generation: AtomicU64,
}

impl std::fmt::Debug for PipewireBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipewireBackend").finish_non_exhaustive()
    }
}

impl Default for PipewireBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl PipewireBackend {
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: OnceCell::new(),
            events: EventChannel::new(),
            wakeup: Arc::new(Notify::new()),
            stream_devices: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    fn store(&self) -> &PersistStore {
        self.store.get().map(Arc::as_ref).unwrap_or_else(|| {
            panic!("backend used before init");
        })
    }

    /// Spawn the `pw-cli load-module` helper that realizes the stream
    /// device, plus a watcher task that reaps it and keeps the live
    /// map in sync.
    fn create_device(
        &self,
        devices: &mut HashMap<String, StreamDeviceHandle>,
        dev: &Device,
    ) -> Result<(), BackendError> {
        debug!(uid = %dev.uid, "starting stream device");

        let module = match dev.device_type {
            Some(DeviceType::Sink) => "libpipewire-module-roc-sink",
            _ => "libpipewire-module-roc-source",
        };
        let args = pw_module_args(dev)?;

        let line = format!("pw-cli -m load-module {module} {args}");
        debug!(command = %line, "running command");

        let mut child = Command::new("pw-cli")
            .args(["-m", "load-module", module, &args])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| BackendError::CommandFailed {
                command: line.clone(),
                reason: format!("failed to start stream device: {err}"),
            })?;

        let Some(stderr) = child.stderr.take() else {
            return Err(BackendError::CommandFailed {
                command: line,
                reason: "no stderr pipe".into(),
            });
        };

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let stop = CancellationToken::new();

        debug!(uid = %dev.uid, "adding stream device to map");
        devices.insert(
            dev.uid.clone(),
            StreamDeviceHandle {
                generation,
                stop: stop.clone(),
            },
        );

        let uid = dev.uid.clone();
        let map = Arc::clone(&self.stream_devices);
        let wakeup = Arc::clone(&self.wakeup);

        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();

            loop {
                tokio::select! {
                    _ = stop.cancelled() => {
                        debug!(uid = %uid, "stopping stream device");
                        break;
                    }
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            if line.contains("Error:") {
                                debug!(uid = %uid, "stream device reported error");
                                break;
                            }
                        }
                        Ok(None) => {
                            debug!(uid = %uid, "stream device exited");
                            break;
                        }
                        Err(err) => {
                            debug!(uid = %uid, error = %err, "stream device exited");
                            break;
                        }
                    }
                }
            }

            // Reap the helper whichever way the loop ended.
            let _ = child.start_kill();
            let _ = child.wait().await;

            let mut devices = map.lock().await;
            let ours = devices
                .get(&uid)
                .map(|handle| handle.generation == generation)
                .unwrap_or(false);
            if ours {
                debug!(uid = %uid, "asynchronously removing stream device from map");
                devices.remove(&uid);
            }
            drop(devices);

            wakeup.notify_one();
        });

        Ok(())
    }

    /// Destroy the node and stop the helper subprocess, if any.
    async fn remove_device(
        &self,
        devices: &mut HashMap<String, StreamDeviceHandle>,
        dev: &mut Device,
    ) {
        if !dev.node_id.is_empty() {
            if let Err(err) = command::run("pw-cli", &["destroy", &dev.node_id]).await {
                debug!(node_id = %dev.node_id, error = %err, "can't destroy pipewire node");
            }
        }

        if let Some(handle) = devices.remove(&dev.uid) {
            debug!(uid = %dev.uid, "removing stream device from map");
            handle.stop.cancel();
        } else {
            debug!("device already removed from map");
        }

        dev.node_id.clear();
    }

    /// Block until a fresh fetch reports the device, or the helper
    /// died, or the response timeout expired.
    async fn wait_device(&self, dev: &mut Device) -> Result<(), BackendError> {
        let deadline = tokio::time::Instant::now() + BACKEND_RESPONSE_TIMEOUT;

        loop {
            if tokio::time::timeout_at(deadline, self.wakeup.notified())
                .await
                .is_err()
            {
                let mut devices = self.stream_devices.lock().await;
                self.remove_device(&mut devices, dev).await;
                return Err(BackendError::WaitTimeout);
            }

            // Device appeared?
            if let Ok(list) = self.fetch_devices().await {
                if list.iter().any(|d| d.uid == dev.uid) {
                    return Ok(());
                }
            }

            // Helper died?
            if !self.stream_devices.lock().await.contains_key(&dev.uid) {
                return Err(BackendError::CreateFailed);
            }
        }
    }
}

#[async_trait]
impl Backend for PipewireBackend {
    fn driver(&self) -> DeviceDriver {
        DeviceDriver::Pipewire
    }

    fn priority(&self) -> BackendPriority {
        BackendPriority::High
    }

    async fn init(
        &self,
        store: Arc<PersistStore>,
        shutdown: CancellationToken,
    ) -> Result<(), BackendError> {
        if command::run("pw-cli", &["info", "all"]).await.is_err() {
            return Err(BackendError::NotAvailable);
        }

        let _ = self.store.set(Arc::clone(&store));

        tokio::spawn(monitor_events(
            self.events.sender(),
            Arc::clone(&self.wakeup),
            store,
            shutdown,
        ));

        Ok(())
    }

    fn listen(&self) -> Result<mpsc::Receiver<BackendEvent>, BackendError> {
        self.events.take()
    }

    async fn fetch_devices(&self) -> Result<Vec<Device>, BackendError> {
        let out = command::output("pw-dump", &[]).await?;

        let dump: Value =
            serde_json::from_slice(&out).map_err(|err| BackendError::BadOutput {
                command: "pw-dump".into(),
                reason: err.to_string(),
            })?;

        let mut devices = Vec::new();

        for node in dump.as_array().map(|a| a.as_slice()).unwrap_or_default() {
            let Some(mut dev) = pw_build_device(node) else {
                continue;
            };

            if dev.is_stream {
                match self.store().load_stream_device(&dev.uid) {
                    Some(saved) => {
                        // Addresses can't be retrieved from PipeWire,
                        // so they are restored from storage.
                        match dev.device_type {
                            Some(DeviceType::Sink) => dev.to_address = saved.to_address.clone(),
                            Some(DeviceType::Source) => {
                                dev.from_address = saved.from_address.clone();
                            }
                            None => {}
                        }
                    }
                    None => {
                        // A roc device not managed by this daemon (e.g.
                        // declared in pipewire config by hand); don't
                        // present it as ours.
                        dev.is_stream = false;
                    }
                }
            }

            devices.push(dev);
        }

        Ok(devices)
    }

    async fn reset_stream_device(&self, device: &mut Device) -> Result<(), BackendError> {
        if !device.enabled() {
            return Ok(());
        }

        {
            let mut devices = self.stream_devices.lock().await;
            self.remove_device(&mut devices, device).await;
            self.create_device(&mut devices, device)?;
        }

        self.wait_device(device).await
    }

    async fn destroy_stream_device(&self, device: &mut Device) -> Result<(), BackendError> {
        let mut devices = self.stream_devices.lock().await;
        self.remove_device(&mut devices, device).await;
        Ok(())
    }

    async fn apply_enabled(&self, device: &mut Device) -> Result<(), BackendError> {
        // PipeWire does not keep disabled devices around; disabling
        // means removing the node, enabling means re-creating it.
        if device.enabled() {
            self.reset_stream_device(device).await
        } else {
            self.destroy_stream_device(device).await?;
            device.node_id.clear();
            Ok(())
        }
    }

    async fn apply_muted(&self, device: &Device) -> Result<(), BackendError> {
        if !device.enabled() {
            return Ok(());
        }

        let subcmd = match device.device_type {
            Some(DeviceType::Sink) => "set-sink-mute",
            _ => "set-source-mute",
        };
        let value = if device.muted() { "1" } else { "0" };

        command::run("pactl", &[subcmd, &device.system_name, value])
            .await
            .map_err(|err| BackendError::CommandFailed {
                command: format!("pactl {subcmd} {} {value}", device.system_name),
                reason: format!("failed to change device mute state: {err}"),
            })
    }

    async fn apply_address(&self, device: &mut Device) -> Result<(), BackendError> {
        if !device.enabled() {
            return Ok(());
        }

        // Node settings can't be changed on the fly; re-create the
        // device with the new address instead.
        self.reset_stream_device(device).await
    }
}

/// Render the `pw-cli load-module` argument block for a stream device.
fn pw_module_args(dev: &Device) -> Result<String, BackendError> {
    use std::fmt::Write as _;

    let (addresses, kind, section) = match dev.device_type {
        Some(DeviceType::Sink) => (&dev.to_address, "remote", "sink"),
        _ => (&dev.from_address, "local", "source"),
    };

    let count = addresses.as_ref().map(|l| l.len()).unwrap_or(0);
    if count != 1 {
        let field = if kind == "remote" { "to_address" } else { "from_address" };
        return Err(BackendError::InvalidDevice(
            rocd_models::ValidationError::invalid_field(format!(
                "pipewire stream device requires exactly one element in {field:?}"
            )),
        ));
    }

    let addr = addresses
        .as_ref()
        .and_then(|l| l.first())
        .ok_or(BackendError::CreateFailed)?;

    if addr.audio_source.is_empty() {
        return Err(BackendError::InvalidDevice(
            rocd_models::ValidationError::invalid_field(
                "pipewire stream device requires 'audio_source' to be present",
            ),
        ));
    }

    let source_ip = addr.audio_source.ip();
    let repair_mismatch = addr
        .audio_repair
        .as_ref()
        .map(|u| u.ip() != source_ip)
        .unwrap_or(false);
    let control_mismatch = addr
        .audio_control
        .as_ref()
        .map(|u| u.ip() != source_ip)
        .unwrap_or(false);
    if repair_mismatch || control_mismatch {
        return Err(BackendError::InvalidDevice(
            rocd_models::ValidationError::invalid_field(
                "pipewire stream device requires 'audio_source', 'audio_repair', \
                 and 'audio_control' uris to use the same hostname",
            ),
        ));
    }

    let fec_code = addr
        .audio_source
        .fec()
        .map(|f| f.as_str())
        .unwrap_or("disable");

    let mut args = String::new();
    let _ = writeln!(args, "{{");
    let _ = writeln!(args, "  {section}.name = {:?}", dev.display_name);
    let _ = writeln!(args, "  {section}.props = {{");
    let _ = writeln!(args, "    node.name = {:?}", dev.system_name);
    let _ = writeln!(args, "    node.description = {:?}", dev.display_name);
    let _ = writeln!(args, "  }}");
    let _ = writeln!(args, "  {kind}.ip = {}", source_ip);
    let _ = writeln!(args, "  {kind}.source.port = {}", addr.audio_source.port());
    if let Some(repair) = &addr.audio_repair {
        let _ = writeln!(args, "  {kind}.repair.port = {}", repair.port());
    }
    if let Some(control) = &addr.audio_control {
        let _ = writeln!(args, "  {kind}.control.port = {}", control.port());
    }
    let _ = writeln!(args, "  fec.code = {fec_code}");
    args.push('}');

    Ok(args)
}

/// Build a device record from one `pw-dump` array element.
fn pw_build_device(json: &Value) -> Option<Device> {
    if json.get("type").and_then(Value::as_str) != Some(NODE_INTERFACE) {
        return None;
    }

    let node_id = match json.get("id") {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        _ => return None,
    };

    let props = json.pointer("/info/props")?;

    let system_name = props.get("node.name")?.as_str()?.to_string();
    let display_name = props.get("node.description")?.as_str()?.to_string();

    let device_type = match props.get("media.class").and_then(Value::as_str) {
        Some("Audio/Sink") => DeviceType::Sink,
        Some("Audio/Source") => DeviceType::Source,
        _ => return None,
    };

    let mut dev = Device {
        uid: make_device_uid(&system_name),
        system_name,
        display_name,
        device_type: Some(device_type),
        driver: Some(DeviceDriver::Pipewire),
        node_id,
        ..Device::default()
    };

    let is_virtual = props
        .get("node.virtual")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    dev.is_hardware = !is_virtual;

    let media_name = props.get("media.name").and_then(Value::as_str).unwrap_or("");
    dev.is_stream = media_name.contains("roc-sink") || media_name.contains("roc-source");

    if let Some(props_params) = json.pointer("/info/params/Props").and_then(Value::as_array) {
        for param in props_params {
            if let Some(mute) = param.get("mute").and_then(Value::as_bool) {
                dev.set_muted(mute);
            }
        }
    }

    Some(dev)
}

static PW_EVENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([a-z]+):$").unwrap());
static PW_NODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s+id:\s*(\d+)$").unwrap());
static PW_TYPE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s+type:\s*([a-zA-Z:]+).*$").unwrap());

/// Own the `pw-mon` subprocess: parse its output into backend events
/// and respawn it whenever it exits.
async fn monitor_events(
    events: EventSender,
    wakeup: Arc<Notify>,
    store: Arc<PersistStore>,
    shutdown: CancellationToken,
) {
    let mut first_connect = true;

    loop {
        if shutdown.is_cancelled() {
            return;
        }

        let spawned = Command::new("pw-mon")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn();

        match spawned {
            Ok(mut child) => {
                if let Some(stdout) = child.stdout.take() {
                    scan_events(stdout, &events, &wakeup, &store, &shutdown).await;
                }
                let _ = child.start_kill();
                let _ = child.wait().await;
                if shutdown.is_cancelled() {
                    return;
                }
            }
            Err(err) => {
                if first_connect {
                    first_connect = false;
                    debug!(error = %err, "can't establish connection to pipewire");
                }
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = tokio::time::sleep(BACKEND_RECONNECT_INTERVAL) => {}
                }
            }
        }
    }
}

/// Parse `pw-mon` output until the subprocess closes its stdout.
///
/// The stream is a human-readable event log; each event is an action
/// line (`added:` / `changed:` / `removed:`) followed by indented
/// object fields, of which only the id and the interface type matter.
async fn scan_events(
    stdout: tokio::process::ChildStdout,
    events: &EventSender,
    wakeup: &Notify,
    store: &PersistStore,
    shutdown: &CancellationToken,
) {
    let mut node_types: HashMap<String, String> = HashMap::new();

    let mut last_event = String::new();
    let mut last_node = String::new();
    let mut last_type = String::new();

    let mut lines = BufReader::new(stdout).lines();
    let mut n_lines = 0u64;

    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => return,
            line = lines.next_line() => match line {
                Ok(Some(line)) => line,
                Ok(None) | Err(_) => break,
            }
        };
        n_lines += 1;

        if n_lines == 1 {
            // First line after a successful spawn means the connection
            // is up; trigger full reconciliation.
            debug!("established connection to pipewire");
            events.send(BackendEvent::ListWiped).await;
            wakeup.notify_one();
        }

        if let Some(m) = PW_EVENT_RE.captures(&line) {
            last_event = m[1].to_string();
            continue;
        }

        if last_event.is_empty() {
            continue;
        }

        if let Some(m) = PW_NODE_RE.captures(&line) {
            last_node = m[1].to_string();
        } else if let Some(m) = PW_TYPE_RE.captures(&line) {
            last_type = m[1].to_string();
        }

        // Node added or changed: remember the id-to-type mapping; if
        // it's a device node, report an update.
        if (last_event == "added" || last_event == "changed")
            && !last_node.is_empty()
            && !last_type.is_empty()
        {
            if last_type == NODE_INTERFACE {
                debug!(event = %last_event, node = %last_node, "pipewire node event");
                events.send(BackendEvent::ListUpdated).await;
                wakeup.notify_one();
            }
            node_types.insert(last_node.clone(), last_type.clone());
            last_event.clear();
            last_node.clear();
            last_type.clear();
            continue;
        }

        // Node removed: a removal of one of our stream devices means
        // the user killed it; anything else is a list update.
        if last_event == "removed" && !last_node.is_empty() {
            if node_types.get(&last_node).map(String::as_str) == Some(NODE_INTERFACE) {
                debug!(node = %last_node, "pipewire node removed");

                let removed_uid = store
                    .load_stream_devices()
                    .iter()
                    .find(|dev| dev.node_id == last_node)
                    .map(|dev| dev.uid.clone());

                match removed_uid {
                    Some(device_uid) => {
                        events.send(BackendEvent::Removed { device_uid }).await;
                    }
                    None => {
                        events.send(BackendEvent::ListUpdated).await;
                    }
                }
                wakeup.notify_one();
            }
            node_types.remove(&last_node);
            last_event.clear();
            last_node.clear();
            last_type.clear();
        }
    }

    if n_lines > 0 {
        debug!("lost connection to pipewire");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rocd_models::{Address, AddressList, Uri};

    fn sink_device(to: &[Address]) -> Device {
        let mut dev = Device {
            uid: "uid-1".into(),
            system_name: "rocd.stream_sink.1.1".into(),
            display_name: "Roc Sender".into(),
            device_type: Some(DeviceType::Sink),
            is_stream: true,
            to_address: Some(AddressList(to.to_vec())),
            ..Device::default()
        };
        dev.set_defaults();
        dev
    }

    fn address(source: &str, repair: Option<&str>) -> Address {
        Address {
            audio_source: Uri::new(source),
            audio_repair: repair.map(Uri::new),
            audio_control: None,
        }
    }

    #[test]
    fn module_args_render_ports_and_fec() {
        let dev = sink_device(&[address(
            "rtp+rs8m://192.168.0.101:10001",
            Some("rs8m://192.168.0.101:10002"),
        )]);

        let args = pw_module_args(&dev).unwrap();

        assert!(args.contains("node.name = \"rocd.stream_sink.1.1\""));
        assert!(args.contains("remote.ip = 192.168.0.101"));
        assert!(args.contains("remote.source.port = 10001"));
        assert!(args.contains("remote.repair.port = 10002"));
        assert!(args.contains("fec.code = rs8m"));
    }

    #[test]
    fn module_args_disable_fec_for_plain_rtp() {
        let dev = sink_device(&[address("rtp://192.168.0.101:10001", None)]);
        let args = pw_module_args(&dev).unwrap();
        assert!(args.contains("fec.code = disable"));
    }

    #[test]
    fn module_args_require_exactly_one_address() {
        let none = sink_device(&[]);
        assert!(matches!(
            pw_module_args(&none),
            Err(BackendError::InvalidDevice(_))
        ));

        let two = sink_device(&[
            address("rtp://192.168.0.101:10001", None),
            address("rtp://192.168.0.101:10002", None),
        ]);
        assert!(pw_module_args(&two).is_err());
    }

    #[test]
    fn module_args_require_same_host() {
        let dev = sink_device(&[address(
            "rtp+rs8m://192.168.0.101:10001",
            Some("rs8m://192.168.0.102:10002"),
        )]);
        assert!(matches!(
            pw_module_args(&dev),
            Err(BackendError::InvalidDevice(_))
        ));
    }

    #[test]
    fn build_device_from_dump() {
        crate::uid::pin_machine_id("test-machine");

        let json: Value = serde_json::from_str(
            r#"{
                "id": 57,
                "type": "PipeWire:Interface:Node",
                "info": {
                    "props": {
                        "node.name": "rocd.stream_sink.1.1",
                        "node.description": "Roc Sender",
                        "media.class": "Audio/Sink",
                        "media.name": "roc-sink",
                        "node.virtual": true
                    },
                    "params": {
                        "Props": [ { "mute": true } ]
                    }
                }
            }"#,
        )
        .unwrap();

        let dev = pw_build_device(&json).unwrap();
        assert_eq!(dev.system_name, "rocd.stream_sink.1.1");
        assert_eq!(dev.display_name, "Roc Sender");
        assert_eq!(dev.device_type, Some(DeviceType::Sink));
        assert_eq!(dev.driver, Some(DeviceDriver::Pipewire));
        assert_eq!(dev.node_id, "57");
        assert!(dev.is_stream);
        assert!(!dev.is_hardware);
        assert!(dev.muted());
        assert_eq!(dev.uid, make_device_uid("rocd.stream_sink.1.1"));
    }

    #[test]
    fn build_device_skips_non_audio_nodes() {
        let json: Value = serde_json::from_str(
            r#"{
                "id": 12,
                "type": "PipeWire:Interface:Node",
                "info": {
                    "props": {
                        "node.name": "midi-bridge",
                        "node.description": "Midi",
                        "media.class": "Midi/Bridge"
                    }
                }
            }"#,
        )
        .unwrap();
        assert!(pw_build_device(&json).is_none());

        let json: Value =
            serde_json::from_str(r#"{"id": 3, "type": "PipeWire:Interface:Port"}"#).unwrap();
        assert!(pw_build_device(&json).is_none());
    }

    #[test]
    fn hardware_flag_follows_virtual_prop() {
        crate::uid::pin_machine_id("test-machine");

        let json: Value = serde_json::from_str(
            r#"{
                "id": 40,
                "type": "PipeWire:Interface:Node",
                "info": {
                    "props": {
                        "node.name": "alsa_output.pci-0000",
                        "node.description": "Built-in Audio",
                        "media.class": "Audio/Sink"
                    }
                }
            }"#,
        )
        .unwrap();

        let dev = pw_build_device(&json).unwrap();
        assert!(dev.is_hardware);
        assert!(!dev.is_stream);
    }

    #[test]
    fn monitor_regexes_match_pw_mon_output() {
        assert_eq!(&PW_EVENT_RE.captures("added:").unwrap()[1], "added");
        assert_eq!(&PW_EVENT_RE.captures("removed:").unwrap()[1], "removed");
        assert!(PW_EVENT_RE.captures("  id: 5").is_none());

        assert_eq!(&PW_NODE_RE.captures("\tid: 57").unwrap()[1], "57");
        assert_eq!(
            &PW_TYPE_RE.captures("\ttype: PipeWire:Interface:Node (version 3)").unwrap()[1],
            "PipeWire:Interface:Node"
        );
    }
}
