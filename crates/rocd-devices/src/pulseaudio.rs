//! PulseAudio backend.
//!
//! Drives PulseAudio through `pactl`: `list sinks|sources` for device
//! snapshots (JSON on recent versions, re-parsed text on older ones),
//! `subscribe` for change events, and `load-module`/`unload-module`
//! for stream device lifetime.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;
use serde_json::{json, Map, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use rocd_models::{Device, DeviceDriver, DeviceType};
use rocd_store::PersistStore;

use crate::backend::{
    Backend, BackendEvent, BackendPriority, EventChannel, EventSender,
    BACKEND_PING_INTERVAL, BACKEND_RECONNECT_INTERVAL,
};
use crate::command;
use crate::error::BackendError;
use crate::uid::make_device_uid;

#[derive(Clone, Copy, PartialEq)]
enum DeviceDir {
    Output,
    Input,
}

pub struct PulseaudioBackend {
    store: OnceCell<Arc<PersistStore>>,
    events: EventChannel,
}

impl std::fmt::Debug for PulseaudioBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PulseaudioBackend").finish_non_exhaustive()
    }
}

impl Default for PulseaudioBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl PulseaudioBackend {
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: OnceCell::new(),
            events: EventChannel::new(),
        }
    }

    fn store(&self) -> &PersistStore {
        self.store.get().map(Arc::as_ref).unwrap_or_else(|| {
            panic!("backend used before init");
        })
    }

    async fn build_device_list(&self, dir: DeviceDir) -> Result<Vec<Device>, BackendError> {
        let subcmd = match dir {
            DeviceDir::Output => "sinks",
            DeviceDir::Input => "sources",
        };

        let dump: Value = if pulse_supports_json().await {
            let out = command::output("pactl", &["-fjson", "list", subcmd]).await?;
            serde_json::from_slice(&out).map_err(|err| BackendError::BadOutput {
                command: format!("pactl -fjson list {subcmd}"),
                reason: err.to_string(),
            })?
        } else {
            // Compatibility with older pulseaudio versions. Less
            // reliable parsing.
            let out = command::output("pactl", &["list", subcmd]).await?;
            pulse_reparse_text(&String::from_utf8_lossy(&out))
        };

        let mut devices = Vec::new();
        for dev_json in dump.as_array().map(|a| a.as_slice()).unwrap_or_default() {
            if let Some(dev) = pulse_build_device(dir, dev_json) {
                devices.push(dev);
            }
        }

        Ok(devices)
    }
}

#[async_trait]
impl Backend for PulseaudioBackend {
    fn driver(&self) -> DeviceDriver {
        DeviceDriver::Pulseaudio
    }

    fn priority(&self) -> BackendPriority {
        BackendPriority::Medium
    }

    async fn init(
        &self,
        store: Arc<PersistStore>,
        shutdown: CancellationToken,
    ) -> Result<(), BackendError> {
        if command::run("pactl", &["info"]).await.is_err() {
            return Err(BackendError::NotAvailable);
        }

        let _ = self.store.set(Arc::clone(&store));

        tokio::spawn(monitor_events(self.events.sender(), store, shutdown));

        Ok(())
    }

    fn listen(&self) -> Result<mpsc::Receiver<BackendEvent>, BackendError> {
        self.events.take()
    }

    async fn fetch_devices(&self) -> Result<Vec<Device>, BackendError> {
        let mut all_devices = Vec::new();

        for dir in [DeviceDir::Output, DeviceDir::Input] {
            for mut dev in self.build_device_list(dir).await? {
                if dev.is_stream {
                    match self.store().load_stream_device(&dev.uid) {
                        Some(saved) => {
                            // Addresses can't be retrieved from
                            // PulseAudio; restore them from storage.
                            match dev.device_type {
                                Some(DeviceType::Sink) => {
                                    dev.to_address = saved.to_address.clone();
                                }
                                Some(DeviceType::Source) => {
                                    dev.from_address = saved.from_address.clone();
                                }
                                None => {}
                            }
                        }
                        None => {
                            // Not managed by this daemon; don't claim it.
                            dev.is_stream = false;
                        }
                    }
                }

                all_devices.push(dev);
            }
        }

        Ok(all_devices)
    }

    async fn reset_stream_device(&self, device: &mut Device) -> Result<(), BackendError> {
        if !device.enabled() {
            return Ok(());
        }

        if !device.module_id.is_empty() {
            let _ = self.destroy_stream_device(device).await;
        }

        let module = match device.device_type {
            Some(DeviceType::Sink) => "module-roc-sink",
            _ => "module-roc-source",
        };

        let args = pulse_module_args(device)?;

        let mut cmdline = vec!["load-module".to_string(), module.to_string()];
        cmdline.extend(args);
        let arg_refs: Vec<&str> = cmdline.iter().map(String::as_str).collect();

        command::run("pactl", &arg_refs)
            .await
            .map_err(|err| BackendError::CommandFailed {
                command: format!("pactl load-module {module}"),
                reason: format!("failed to load device module: {err}"),
            })
    }

    async fn destroy_stream_device(&self, device: &mut Device) -> Result<(), BackendError> {
        if device.module_id.is_empty() {
            return Err(BackendError::UnknownModule);
        }

        command::run("pactl", &["unload-module", &device.module_id])
            .await
            .map_err(|err| BackendError::CommandFailed {
                command: format!("pactl unload-module {}", device.module_id),
                reason: format!("failed to unload device module: {err}"),
            })?;

        device.module_id.clear();

        Ok(())
    }

    async fn apply_enabled(&self, device: &mut Device) -> Result<(), BackendError> {
        // PulseAudio does not keep disabled devices around; disabling
        // means unloading the module, enabling means re-loading it.
        if device.enabled() {
            self.reset_stream_device(device).await
        } else {
            self.destroy_stream_device(device).await
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

        // Module arguments can't be changed on the fly; re-load the
        // module with the new address instead.
        self.reset_stream_device(device).await
    }
}

static PULSE_EVENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^event\s+'(\w+)'\s+on\s+([a-z-]+)\s+#(\d+)$").unwrap());

/// Own the `pactl subscribe` subprocess: parse its output into backend
/// events and respawn it whenever it exits.
async fn monitor_events(events: EventSender, store: Arc<PersistStore>, shutdown: CancellationToken) {
    let mut first_connect = true;

    loop {
        if shutdown.is_cancelled() {
            return;
        }

        let spawned = Command::new("pactl")
            .arg("subscribe")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn();

        match spawned {
            Ok(mut child) => {
                if let Some(stdout) = child.stdout.take() {
                    scan_events(stdout, &events, &store, &shutdown).await;
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
                    debug!(error = %err, "can't establish connection to pulseaudio");
                }
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = tokio::time::sleep(BACKEND_RECONNECT_INTERVAL) => {}
                }
            }
        }
    }
}

async fn scan_events(
    stdout: tokio::process::ChildStdout,
    events: &EventSender,
    store: &PersistStore,
    shutdown: &CancellationToken,
) {
    // `pactl subscribe` prints nothing until something happens, so
    // generate traffic by pinging pulseaudio until the first event
    // arrives. The first event doubles as "connection established".
    let ping_stop = CancellationToken::new();
    {
        let ping_stop = ping_stop.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = ping_stop.cancelled() => return,
                    _ = tokio::time::sleep(BACKEND_PING_INTERVAL) => {
                        let _ = command::run("pactl", &["info"]).await;
                    }
                }
            }
        });
    }

    let mut lines = BufReader::new(stdout).lines();
    let mut n_events = 0u64;

    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => line.to_lowercase(),
                Ok(None) | Err(_) => break,
            }
        };

        if line.contains("connection failure") || line.contains("connection refused") {
            break;
        }

        let Some(event) = parse_event(store, &line) else {
            continue;
        };

        n_events += 1;
        if n_events == 1 {
            ping_stop.cancel();
            debug!("established connection to pulseaudio");
            events.send(BackendEvent::ListWiped).await;
        }

        if let Some(event) = event {
            events.send(event).await;
        }
    }

    ping_stop.cancel();

    if n_events > 0 {
        debug!("lost connection to pulseaudio");
    }
}

/// Parse one `pactl subscribe` line.
///
/// Outer `None` means the line is not an event at all; inner `None`
/// means an event on an object kind we don't care about.
fn parse_event(store: &PersistStore, line: &str) -> Option<Option<BackendEvent>> {
    let m = PULSE_EVENT_RE.captures(line)?;

    let (ev_type, obj_type, node_id) = (&m[1], &m[2], &m[3]);
    if obj_type != "source" && obj_type != "sink" {
        return Some(None);
    }

    debug!(event = ev_type, object = obj_type, node = node_id, "pulseaudio event");

    if ev_type == "remove" {
        let removed = store
            .load_stream_devices()
            .iter()
            .find(|dev| dev.node_id == node_id)
            .map(|dev| dev.uid.clone());
        if let Some(device_uid) = removed {
            return Some(Some(BackendEvent::Removed { device_uid }));
        }
    }

    Some(Some(BackendEvent::ListUpdated))
}

/// Render `pactl load-module` arguments for a stream device.
fn pulse_module_args(dev: &Device) -> Result<Vec<String>, BackendError> {
    let (addresses, kind) = match dev.device_type {
        Some(DeviceType::Sink) => (&dev.to_address, "remote"),
        _ => (&dev.from_address, "local"),
    };

    let count = addresses.as_ref().map(|l| l.len()).unwrap_or(0);
    if count != 1 {
        let field = if kind == "remote" { "to_address" } else { "from_address" };
        return Err(BackendError::InvalidDevice(
            rocd_models::ValidationError::invalid_field(format!(
                "pulseaudio stream device requires exactly one element in {field:?}"
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
                "pulseaudio stream device requires 'audio_source' to be present",
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
                "pulseaudio stream device requires 'audio_source', 'audio_repair', \
                 and 'audio_control' uris to use the same hostname",
            ),
        ));
    }

    let fec_code = addr
        .audio_source
        .fec()
        .map(|f| f.as_str())
        .unwrap_or("disable");

    let mut args = Vec::new();

    if dev.device_type == Some(DeviceType::Sink) {
        args.push(format!("sink_name={}", dev.system_name));
        args.push(format!(
            "sink_properties='device.description={:?}'",
            dev.display_name
        ));
    } else {
        args.push(format!("source_name={}", dev.system_name));
        args.push(format!(
            "source_properties='device.description={:?}'",
            dev.display_name
        ));
    }

    args.push(format!("{kind}_ip={source_ip}"));
    args.push(format!("{kind}_source_port={}", addr.audio_source.port()));
    if let Some(repair) = &addr.audio_repair {
        args.push(format!("{kind}_repair_port={}", repair.port()));
    }
    if let Some(control) = &addr.audio_control {
        args.push(format!("{kind}_control_port={}", control.port()));
    }

    args.push(format!("fec_encoding={fec_code}"));

    Ok(args)
}

/// Build a device record from one `pactl list` entry.
fn pulse_build_device(dir: DeviceDir, dev_json: &Value) -> Option<Device> {
    let system_name = dev_json.get("name")?.as_str()?.to_string();
    let display_name = dev_json.get("description")?.as_str()?.to_string();

    // Monitor sources mirror sinks; not real devices.
    if dev_json.pointer("/properties/device.class").and_then(Value::as_str) == Some("monitor") {
        return None;
    }

    let device_type = match dir {
        DeviceDir::Output => DeviceType::Sink,
        DeviceDir::Input => DeviceType::Source,
    };

    let mut dev = Device {
        uid: make_device_uid(&system_name),
        system_name,
        display_name,
        device_type: Some(device_type),
        driver: Some(DeviceDriver::Pulseaudio),
        ..Device::default()
    };

    if let Some(index) = dev_json.get("index").and_then(value_to_string) {
        dev.node_id = index;
    }
    if let Some(module) = dev_json.get("owner_module").and_then(value_to_string) {
        dev.module_id = module;
    }

    if let Some(flags) = dev_json.get("flags").and_then(Value::as_array) {
        if flags.iter().any(|f| f.as_str() == Some("HARDWARE")) {
            dev.is_hardware = true;
        }
    }

    if let Some(driver) = dev_json.get("driver").and_then(Value::as_str) {
        if matches!(driver, "roc_sender" | "roc_receiver" | "roc-sink" | "roc-source") {
            dev.is_stream = true;
        }
    }

    if let Some(mute) = dev_json.get("mute").and_then(Value::as_bool) {
        dev.set_muted(mute);
    }

    Some(dev)
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

async fn pulse_supports_json() -> bool {
    let Ok(out) = command::output("pactl", &["--help"]).await else {
        return false;
    };
    let help = String::from_utf8_lossy(&out);
    help.contains("--format") && help.contains("json")
}

static PULSE_BEGIN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\w+\s+#(\d+)$").unwrap());
static PULSE_FIELD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s+([A-Z][A-Za-z0-9 ]+):\s*(.*)$").unwrap());
static PULSE_PROP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^\s+([A-Za-z0-9_.]+)\s*=\s*"(.*)"\s*$"#).unwrap());

/// Re-parse the legacy line-oriented `pactl list` output into the same
/// shape as the JSON format, limited to the fields the driver reads.
fn pulse_reparse_text(text: &str) -> Value {
    let mut devices: Vec<Value> = Vec::new();
    let mut dev: Option<Map<String, Value>> = None;
    let mut last_field = String::new();

    for line in text.lines() {
        // Device begin.
        if let Some(m) = PULSE_BEGIN_RE.captures(line) {
            if let Some(done) = dev.take() {
                devices.push(Value::Object(done));
            }
            let mut rec = Map::new();
            rec.insert("index".into(), json!(m[1].to_string()));
            dev = Some(rec);
            continue;
        }

        // Device field.
        if let Some(m) = PULSE_FIELD_RE.captures(line) {
            let key = m[1].to_lowercase().replace(' ', "_");
            let value = m[2].to_string();
            last_field = key.clone();

            if let Some(rec) = dev.as_mut() {
                match key.as_str() {
                    // Nested blocks; their lines follow.
                    "properties" | "formats" => {}
                    "flags" => {
                        let flags: Vec<Value> =
                            value.split_whitespace().map(|f| json!(f)).collect();
                        rec.insert(key, Value::Array(flags));
                    }
                    "mute" => {
                        let muted = value.eq_ignore_ascii_case("on")
                            || value.eq_ignore_ascii_case("yes");
                        rec.insert(key, json!(muted));
                    }
                    _ => {
                        rec.insert(key, json!(value));
                    }
                }
            }
            continue;
        }

        // Device property.
        if last_field == "properties" {
            if let (Some(rec), Some(m)) = (dev.as_mut(), PULSE_PROP_RE.captures(line)) {
                let props = rec
                    .entry("properties")
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Some(props) = props.as_object_mut() {
                    props.insert(m[1].to_string(), json!(m[2].to_string()));
                }
                continue;
            }
        }

        // Device end.
        if line.trim().is_empty() {
            if let Some(done) = dev.take() {
                devices.push(Value::Object(done));
            }
        }
    }

    if let Some(done) = dev.take() {
        devices.push(Value::Object(done));
    }

    Value::Array(devices)
}
