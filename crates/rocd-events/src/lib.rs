//! rocd event dispatcher - immutable-snapshot broadcast with diffing.
//!
//! The dispatcher holds a single immutable state snapshot. Publishers
//! swap the snapshot; each subscriber task diffs the new snapshot
//! against the last one it reported and emits per-entity change
//! events. Rapid successive mutations may collapse into one set of
//! deltas; subscribers are guaranteed eventual consistency with the
//! latest snapshot, not one event per transition.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use rocd_models::{Device, Event, EventType, Stream};

/// Minimum interval between reports to one subscriber.
const EVENT_INTERVAL: Duration = Duration::from_millis(10);

/// Bound of each subscriber's outbound queue.
const EVENT_QUEUE_SIZE: usize = 500;

/// One immutable snapshot of the published state.
///
/// Whenever the state changes, a new snapshot is allocated and the
/// channel pointer is swapped, so checking for change is a pointer
/// comparison and readers never need a lock.
#[derive(Debug, Default)]
pub struct StateSnapshot {
    pub devices: HashMap<String, Arc<Device>>,
    pub streams: HashMap<String, Arc<Stream>>,
}

pub struct EventDispatcher {
    state_tx: watch::Sender<Arc<StateSnapshot>>,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDispatcher {
    #[must_use]
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(Arc::new(StateSnapshot::default()));
        Self { state_tx }
    }

    /// Replace the device part of the snapshot. No-op when the new map
    /// is value-equal to the current one.
    pub fn update_devices(&self, devices: &HashMap<String, Arc<Device>>) {
        self.state_tx.send_if_modified(|state| {
            if state.devices == *devices {
                return false;
            }
            debug!("updating device list");
            *state = Arc::new(StateSnapshot {
                devices: devices.clone(),
                streams: state.streams.clone(),
            });
            true
        });
    }

    /// Replace the stream part of the snapshot. No-op when the new map
    /// is value-equal to the current one.
    pub fn update_streams(&self, streams: &HashMap<String, Arc<Stream>>) {
        self.state_tx.send_if_modified(|state| {
            if state.streams == *streams {
                return false;
            }
            debug!("updating stream list");
            *state = Arc::new(StateSnapshot {
                devices: state.devices.clone(),
                streams: streams.clone(),
            });
            true
        });
    }

    /// The currently published snapshot.
    #[must_use]
    pub fn current(&self) -> Arc<StateSnapshot> {
        Arc::clone(&self.state_tx.borrow())
    }

    /// Open a new subscription with its own diffing task.
    #[must_use]
    pub fn subscribe(&self) -> EventListener {
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_SIZE);
        let stop = CancellationToken::new();

        tokio::spawn(listener_loop(
            self.state_tx.subscribe(),
            event_tx,
            stop.clone(),
        ));

        EventListener {
            events: event_rx,
            stop,
        }
    }
}

/// Handle to one subscription.
///
/// Dropping the listener stops its task.
pub struct EventListener {
    events: mpsc::Receiver<Event>,
    stop: CancellationToken,
}

impl EventListener {
    /// Receive the next change event. Returns `None` after [`stop`]
    /// has taken effect.
    ///
    /// [`stop`]: EventListener::stop
    pub async fn recv(&mut self) -> Option<Event> {
        self.events.recv().await
    }

    /// Stop the subscription. Idempotent.
    pub fn stop(&self) {
        self.stop.cancel();
    }
}

impl Drop for EventListener {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

async fn listener_loop(
    mut state_rx: watch::Receiver<Arc<StateSnapshot>>,
    event_tx: mpsc::Sender<Event>,
    stop: CancellationToken,
) {
    debug!("opened event listener");

    let mut ticker = tokio::time::interval(EVENT_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut last: Arc<StateSnapshot> = Arc::new(StateSnapshot::default());

    loop {
        // Rate-limit reports.
        ticker.tick().await;

        // Sleep until the snapshot pointer moves past the one we
        // reported last.
        let curr = tokio::select! {
            _ = stop.cancelled() => break,
            changed = state_rx.wait_for(|state| !Arc::ptr_eq(state, &last)) => {
                match changed {
                    Ok(state) => Arc::clone(&state),
                    // Dispatcher is gone.
                    Err(_) => break,
                }
            }
        };

        if !report(&last, &curr, &event_tx, &stop).await {
            break;
        }

        last = curr;
    }

    debug!("closed event listener");
}

/// Diff two snapshots and enqueue the resulting events.
/// Returns `false` when the subscriber is stopping.
async fn report(
    last: &StateSnapshot,
    curr: &StateSnapshot,
    event_tx: &mpsc::Sender<Event>,
    stop: &CancellationToken,
) -> bool {
    let mut events = Vec::new();

    for uid in last.devices.keys() {
        if !curr.devices.contains_key(uid) {
            events.push(Event::new(EventType::DeviceRemoved, uid.clone()));
        }
    }

    for uid in curr.devices.keys() {
        if !last.devices.contains_key(uid) {
            events.push(Event::new(EventType::DeviceAdded, uid.clone()));
        }
    }

    for (uid, curr_dev) in &curr.devices {
        if let Some(last_dev) = last.devices.get(uid) {
            if last_dev != curr_dev {
                events.push(Event::new(EventType::DeviceUpdated, uid.clone()));
            }
        }
    }

    if !events.is_empty() {
        debug!(count = events.len(), "sending events to listener");
    }

    for event in events {
        tokio::select! {
            // Don't block on a full queue if the listener was stopped;
            // nobody may be reading anymore.
            _ = stop.cancelled() => return false,
            sent = event_tx.send(event) => {
                if sent.is_err() {
                    return false;
                }
            }
        }
    }

    true
}
