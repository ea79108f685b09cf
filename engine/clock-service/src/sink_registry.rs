//! Fan-out of one clock's events to many listeners.

use std::sync::Arc;

use clock_core::{EventSink, Timestamp};
use parking_lot::RwLock;

struct SinkList {
    sinks: Vec<Arc<dyn EventSink>>,
    /// Notified after all other sinks. Remote relays go here so that remote
    /// peers only observe a time change once every local listener has reacted.
    relay: Option<Arc<dyn EventSink>>,
}

/// Ordered event-sink fan-out with an always-last relay slot.
///
/// Registration is idempotent: registering the same sink twice delivers each
/// event once. Callbacks run outside the registry lock on the thread that
/// raised the event.
#[derive(Default)]
pub struct EventSinkRegistry {
    inner: RwLock<SinkList>,
}

impl Default for SinkList {
    fn default() -> Self {
        Self { sinks: Vec::new(), relay: None }
    }
}

impl EventSinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_sink(&self, sink: Arc<dyn EventSink>) {
        let mut inner = self.inner.write();
        if inner.sinks.iter().any(|existing| Arc::ptr_eq(existing, &sink)) {
            return;
        }
        inner.sinks.push(sink);
    }

    pub fn unregister_sink(&self, sink: &Arc<dyn EventSink>) {
        let mut inner = self.inner.write();
        inner.sinks.retain(|existing| !Arc::ptr_eq(existing, sink));
    }

    /// Installs the pinned-last relay sink, replacing any previous one.
    pub fn set_relay_sink(&self, sink: Arc<dyn EventSink>) {
        self.inner.write().relay = Some(sink);
    }

    pub fn clear_relay_sink(&self) {
        self.inner.write().relay = None;
    }

    fn snapshot(&self) -> Vec<Arc<dyn EventSink>> {
        let inner = self.inner.read();
        let mut sinks = inner.sinks.clone();
        if let Some(relay) = &inner.relay {
            sinks.push(relay.clone());
        }
        sinks
    }
}

impl EventSink for EventSinkRegistry {
    fn time_update_begin(&self, old_time: Timestamp, new_time: Timestamp) {
        for sink in self.snapshot() {
            sink.time_update_begin(old_time, new_time);
        }
    }

    fn time_updating(&self, new_time: Timestamp) {
        for sink in self.snapshot() {
            sink.time_updating(new_time);
        }
    }

    fn time_update_end(&self, new_time: Timestamp) {
        for sink in self.snapshot() {
            sink.time_update_end(new_time);
        }
    }

    fn time_reset_begin(&self, old_time: Timestamp, new_time: Timestamp) {
        for sink in self.snapshot() {
            sink.time_reset_begin(old_time, new_time);
        }
    }

    fn time_reset_end(&self, new_time: Timestamp) {
        for sink in self.snapshot() {
            sink.time_reset_end(new_time);
        }
    }
}
