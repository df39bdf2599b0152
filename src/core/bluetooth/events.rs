//! Events delivered to the presentation layer
//! The GUI (or the CLI printer) drains these from a single unbounded queue,
//! so emitting never blocks a notification path.

use log::debug;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::core::bluetooth::types::SessionState;
use crate::core::codec::Value;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DeviceEvent {
    ValueChanged { subsystem: String, value: Value },
    StatusChanged { state: SessionState },
    Stale { stale: bool },
    SubsystemAvailability { subsystem: String, available: bool },
    Cleared { subsystem: String },
}

/// Sending half of the event queue.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<DeviceEvent>,
}

impl EventSink {
    /// Creates a sink together with the receiver the presentation layer drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DeviceEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn on_value_changed(&self, subsystem: &str, value: Value) {
        self.emit(DeviceEvent::ValueChanged {
            subsystem: subsystem.to_string(),
            value,
        });
    }

    pub fn on_status_changed(&self, state: SessionState) {
        self.emit(DeviceEvent::StatusChanged { state });
    }

    pub fn on_stale(&self, stale: bool) {
        self.emit(DeviceEvent::Stale { stale });
    }

    pub fn on_availability(&self, subsystem: &str, available: bool) {
        self.emit(DeviceEvent::SubsystemAvailability {
            subsystem: subsystem.to_string(),
            available,
        });
    }

    pub fn on_cleared(&self, subsystem: &str) {
        self.emit(DeviceEvent::Cleared {
            subsystem: subsystem.to_string(),
        });
    }

    fn emit(&self, event: DeviceEvent) {
        // A dropped receiver just means nobody is listening anymore.
        if self.tx.send(event).is_err() {
            debug!("Event receiver dropped, discarding event");
        }
    }
}
