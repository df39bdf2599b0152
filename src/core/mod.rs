//! Core functionality for the sensor board monitor
//! This module contains the Bluetooth session handling and the payload codecs.

pub mod bluetooth;
pub mod codec;

// Re-export commonly used types
pub use bluetooth::{DeviceEvent, DeviceManager, EventSink, SessionState};
pub use codec::{CodecRegistry, Value};
