//! Bluetooth functionality for the sensor board monitor
//! This module handles all bluetooth operations including scanning,
//! connecting, subscribing to characteristics and keeping the session alive.

mod bluest_transport;
mod commands;
mod connection;
mod constants;
mod events;
mod manager;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
mod notification;
mod retry;
mod scanner;
mod transport;
mod types;
mod watchdog;

// Re-export types that should be publicly accessible
pub use bluest_transport::BluestTransport;
pub use commands::{ConfigEditor, ConfigTarget};
pub use connection::{ConnectionError, ConnectionManager, ConnectionState, StateObserver};
pub use constants::*; // Re-export all constants
pub use events::{DeviceEvent, EventSink};
pub use manager::{default_subsystems, ConnectReport, DeviceManager, SubsystemSpec};
pub use notification::{
    ChannelError, ChannelSnapshot, CharacteristicChannel, SubscriptionState, ValueHandler,
};
pub use retry::{RetryExhausted, RetryPolicy};
pub use scanner::BluetoothScanner;
pub use transport::{RawStream, Transport, TransportError};
pub use types::{DeviceIdentity, DeviceProfile, SessionHandle, SessionState};
pub use watchdog::Watchdog;
