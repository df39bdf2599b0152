//! Defines shared data structures for the Bluetooth module.

use serde::Serialize;

/// A peripheral picked from scan results
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceIdentity {
    /// Platform-specific unique identifier for the device (MAC address on Linux, a UUID on macOS)
    pub address: String,
    /// The advertised name of the device
    pub name: String,
    /// The signal strength (RSSI) when the device was discovered
    pub rssi: i16,
}

impl DeviceIdentity {
    /// Creates a new DeviceIdentity instance
    pub fn new(address: impl Into<String>, name: impl Into<String>, rssi: i16) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
            rssi,
        }
    }

    /// Returns true if `target` appears in the device's name or address
    pub fn matches(&self, target: &str) -> bool {
        self.name.contains(target) || self.address.contains(target)
    }
}

/// Device Information strings, filled in after connecting when available
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceProfile {
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub firmware: Option<String>,
    pub hardware_revision: Option<String>,
}

/// Opaque handle to one open transport session
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    pub id: u64,
    pub address: String,
}

/// Lifecycle of the device session as seen by the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    DiscoveringServices,
    StartingSubsystems,
    Ready,
    Disconnecting,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "Disconnected"),
            SessionState::Connecting => write!(f, "Connecting"),
            SessionState::DiscoveringServices => write!(f, "Discovering services"),
            SessionState::StartingSubsystems => write!(f, "Starting subsystems"),
            SessionState::Ready => write!(f, "Ready"),
            SessionState::Disconnecting => write!(f, "Disconnecting"),
        }
    }
}
