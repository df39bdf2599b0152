//! The narrow interface to the platform BLE stack
//! Everything above this trait is transport-agnostic; `BluestTransport`
//! talks to real hardware and `MockTransport` stands in for it in tests.

use std::collections::HashSet;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::core::bluetooth::types::{DeviceIdentity, SessionHandle};

/// Raw notification payloads for one subscribed characteristic.
pub type RawStream = mpsc::UnboundedReceiver<Vec<u8>>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("no Bluetooth adapter available")]
    AdapterUnavailable,

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("unknown session {0}")]
    UnknownSession(u64),

    #[error("characteristic not found: {0}")]
    CharacteristicNotFound(Uuid),

    #[error("services not discovered yet")]
    ServicesNotReady,

    #[error("not subscribed to {0}")]
    NotSubscribed(Uuid),

    #[error("device already disconnected")]
    AlreadyDisconnected,

    #[error("Bluetooth operation failed: {0}")]
    Backend(String),
}

impl TransportError {
    /// Whether repeating the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            TransportError::AdapterUnavailable
                | TransportError::DeviceNotFound(_)
                | TransportError::UnknownSession(_)
                | TransportError::CharacteristicNotFound(_)
        )
    }

    /// Errors that mean the resource is already gone, which is what
    /// unsubscribe/close wanted anyway.
    pub fn is_already_released(&self) -> bool {
        matches!(
            self,
            TransportError::NotSubscribed(_) | TransportError::AlreadyDisconnected
        )
    }
}

impl From<bluest::Error> for TransportError {
    fn from(e: bluest::Error) -> Self {
        TransportError::Backend(e.to_string())
    }
}

/// Platform BLE stack as seen by the connection state machine and channels.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Scans for peripherals for at most `duration`
    async fn scan(&self, duration: Duration) -> Result<Vec<DeviceIdentity>, TransportError>;

    /// Opens a connection to the device with the given address
    async fn open(&self, address: &str) -> Result<SessionHandle, TransportError>;

    /// Enumerates the characteristics the device currently exposes
    async fn discover_services(
        &self,
        session: &SessionHandle,
    ) -> Result<HashSet<Uuid>, TransportError>;

    async fn read(&self, session: &SessionHandle, uuid: Uuid) -> Result<Vec<u8>, TransportError>;

    async fn write(
        &self,
        session: &SessionHandle,
        uuid: Uuid,
        data: &[u8],
    ) -> Result<(), TransportError>;

    /// Enables notifications; returns once the peripheral acknowledged them
    async fn subscribe(
        &self,
        session: &SessionHandle,
        uuid: Uuid,
    ) -> Result<RawStream, TransportError>;

    async fn unsubscribe(&self, session: &SessionHandle, uuid: Uuid) -> Result<(), TransportError>;

    async fn close(&self, session: &SessionHandle) -> Result<(), TransportError>;
}
