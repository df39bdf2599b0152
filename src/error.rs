//! Errors surfaced by the device manager

use thiserror::Error;
use uuid::Uuid;

use crate::core::bluetooth::{ChannelError, ConnectionError, TransportError};
use crate::core::codec::DecodeError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Some critical subsystem never fully subscribed; the session was torn down
    #[error("critical subsystem(s) failed to start: {}", failed.join(", "))]
    CriticalSubsystemFailure { failed: Vec<String> },

    #[error("no device connected")]
    NotConnected,

    #[error("no previous device to reconnect to")]
    NoPreviousDevice,

    #[error("unknown characteristic {0}")]
    UnknownCharacteristic(Uuid),

    #[error("{name} expected {expected}, got {actual:?}")]
    UnexpectedValue {
        name: &'static str,
        expected: &'static str,
        actual: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn critical_failure_lists_subsystems() {
        let err = DeviceError::CriticalSubsystemFailure {
            failed: vec!["imu1".into(), "imu2".into()],
        };
        assert_eq!(
            err.to_string(),
            "critical subsystem(s) failed to start: imu1, imu2"
        );
    }

    #[test]
    fn transport_errors_convert() {
        let err: DeviceError = TransportError::ServicesNotReady.into();
        assert!(matches!(err, DeviceError::Transport(TransportError::ServicesNotReady)));
    }
}
