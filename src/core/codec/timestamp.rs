use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{expect_len, DecodeError, Payload, Value};

/// The board's real-time clock (8 bytes, u64 LE).
///
/// The wire unit is whole seconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceTimestamp {
    pub unix_seconds: u64,
}

impl DeviceTimestamp {
    /// The host's current time, for writing to the board.
    pub fn now() -> Self {
        Self {
            unix_seconds: Utc::now().timestamp().max(0) as u64,
        }
    }

    /// Calendar time, or `None` if the value is beyond what chrono can represent.
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        let secs = i64::try_from(self.unix_seconds).ok()?;
        DateTime::<Utc>::from_timestamp(secs, 0)
    }

    pub fn formatted(&self) -> String {
        match self.as_datetime() {
            Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => format!("{} (out of range)", self.unix_seconds),
        }
    }
}

impl Payload for DeviceTimestamp {
    const LEN: usize = 8;

    fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        expect_len(data, Self::LEN)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(data);
        Ok(Self {
            unix_seconds: u64::from_le_bytes(raw),
        })
    }

    fn to_bytes(&self) -> Vec<u8> {
        self.unix_seconds.to_le_bytes().to_vec()
    }

    fn into_value(self) -> Value {
        Value::Timestamp(self)
    }

    fn from_value(value: &Value) -> Option<&Self> {
        match value {
            Value::Timestamp(v) => Some(v),
            _ => None,
        }
    }
}
