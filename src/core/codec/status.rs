use serde::Serialize;

use super::{expect_len, DecodeError, Payload, Value};

/// State of one on-board peripheral as reported in the overall status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubsystemStatus {
    NotDetected,
    Failed,
    Idle,
    Running,
}

impl TryFrom<u8> for SubsystemStatus {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::NotDetected),
            1 => Ok(Self::Failed),
            2 => Ok(Self::Idle),
            3 => Ok(Self::Running),
            other => Err(DecodeError::MalformedPayload(format!(
                "unknown subsystem state {}",
                other
            ))),
        }
    }
}

impl From<SubsystemStatus> for u8 {
    fn from(status: SubsystemStatus) -> Self {
        match status {
            SubsystemStatus::NotDetected => 0,
            SubsystemStatus::Failed => 1,
            SubsystemStatus::Idle => 2,
            SubsystemStatus::Running => 3,
        }
    }
}

/// Board health summary (4 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OverallStatus {
    /// 0 means no error
    pub status_code: u8,
    pub fuel_gauge: SubsystemStatus,
    pub imu1: SubsystemStatus,
    pub imu2: SubsystemStatus,
}

impl OverallStatus {
    pub fn is_error(&self) -> bool {
        self.status_code != 0
    }

    /// True when every monitored peripheral is running.
    pub fn all_running(&self) -> bool {
        [self.fuel_gauge, self.imu1, self.imu2]
            .iter()
            .all(|s| *s == SubsystemStatus::Running)
    }
}

impl Payload for OverallStatus {
    const LEN: usize = 4;

    fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        expect_len(data, Self::LEN)?;
        Ok(Self {
            status_code: data[0],
            fuel_gauge: SubsystemStatus::try_from(data[1])?,
            imu1: SubsystemStatus::try_from(data[2])?,
            imu2: SubsystemStatus::try_from(data[3])?,
        })
    }

    fn to_bytes(&self) -> Vec<u8> {
        vec![
            self.status_code,
            self.fuel_gauge.into(),
            self.imu1.into(),
            self.imu2.into(),
        ]
    }

    fn into_value(self) -> Value {
        Value::OverallStatus(self)
    }

    fn from_value(value: &Value) -> Option<&Self> {
        match value {
            Value::OverallStatus(v) => Some(v),
            _ => None,
        }
    }
}
