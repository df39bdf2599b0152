use serde::Serialize;

use super::{expect_len, DecodeError, Payload, Value};

/// Battery charge in percent (1 byte, 0-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatteryLevel {
    pub percent: u8,
}

impl Payload for BatteryLevel {
    const LEN: usize = 1;

    fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        expect_len(data, Self::LEN)?;
        if data[0] > 100 {
            return Err(DecodeError::MalformedPayload(format!(
                "battery level {}% is out of range",
                data[0]
            )));
        }
        Ok(Self { percent: data[0] })
    }

    fn to_bytes(&self) -> Vec<u8> {
        vec![self.percent]
    }

    fn into_value(self) -> Value {
        Value::BatteryLevel(self)
    }

    fn from_value(value: &Value) -> Option<&Self> {
        match value {
            Value::BatteryLevel(v) => Some(v),
            _ => None,
        }
    }
}

/// Charger state reported by the fuel gauge (1 byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeState {
    NotCharging,
    Charging,
    Full,
}

impl TryFrom<u8> for ChargeState {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::NotCharging),
            1 => Ok(Self::Charging),
            2 => Ok(Self::Full),
            other => Err(DecodeError::MalformedPayload(format!(
                "unknown charge state {}",
                other
            ))),
        }
    }
}

impl From<ChargeState> for u8 {
    fn from(state: ChargeState) -> Self {
        match state {
            ChargeState::NotCharging => 0,
            ChargeState::Charging => 1,
            ChargeState::Full => 2,
        }
    }
}

impl std::fmt::Display for ChargeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChargeState::NotCharging => write!(f, "Not Charging"),
            ChargeState::Charging => write!(f, "Charging"),
            ChargeState::Full => write!(f, "Fully Charged"),
        }
    }
}

impl Payload for ChargeState {
    const LEN: usize = 1;

    fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        expect_len(data, Self::LEN)?;
        Self::try_from(data[0])
    }

    fn to_bytes(&self) -> Vec<u8> {
        vec![u8::from(*self)]
    }

    fn into_value(self) -> Value {
        Value::ChargeState(self)
    }

    fn from_value(value: &Value) -> Option<&Self> {
        match value {
            Value::ChargeState(v) => Some(v),
            _ => None,
        }
    }
}
