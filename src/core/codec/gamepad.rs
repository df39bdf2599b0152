use serde::Serialize;

use super::{expect_len, DecodeError, Payload, Value};

/// Joystick position and push-button (5 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Joystick {
    pub x: i16,
    pub y: i16,
    /// 0 = released, anything else = pressed
    pub button: u8,
}

impl Joystick {
    pub fn is_pressed(&self) -> bool {
        self.button != 0
    }
}

impl Payload for Joystick {
    const LEN: usize = 5;

    fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        expect_len(data, Self::LEN)?;
        Ok(Self {
            x: i16::from_le_bytes([data[0], data[1]]),
            y: i16::from_le_bytes([data[2], data[3]]),
            button: data[4],
        })
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::LEN);
        out.extend_from_slice(&self.x.to_le_bytes());
        out.extend_from_slice(&self.y.to_le_bytes());
        out.push(self.button);
        out
    }

    fn into_value(self) -> Value {
        Value::Joystick(self)
    }

    fn from_value(value: &Value) -> Option<&Self> {
        match value {
            Value::Joystick(v) => Some(v),
            _ => None,
        }
    }
}

/// Four independent buttons, one byte each (4 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Buttons {
    pub states: [u8; 4],
}

impl Buttons {
    /// Whether button `index` (0-based) is held down; out-of-range indices read as released.
    pub fn pressed(&self, index: usize) -> bool {
        self.states.get(index).is_some_and(|s| *s != 0)
    }
}

impl Payload for Buttons {
    const LEN: usize = 4;

    fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        expect_len(data, Self::LEN)?;
        Ok(Self {
            states: [data[0], data[1], data[2], data[3]],
        })
    }

    fn to_bytes(&self) -> Vec<u8> {
        self.states.to_vec()
    }

    fn into_value(self) -> Value {
        Value::Buttons(self)
    }

    fn from_value(value: &Value) -> Option<&Self> {
        match value {
            Value::Buttons(v) => Some(v),
            _ => None,
        }
    }
}
