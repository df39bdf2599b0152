use serde::Serialize;

use super::{expect_len, read_f32, DecodeError, Payload, Value};

/// Resistance of the five flex sensors in kΩ (20 bytes, 5 × f32 LE).
///
/// Readings are passed through as sent, including infinity for an open circuit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FlexSensors {
    pub resistances_kohm: [f32; 5],
}

impl Payload for FlexSensors {
    const LEN: usize = 20;

    fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        expect_len(data, Self::LEN)?;
        let mut resistances_kohm = [0.0f32; 5];
        for (i, slot) in resistances_kohm.iter_mut().enumerate() {
            *slot = read_f32(data, i * 4);
        }
        Ok(Self { resistances_kohm })
    }

    fn to_bytes(&self) -> Vec<u8> {
        self.resistances_kohm
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect()
    }

    fn into_value(self) -> Value {
        Value::FlexSensors(self)
    }

    fn from_value(value: &Value) -> Option<&Self> {
        match value {
            Value::FlexSensors(v) => Some(v),
            _ => None,
        }
    }
}

/// Resistance of the force sensor in kΩ (4 bytes, f32 LE).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ForceSensor {
    pub resistance_kohm: f32,
}

impl Payload for ForceSensor {
    const LEN: usize = 4;

    fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        expect_len(data, Self::LEN)?;
        Ok(Self {
            resistance_kohm: read_f32(data, 0),
        })
    }

    fn to_bytes(&self) -> Vec<u8> {
        self.resistance_kohm.to_le_bytes().to_vec()
    }

    fn into_value(self) -> Value {
        Value::ForceSensor(self)
    }

    fn from_value(value: &Value) -> Option<&Self> {
        match value {
            Value::ForceSensor(v) => Some(v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flex_values_in_order() {
        let values = [1.5f32, 2.0, 33.25, 0.0, 100.0];
        let data: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let flex = FlexSensors::from_bytes(&data).unwrap();
        assert_eq!(flex.resistances_kohm, values);
    }

    #[test]
    fn infinite_flex_reading_keeps_the_others() {
        let values = [1.5f32, f32::INFINITY, 33.25, f32::NEG_INFINITY, 100.0];
        let data: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let flex = FlexSensors::from_bytes(&data).unwrap();
        assert_eq!(flex.resistances_kohm, values);
        assert_eq!(flex.to_bytes(), data);
    }

    #[test]
    fn force_passes_non_finite_through() {
        let force = ForceSensor::from_bytes(&f32::INFINITY.to_le_bytes()).unwrap();
        assert!(force.resistance_kohm.is_infinite());
        let force = ForceSensor::from_bytes(&f32::NAN.to_le_bytes()).unwrap();
        assert!(force.resistance_kohm.is_nan());
        let force = ForceSensor::from_bytes(&12.5f32.to_le_bytes()).unwrap();
        assert_eq!(force.resistance_kohm, 12.5);
        assert!(ForceSensor::from_bytes(&[0, 0, 0]).is_err());
    }
}
