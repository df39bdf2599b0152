//! IMU payloads: raw 9-axis vectors and on-board fused Euler angles

use nalgebra::{UnitQuaternion, Vector3};
use serde::Serialize;

use super::{expect_len, read_f32, DecodeError, Payload, Value};

/// One raw IMU sample (18 bytes, 9 × i16 LE).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ImuVector {
    /// Accelerometer counts
    pub accel: Vector3<i16>,
    /// Gyroscope counts
    pub gyro: Vector3<i16>,
    /// Magnetometer counts
    pub mag: Vector3<i16>,
}

impl ImuVector {
    pub fn new(accel: Vector3<i16>, gyro: Vector3<i16>, mag: Vector3<i16>) -> Self {
        Self { accel, gyro, mag }
    }
}

impl Default for ImuVector {
    fn default() -> Self {
        Self::new(Vector3::zeros(), Vector3::zeros(), Vector3::zeros())
    }
}

impl Payload for ImuVector {
    const LEN: usize = 18;

    fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        expect_len(data, Self::LEN)?;
        let v: Vec<i16> = data
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();

        Ok(Self {
            accel: Vector3::new(v[0], v[1], v[2]),
            gyro: Vector3::new(v[3], v[4], v[5]),
            mag: Vector3::new(v[6], v[7], v[8]),
        })
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::LEN);
        for axis in [self.accel, self.gyro, self.mag] {
            for value in axis.iter() {
                out.extend_from_slice(&value.to_le_bytes());
            }
        }
        out
    }

    fn into_value(self) -> Value {
        Value::ImuVector(self)
    }

    fn from_value(value: &Value) -> Option<&Self> {
        match value {
            Value::ImuVector(v) => Some(v),
            _ => None,
        }
    }
}

/// Orientation computed on the board (13 bytes).
///
/// Angles are in degrees. `calibration` is the fusion engine's raw
/// calibration status byte.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ImuEuler {
    pub yaw: f32,
    pub pitch: f32,
    pub roll: f32,
    pub calibration: u8,
}

impl ImuEuler {
    /// The same orientation as a unit quaternion.
    pub fn orientation(&self) -> UnitQuaternion<f64> {
        UnitQuaternion::from_euler_angles(
            (self.roll as f64).to_radians(),
            (self.pitch as f64).to_radians(),
            (self.yaw as f64).to_radians(),
        )
    }
}

impl Payload for ImuEuler {
    const LEN: usize = 13;

    fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        expect_len(data, Self::LEN)?;
        Ok(Self {
            yaw: read_f32(data, 0),
            pitch: read_f32(data, 4),
            roll: read_f32(data, 8),
            calibration: data[12],
        })
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::LEN);
        out.extend_from_slice(&self.yaw.to_le_bytes());
        out.extend_from_slice(&self.pitch.to_le_bytes());
        out.extend_from_slice(&self.roll.to_le_bytes());
        out.push(self.calibration);
        out
    }

    fn into_value(self) -> Value {
        Value::ImuEuler(self)
    }

    fn from_value(value: &Value) -> Option<&Self> {
        match value {
            Value::ImuEuler(v) => Some(v),
            _ => None,
        }
    }
}
