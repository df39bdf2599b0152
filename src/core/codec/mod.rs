//! Binary codecs for the sensor board's characteristics
//! Every characteristic has a fixed little-endian layout (or carries plain text).
//! The registry maps a characteristic UUID to its descriptor so a channel can
//! decode notifications without knowing which stream it carries.

mod battery;
mod device_config;
mod device_info;
mod gamepad;
mod imu;
mod sensor;
mod status;
mod timestamp;

pub use battery::{BatteryLevel, ChargeState};
pub use device_config::{
    AccelGyroRate, AccelRange, DeviceConfig, GyroRange, ImuSettings, MagRange, MagRate,
    COMMAND_IDLE,
};
pub use gamepad::{Buttons, Joystick};
pub use imu::{ImuEuler, ImuVector};
pub use sensor::{FlexSensors, ForceSensor};
pub use status::{OverallStatus, SubsystemStatus};
pub use timestamp::DeviceTimestamp;

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::core::bluetooth::{
    UUID_BATTERY_LEVEL, UUID_BUTTONS, UUID_CHARGE_STATE, UUID_DEVICE_CONFIG, UUID_FIRMWARE_REVISION,
    UUID_FLEX_SENSOR, UUID_FORCE_SENSOR, UUID_HARDWARE_REVISION, UUID_IMU1_EULER, UUID_IMU1_VECTOR,
    UUID_IMU2_EULER, UUID_IMU2_VECTOR, UUID_JOYSTICK, UUID_MANUFACTURER_NAME, UUID_MODEL_NUMBER,
    UUID_OVERALL_STATUS, UUID_TIMESTAMP,
};

/// Why a payload could not be turned into a [`Value`].
///
/// Decode failures are always recoverable: a channel drops the payload and
/// keeps its subscription.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("no codec registered for characteristic {0}")]
    UnknownCharacteristic(Uuid),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("characteristic {0} has no encoder")]
    NotEncodable(Uuid),

    #[error("characteristic {uuid} expects a {expected} value")]
    WrongValue { uuid: Uuid, expected: &'static str },

    #[error("no codec registered for characteristic {0}")]
    UnknownCharacteristic(Uuid),
}

/// A decoded characteristic value, as handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Value {
    ImuVector(ImuVector),
    ImuEuler(ImuEuler),
    Timestamp(DeviceTimestamp),
    BatteryLevel(BatteryLevel),
    ChargeState(ChargeState),
    OverallStatus(OverallStatus),
    FlexSensors(FlexSensors),
    ForceSensor(ForceSensor),
    Joystick(Joystick),
    Buttons(Buttons),
    DeviceConfig(DeviceConfig),
    Text(String),
}

/// A fixed-size payload with a byte layout the board defines.
pub trait Payload: Sized {
    /// Exact wire length in bytes.
    const LEN: usize;

    fn from_bytes(data: &[u8]) -> Result<Self, DecodeError>;

    fn to_bytes(&self) -> Vec<u8>;

    fn into_value(self) -> Value;

    fn from_value(value: &Value) -> Option<&Self>;
}

/// Rejects `data` unless it is exactly `expected` bytes long.
pub(crate) fn expect_len(data: &[u8], expected: usize) -> Result<(), DecodeError> {
    if data.len() != expected {
        return Err(DecodeError::LengthMismatch {
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

pub(crate) fn read_f32(data: &[u8], offset: usize) -> f32 {
    f32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

fn decode_payload<P: Payload>(data: &[u8]) -> Result<Value, DecodeError> {
    P::from_bytes(data).map(P::into_value)
}

fn encode_payload<P: Payload>(value: &Value) -> Option<Vec<u8>> {
    P::from_value(value).map(P::to_bytes)
}

pub type DecodeFn = fn(&[u8]) -> Result<Value, DecodeError>;
pub type EncodeFn = fn(&Value) -> Option<Vec<u8>>;

/// Static description of one characteristic: where it lives and how its bytes are read.
#[derive(Clone, Copy)]
pub struct CharacteristicDescriptor {
    pub uuid: Uuid,
    /// Short human-readable name, used in logs
    pub name: &'static str,
    /// Exact payload length, `None` for variable-length text
    pub expected_len: Option<usize>,
    /// Whether the board accepts writes to this characteristic
    pub writable: bool,
    decode: DecodeFn,
    encode: Option<EncodeFn>,
}

impl CharacteristicDescriptor {
    /// Descriptor for a fixed-size payload type; encodable, read/notify only.
    pub fn payload<P: Payload>(uuid: Uuid, name: &'static str) -> Self {
        Self {
            uuid,
            name,
            expected_len: Some(P::LEN),
            writable: false,
            decode: decode_payload::<P>,
            encode: Some(encode_payload::<P>),
        }
    }

    /// Descriptor for a variable-length UTF-8 string characteristic.
    pub fn text(uuid: Uuid, name: &'static str) -> Self {
        Self {
            uuid,
            name,
            expected_len: None,
            writable: false,
            decode: device_info::decode_text,
            encode: None,
        }
    }

    pub fn writable(mut self) -> Self {
        self.writable = true;
        self
    }

    /// Decodes `data`, rejecting a wrong length before looking at any byte.
    pub fn decode(&self, data: &[u8]) -> Result<Value, DecodeError> {
        if let Some(expected) = self.expected_len {
            expect_len(data, expected)?;
        }
        (self.decode)(data)
    }

    pub fn encode(&self, value: &Value) -> Result<Vec<u8>, EncodeError> {
        let encode = self.encode.ok_or(EncodeError::NotEncodable(self.uuid))?;
        encode(value).ok_or(EncodeError::WrongValue {
            uuid: self.uuid,
            expected: self.name,
        })
    }
}

impl fmt::Debug for CharacteristicDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CharacteristicDescriptor")
            .field("uuid", &self.uuid)
            .field("name", &self.name)
            .field("expected_len", &self.expected_len)
            .field("writable", &self.writable)
            .field("encodable", &self.encode.is_some())
            .finish()
    }
}

/// Lookup table from characteristic UUID to descriptor.
#[derive(Debug, Clone)]
pub struct CodecRegistry {
    descriptors: HashMap<Uuid, CharacteristicDescriptor>,
}

impl CodecRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            descriptors: HashMap::new(),
        }
    }

    /// Registry holding every characteristic the sensor board exposes.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        for descriptor in [
            CharacteristicDescriptor::payload::<ImuVector>(UUID_IMU1_VECTOR, "imu1 vector"),
            CharacteristicDescriptor::payload::<ImuVector>(UUID_IMU2_VECTOR, "imu2 vector"),
            CharacteristicDescriptor::payload::<ImuEuler>(UUID_IMU1_EULER, "imu1 euler"),
            CharacteristicDescriptor::payload::<ImuEuler>(UUID_IMU2_EULER, "imu2 euler"),
            CharacteristicDescriptor::payload::<DeviceTimestamp>(UUID_TIMESTAMP, "timestamp")
                .writable(),
            CharacteristicDescriptor::payload::<BatteryLevel>(UUID_BATTERY_LEVEL, "battery level"),
            CharacteristicDescriptor::payload::<ChargeState>(UUID_CHARGE_STATE, "charge state"),
            CharacteristicDescriptor::payload::<OverallStatus>(
                UUID_OVERALL_STATUS,
                "overall status",
            ),
            CharacteristicDescriptor::payload::<FlexSensors>(UUID_FLEX_SENSOR, "flex sensors"),
            CharacteristicDescriptor::payload::<ForceSensor>(UUID_FORCE_SENSOR, "force sensor"),
            CharacteristicDescriptor::payload::<Joystick>(UUID_JOYSTICK, "joystick"),
            CharacteristicDescriptor::payload::<Buttons>(UUID_BUTTONS, "buttons"),
            CharacteristicDescriptor::payload::<DeviceConfig>(UUID_DEVICE_CONFIG, "device config")
                .writable(),
            CharacteristicDescriptor::text(UUID_MANUFACTURER_NAME, "manufacturer name"),
            CharacteristicDescriptor::text(UUID_MODEL_NUMBER, "model number"),
            CharacteristicDescriptor::text(UUID_FIRMWARE_REVISION, "firmware revision"),
            CharacteristicDescriptor::text(UUID_HARDWARE_REVISION, "hardware revision"),
        ] {
            registry.register(descriptor);
        }
        registry
    }

    /// Adds or replaces the descriptor for `descriptor.uuid`.
    pub fn register(&mut self, descriptor: CharacteristicDescriptor) {
        self.descriptors.insert(descriptor.uuid, descriptor);
    }

    pub fn get(&self, uuid: &Uuid) -> Option<&CharacteristicDescriptor> {
        self.descriptors.get(uuid)
    }

    pub fn decode(&self, uuid: &Uuid, data: &[u8]) -> Result<Value, DecodeError> {
        self.get(uuid)
            .ok_or(DecodeError::UnknownCharacteristic(*uuid))?
            .decode(data)
    }

    pub fn encode(&self, uuid: &Uuid, value: &Value) -> Result<Vec<u8>, EncodeError> {
        self.get(uuid)
            .ok_or(EncodeError::UnknownCharacteristic(*uuid))?
            .encode(value)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &CharacteristicDescriptor> {
        self.descriptors.values()
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
