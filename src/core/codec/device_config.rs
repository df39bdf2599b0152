//! The 15-byte device configuration blob
//!
//! Layout (little-endian):
//!
//! | Offset | Field |
//! |---|---|
//! | 0 | command code |
//! | 1, 2 | IMU1 accel/gyro rate, IMU1 mag rate |
//! | 3, 4 | IMU2 accel/gyro rate, IMU2 mag rate |
//! | 5, 6, 7 | IMU1 accel, gyro, mag range |
//! | 8, 9, 10 | IMU2 accel, gyro, mag range |
//! | 11..13 | auxiliary sample rate in ms (u16) |
//! | 13..15 | reserved, kept as-is |

use serde::Serialize;

use super::{expect_len, DecodeError, Payload, Value};

/// Command code asking the board to stay idle.
pub const COMMAND_IDLE: u8 = 0;

/// Declares a setting enum whose wire value is its position in the list.
macro_rules! indexed_setting {
    ($(#[$meta:meta])* $name:ident { $($variant:ident),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
        pub enum $name {
            #[default]
            $($variant),+
        }

        impl $name {
            const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn index(self) -> u8 {
                Self::ALL.iter().position(|v| *v == self).unwrap_or(0) as u8
            }
        }

        impl TryFrom<u8> for $name {
            type Error = DecodeError;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                Self::ALL.get(value as usize).copied().ok_or_else(|| {
                    DecodeError::MalformedPayload(format!(
                        "{} index {} is out of range",
                        stringify!($name),
                        value
                    ))
                })
            }
        }
    };
}

indexed_setting!(
    /// LSM6DS accelerometer/gyroscope output data rate.
    AccelGyroRate { Shutdown, Hz12_5, Hz26, Hz52, Hz104, Hz208, Hz416 }
);

indexed_setting!(
    /// LIS3MDL magnetometer output data rate.
    MagRate { Hz0_625, Hz1_25, Hz2_5, Hz5, Hz10, Hz20, Hz40, Hz80 }
);

indexed_setting!(
    AccelRange { G2, G4, G8, G16 }
);

indexed_setting!(
    GyroRange { Dps125, Dps250, Dps500, Dps1000, Dps2000 }
);

indexed_setting!(
    MagRange { Gauss4, Gauss8, Gauss12, Gauss16 }
);

/// Sampling settings for one IMU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ImuSettings {
    pub accel_gyro_rate: AccelGyroRate,
    pub mag_rate: MagRate,
    pub accel_range: AccelRange,
    pub gyro_range: GyroRange,
    pub mag_range: MagRange,
}

/// Typed view of the configuration characteristic.
///
/// The board does not merge partial updates; change one field by reading
/// the blob, editing it and writing the whole thing back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DeviceConfig {
    pub command: u8,
    pub imu1: ImuSettings,
    pub imu2: ImuSettings,
    pub aux_sample_rate_ms: u16,
    pub reserved: [u8; 2],
}

impl DeviceConfig {
    pub fn imu(&self, index: usize) -> Option<&ImuSettings> {
        match index {
            1 => Some(&self.imu1),
            2 => Some(&self.imu2),
            _ => None,
        }
    }

    pub fn imu_mut(&mut self, index: usize) -> Option<&mut ImuSettings> {
        match index {
            1 => Some(&mut self.imu1),
            2 => Some(&mut self.imu2),
            _ => None,
        }
    }

    pub fn to_array(&self) -> [u8; 15] {
        let aux = self.aux_sample_rate_ms.to_le_bytes();
        [
            self.command,
            self.imu1.accel_gyro_rate.index(),
            self.imu1.mag_rate.index(),
            self.imu2.accel_gyro_rate.index(),
            self.imu2.mag_rate.index(),
            self.imu1.accel_range.index(),
            self.imu1.gyro_range.index(),
            self.imu1.mag_range.index(),
            self.imu2.accel_range.index(),
            self.imu2.gyro_range.index(),
            self.imu2.mag_range.index(),
            aux[0],
            aux[1],
            self.reserved[0],
            self.reserved[1],
        ]
    }
}

impl Payload for DeviceConfig {
    const LEN: usize = 15;

    fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        expect_len(data, Self::LEN)?;
        Ok(Self {
            command: data[0],
            imu1: ImuSettings {
                accel_gyro_rate: AccelGyroRate::try_from(data[1])?,
                mag_rate: MagRate::try_from(data[2])?,
                accel_range: AccelRange::try_from(data[5])?,
                gyro_range: GyroRange::try_from(data[6])?,
                mag_range: MagRange::try_from(data[7])?,
            },
            imu2: ImuSettings {
                accel_gyro_rate: AccelGyroRate::try_from(data[3])?,
                mag_rate: MagRate::try_from(data[4])?,
                accel_range: AccelRange::try_from(data[8])?,
                gyro_range: GyroRange::try_from(data[9])?,
                mag_range: MagRange::try_from(data[10])?,
            },
            aux_sample_rate_ms: u16::from_le_bytes([data[11], data[12]]),
            reserved: [data[13], data[14]],
        })
    }

    fn to_bytes(&self) -> Vec<u8> {
        self.to_array().to_vec()
    }

    fn into_value(self) -> Value {
        Value::DeviceConfig(self)
    }

    fn from_value(value: &Value) -> Option<&Self> {
        match value {
            Value::DeviceConfig(v) => Some(v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_scenario_blob() {
        let blob = [0u8, 1, 0, 3, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        let config = DeviceConfig::from_bytes(&blob).unwrap();
        assert_eq!(config.command, COMMAND_IDLE);
        assert_eq!(config.imu1.accel_gyro_rate, AccelGyroRate::Hz12_5);
        assert_eq!(config.imu2.accel_gyro_rate, AccelGyroRate::Hz52);
        assert_eq!(config.imu1.accel_range, AccelRange::G2);
        assert_eq!(config.to_array(), blob);
    }

    // Pins every offset: a firmware change that moves a field must fail here.
    #[test]
    fn field_offsets_are_pinned() {
        let blob = [9u8, 6, 7, 5, 4, 3, 4, 2, 1, 2, 3, 0x34, 0x12, 0xAA, 0x55];
        let config = DeviceConfig::from_bytes(&blob).unwrap();

        assert_eq!(config.command, 9);
        assert_eq!(config.imu1.accel_gyro_rate, AccelGyroRate::Hz416);
        assert_eq!(config.imu1.mag_rate, MagRate::Hz80);
        assert_eq!(config.imu2.accel_gyro_rate, AccelGyroRate::Hz208);
        assert_eq!(config.imu2.mag_rate, MagRate::Hz10);
        assert_eq!(config.imu1.accel_range, AccelRange::G16);
        assert_eq!(config.imu1.gyro_range, GyroRange::Dps2000);
        assert_eq!(config.imu1.mag_range, MagRange::Gauss12);
        assert_eq!(config.imu2.accel_range, AccelRange::G4);
        assert_eq!(config.imu2.gyro_range, GyroRange::Dps500);
        assert_eq!(config.imu2.mag_range, MagRange::Gauss16);
        assert_eq!(config.aux_sample_rate_ms, 0x1234);
        assert_eq!(config.reserved, [0xAA, 0x55]);
        assert_eq!(config.to_array(), blob);
    }

    #[test]
    fn ranges_are_grouped_per_imu() {
        let blob = [0u8, 1, 0, 3, 0, 0, 4, 0, 0, 0, 0, 0, 0, 0, 0];
        let config = DeviceConfig::from_bytes(&blob).unwrap();
        assert_eq!(config.imu1.accel_range, AccelRange::G2);
        assert_eq!(config.imu1.gyro_range, GyroRange::Dps2000);
        assert_eq!(config.imu1.mag_range, MagRange::Gauss4);
        assert_eq!(config.imu2.gyro_range, GyroRange::Dps125);
        assert_eq!(config.to_array(), blob);
    }

    #[test]
    fn out_of_range_indices_are_malformed() {
        let mut blob = [0u8; 15];
        blob[1] = 7; // only 7 accel/gyro rates
        assert!(matches!(
            DeviceConfig::from_bytes(&blob),
            Err(DecodeError::MalformedPayload(_))
        ));

        let mut blob = [0u8; 15];
        blob[9] = 5; // only 5 gyro ranges
        assert!(DeviceConfig::from_bytes(&blob).is_err());
    }

    #[test]
    fn imu_accessors() {
        let mut config = DeviceConfig::default();
        config.imu_mut(2).unwrap().mag_rate = MagRate::Hz40;
        assert_eq!(config.imu(2).unwrap().mag_rate, MagRate::Hz40);
        assert!(config.imu(3).is_none());
        assert_eq!(config.to_array()[4], 6);
    }
}
