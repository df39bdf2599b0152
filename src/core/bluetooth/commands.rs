//! Device configuration commands
//! The board only accepts the configuration blob as a whole, so every
//! single-field change here is a read-modify-write of all 15 bytes.

use log::info;

use crate::core::bluetooth::manager::DeviceManager;
use crate::core::codec::{
    AccelGyroRate, AccelRange, DeviceConfig, GyroRange, ImuSettings, MagRange, MagRate, Payload,
};
use crate::error::DeviceError;

/// Anything holding a readable/writable configuration blob
#[async_trait::async_trait]
pub trait ConfigTarget: Send + Sync {
    async fn read_config(&self) -> Result<[u8; 15], DeviceError>;

    async fn write_config(&self, bytes: [u8; 15]) -> Result<(), DeviceError>;
}

#[async_trait::async_trait]
impl ConfigTarget for DeviceManager {
    async fn read_config(&self) -> Result<[u8; 15], DeviceError> {
        DeviceManager::read_config(self).await
    }

    async fn write_config(&self, bytes: [u8; 15]) -> Result<(), DeviceError> {
        DeviceManager::write_config(self, bytes).await
    }
}

/// Changes individual configuration fields, leaving every other byte as the board reported it
pub struct ConfigEditor<'a, T: ConfigTarget + ?Sized> {
    target: &'a T,
}

impl<'a, T: ConfigTarget + ?Sized> ConfigEditor<'a, T> {
    pub fn new(target: &'a T) -> Self {
        Self { target }
    }

    /// Reads the current blob, applies `change` and writes the result back.
    pub async fn update<F>(&self, change: F) -> Result<DeviceConfig, DeviceError>
    where
        F: FnOnce(&mut DeviceConfig) + Send,
    {
        let current = self.target.read_config().await?;
        let mut config = DeviceConfig::from_bytes(&current)?;
        change(&mut config);
        self.target.write_config(config.to_array()).await?;
        Ok(config)
    }

    pub async fn set_command(&self, command: u8) -> Result<DeviceConfig, DeviceError> {
        info!("Setting command code {}", command);
        self.update(|c| c.command = command).await
    }

    pub async fn set_imu_rates(
        &self,
        imu: usize,
        accel_gyro: AccelGyroRate,
        mag: MagRate,
    ) -> Result<DeviceConfig, DeviceError> {
        info!("Setting IMU{} rates to {:?} / {:?}", imu, accel_gyro, mag);
        self.update_imu(imu, |s| {
            s.accel_gyro_rate = accel_gyro;
            s.mag_rate = mag;
        })
        .await
    }

    pub async fn set_imu_ranges(
        &self,
        imu: usize,
        accel: AccelRange,
        gyro: GyroRange,
        mag: MagRange,
    ) -> Result<DeviceConfig, DeviceError> {
        info!(
            "Setting IMU{} ranges to {:?} / {:?} / {:?}",
            imu, accel, gyro, mag
        );
        self.update_imu(imu, |s| {
            s.accel_range = accel;
            s.gyro_range = gyro;
            s.mag_range = mag;
        })
        .await
    }

    pub async fn set_aux_sample_rate(&self, millis: u16) -> Result<DeviceConfig, DeviceError> {
        info!("Setting auxiliary sample rate to {} ms", millis);
        self.update(|c| c.aux_sample_rate_ms = millis).await
    }

    async fn update_imu<F>(&self, imu: usize, change: F) -> Result<DeviceConfig, DeviceError>
    where
        F: FnOnce(&mut ImuSettings) + Send,
    {
        if !(1..=2).contains(&imu) {
            return Err(DeviceError::UnexpectedValue {
                name: "imu index",
                expected: "1 or 2",
                actual: imu.to_string(),
            });
        }
        self.update(|c| {
            if let Some(settings) = c.imu_mut(imu) {
                change(settings);
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Blob {
        bytes: Mutex<[u8; 15]>,
        writes: Mutex<u32>,
    }

    impl Blob {
        fn new(bytes: [u8; 15]) -> Self {
            Self {
                bytes: Mutex::new(bytes),
                writes: Mutex::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl ConfigTarget for Blob {
        async fn read_config(&self) -> Result<[u8; 15], DeviceError> {
            Ok(*self.bytes.lock().unwrap())
        }

        async fn write_config(&self, bytes: [u8; 15]) -> Result<(), DeviceError> {
            *self.bytes.lock().unwrap() = bytes;
            *self.writes.lock().unwrap() += 1;
            Ok(())
        }
    }

    #[tokio::test]
    async fn single_field_change_preserves_the_rest() {
        let original = [0u8, 1, 2, 3, 4, 1, 2, 3, 3, 4, 2, 0x10, 0x00, 0xAB, 0xCD];
        let blob = Blob::new(original);
        let editor = ConfigEditor::new(&blob);

        editor.set_aux_sample_rate(500).await.unwrap();

        let mut expected = original;
        expected[11..13].copy_from_slice(&500u16.to_le_bytes());
        assert_eq!(*blob.bytes.lock().unwrap(), expected);
    }

    #[tokio::test]
    async fn imu2_rates_touch_only_their_offsets() {
        let blob = Blob::new([0u8; 15]);
        let editor = ConfigEditor::new(&blob);

        editor
            .set_imu_rates(2, AccelGyroRate::Hz104, MagRate::Hz20)
            .await
            .unwrap();
        assert_eq!(
            *blob.bytes.lock().unwrap(),
            [0, 0, 0, 4, 5, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]
        );
    }

    #[tokio::test]
    async fn ranges_for_imu1() {
        let blob = Blob::new([0u8; 15]);
        ConfigEditor::new(&blob)
            .set_imu_ranges(1, AccelRange::G8, GyroRange::Dps1000, MagRange::Gauss16)
            .await
            .unwrap();
        assert_eq!(
            *blob.bytes.lock().unwrap(),
            [0, 0, 0, 0, 0, 2, 3, 3, 0, 0, 0, 0, 0, 0, 0]
        );
    }

    #[tokio::test]
    async fn ranges_for_imu2() {
        let blob = Blob::new([0u8; 15]);
        ConfigEditor::new(&blob)
            .set_imu_ranges(2, AccelRange::G4, GyroRange::Dps2000, MagRange::Gauss8)
            .await
            .unwrap();
        assert_eq!(
            *blob.bytes.lock().unwrap(),
            [0, 0, 0, 0, 0, 0, 0, 0, 1, 4, 1, 0, 0, 0, 0]
        );
    }

    #[tokio::test]
    async fn bad_imu_index_changes_nothing() {
        let original = [7u8, 1, 0, 3, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        let blob = Blob::new(original);
        let err = ConfigEditor::new(&blob)
            .set_imu_rates(3, AccelGyroRate::Hz26, MagRate::Hz5)
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::UnexpectedValue { .. }));
        assert_eq!(*blob.bytes.lock().unwrap(), original);
    }

    #[tokio::test]
    async fn invalid_stored_blob_is_not_rewritten() {
        let mut stored = [0u8; 15];
        stored[7] = 9;
        let blob = Blob::new(stored);
        assert!(matches!(
            ConfigEditor::new(&blob).set_command(1).await,
            Err(DeviceError::Decode(_))
        ));
        assert_eq!(*blob.writes.lock().unwrap(), 0);
    }
}
