use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bluest::{Adapter, Device};
use futures_util::StreamExt;
use log::{debug, info};
use regex::Regex;

use crate::core::bluetooth::transport::TransportError;
use crate::core::bluetooth::types::DeviceIdentity;

/// Shared map from device id to the bluest handle found while scanning
pub type DeviceMap = Arc<Mutex<HashMap<String, Device>>>;

pub struct BluetoothScanner {
    adapter: Adapter,
    devices: DeviceMap,
    min_rssi_threshold: i16,
    name_filter: Option<Regex>,
}

impl BluetoothScanner {
    pub fn new(
        adapter: Adapter,
        devices: DeviceMap,
        min_rssi_threshold: i16,
        name_filter: Option<Regex>,
    ) -> Self {
        Self {
            adapter,
            devices,
            min_rssi_threshold,
            name_filter,
        }
    }

    /// Scans for at most `duration` and returns every matching device once.
    /// Devices the system is already connected to are reported first.
    pub async fn scan(&self, duration: Duration) -> Result<Vec<DeviceIdentity>, TransportError> {
        self.lock_devices().clear();

        let mut found = Vec::new();

        info!("Checking for connected devices");
        for device in self.adapter.connected_devices().await? {
            if self.is_sensor_board(&device) {
                let rssi = device.rssi().await.unwrap_or(0);
                found.push(self.remember(device, rssi));
            }
        }

        info!("Starting bluetooth scan for {} s", duration.as_secs());
        let mut scan_stream = self.adapter.scan(&[]).await?;
        let deadline = tokio::time::sleep(duration);
        tokio::pin!(deadline);

        // Process discovered devices in real-time
        loop {
            tokio::select! {
                _ = &mut deadline => {
                    info!("Scan window elapsed.");
                    break;
                }
                result = scan_stream.next() => {
                    let Some(discovered_device) = result else {
                        info!("Bluetooth scan stream has ended.");
                        break;
                    };
                    let device = discovered_device.device;
                    let rssi = discovered_device.rssi;
                    debug!("Found device - Device: {:?}, RSSI: {:?}", device, rssi);

                    // Only include devices with medium or stronger signal strength
                    let Some(signal_strength) = rssi else { continue };
                    if signal_strength < self.min_rssi_threshold || !self.is_sensor_board(&device) {
                        continue;
                    }
                    let id = device.id().to_string();
                    if found.iter().any(|d: &DeviceIdentity| d.address == id) {
                        continue;
                    }
                    found.push(self.remember(device, signal_strength));
                }
            }
        }

        info!("Scan complete, {} device(s) found", found.len());
        Ok(found)
    }

    fn remember(&self, device: Device, rssi: i16) -> DeviceIdentity {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        let id = device.id().to_string();
        info!("Found sensor board: ID: {}, Name: {:?}, RSSI: {}", id, name, rssi);

        self.lock_devices().insert(id.clone(), device);
        DeviceIdentity::new(id, name, rssi)
    }

    fn lock_devices(&self) -> std::sync::MutexGuard<'_, HashMap<String, Device>> {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Named devices pass; with a name filter the name must also match it.
    fn is_sensor_board(&self, device: &Device) -> bool {
        let Ok(name) = device.name() else {
            return false;
        };
        name_matches(self.name_filter.as_ref(), &name)
    }
}

fn name_matches(filter: Option<&Regex>, name: &str) -> bool {
    match filter {
        Some(re) => re.is_match(name),
        None => !name.is_empty(),
    }
}
