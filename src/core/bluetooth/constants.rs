//! Constants used throughout the application
//! This module contains all the constant values used in the application,
//! such as UUIDs, retry budgets, delays and subsystem names.

use uuid::Uuid;

/// Standard Bluetooth Service UUIDs
pub const UUID_DEVICE_INFORMATION_SERVICE: Uuid = Uuid::from_u128(0x0000180a_0000_1000_8000_00805f9b34fb);
pub const UUID_BATTERY_SERVICE: Uuid = Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb);

/// Standard Bluetooth Characteristic UUIDs
pub const UUID_MANUFACTURER_NAME: Uuid = Uuid::from_u128(0x00002a29_0000_1000_8000_00805f9b34fb);
pub const UUID_MODEL_NUMBER: Uuid = Uuid::from_u128(0x00002a24_0000_1000_8000_00805f9b34fb);
pub const UUID_FIRMWARE_REVISION: Uuid = Uuid::from_u128(0x00002a26_0000_1000_8000_00805f9b34fb);
pub const UUID_HARDWARE_REVISION: Uuid = Uuid::from_u128(0x00002a27_0000_1000_8000_00805f9b34fb);
pub const UUID_BATTERY_LEVEL: Uuid = Uuid::from_u128(0x00002a19_0000_1000_8000_00805f9b34fb);

/// Sensor board characteristics
pub const UUID_IMU1_VECTOR: Uuid = Uuid::from_u128(0x55a58e5b_9f51_47dc_b6c7_ee929ba79664);
pub const UUID_IMU2_VECTOR: Uuid = Uuid::from_u128(0x84b70b01_8869_4a23_ab4f_fbfd1a25a925);
pub const UUID_TIMESTAMP: Uuid = Uuid::from_u128(0x7ae63a01_7ad5_464b_803d_8a392d242cc7);
pub const UUID_IMU1_EULER: Uuid = Uuid::from_u128(0x55a58e5c_9f51_47dc_b6c7_ee929ba79664);
pub const UUID_IMU2_EULER: Uuid = Uuid::from_u128(0x84b70b02_8869_4a23_ab4f_fbfd1a25a925);
pub const UUID_CHARGE_STATE: Uuid = Uuid::from_u128(0x2f1e6a01_3c4b_4d7e_9a61_5b0c8d2e7f10);
pub const UUID_OVERALL_STATUS: Uuid = Uuid::from_u128(0x2f1e6a02_3c4b_4d7e_9a61_5b0c8d2e7f10);
pub const UUID_FLEX_SENSOR: Uuid = Uuid::from_u128(0x2f1e6a03_3c4b_4d7e_9a61_5b0c8d2e7f10);
pub const UUID_FORCE_SENSOR: Uuid = Uuid::from_u128(0x2f1e6a04_3c4b_4d7e_9a61_5b0c8d2e7f10);
pub const UUID_JOYSTICK: Uuid = Uuid::from_u128(0x2f1e6a05_3c4b_4d7e_9a61_5b0c8d2e7f10);
pub const UUID_BUTTONS: Uuid = Uuid::from_u128(0x2f1e6a06_3c4b_4d7e_9a61_5b0c8d2e7f10);
pub const UUID_DEVICE_CONFIG: Uuid = Uuid::from_u128(0x2f1e6a07_3c4b_4d7e_9a61_5b0c8d2e7f10);

/// Device Information characteristics read into the device profile
pub const DEVICE_INFO_CHARACTERISTICS: [Uuid; 4] = [
    UUID_MANUFACTURER_NAME,
    UUID_MODEL_NUMBER,
    UUID_FIRMWARE_REVISION,
    UUID_HARDWARE_REVISION,
];

/// Subsystem names, in startup priority order
pub const SUBSYSTEM_STATUS: &str = "status";
pub const SUBSYSTEM_IMU1: &str = "imu1";
pub const SUBSYSTEM_IMU2: &str = "imu2";
pub const SUBSYSTEM_BATTERY: &str = "battery";
pub const SUBSYSTEM_SENSORS: &str = "sensors";
pub const SUBSYSTEM_GAMEPAD: &str = "gamepad";
pub const SUBSYSTEM_ORIENTATION: &str = "orientation";
/// Name used for the one-shot timestamp read
pub const SUBSYSTEM_TIMESTAMP: &str = "timestamp";

/// Maximum number of connection retries
pub const MAX_CONNECT_RETRIES: u32 = 5;

/// Delay between connection retries in milliseconds
pub const CONNECT_RETRY_DELAY_MS: u64 = 1000;

/// Maximum number of service discovery polls
pub const MAX_DISCOVERY_RETRIES: u32 = 5;

/// Delay between service discovery polls in milliseconds
pub const DISCOVERY_RETRY_DELAY_MS: u64 = 500;

/// Maximum number of subscription attempts per characteristic
pub const MAX_SUBSCRIBE_RETRIES: u32 = 5;

/// Delay between subscription attempts in milliseconds
pub const SUBSCRIBE_RETRY_DELAY_MS: u64 = 500;

/// Wait after discovery before the first subscription, in milliseconds
pub const SERVICE_SETTLE_DELAY_MS: u64 = 1000;

/// Gap between starting two subsystems, in milliseconds
pub const INTER_SUBSYSTEM_DELAY_MS: u64 = 200;

/// Heartbeat gap after which the session is reported stale, in milliseconds
pub const STALE_AFTER_MS: u64 = 3000;

/// Re-check interval while the session is stale, in milliseconds
pub const WATCHDOG_CHECK_INTERVAL_MS: u64 = 3000;

/// Scan duration in seconds
pub const DEFAULT_SCAN_DURATION_SECS: u64 = 5;

/// Minimum RSSI threshold for device discovery
pub const MIN_RSSI_THRESHOLD: i16 = -90;
