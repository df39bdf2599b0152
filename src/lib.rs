//! Sensor board monitor library
//! Keeps a live session with a multi-sensor BLE board and streams decoded values.

// Module declarations
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod state;
pub mod utils;

pub use error::DeviceError;
