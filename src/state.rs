//! Application state management
//! One explicitly constructed session object; nothing here is global.

use std::sync::Arc;

use anyhow::Result;
use log::info;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::config::AppConfig;
use crate::core::bluetooth::{BluestTransport, DeviceEvent, DeviceManager, EventSink, Transport};

pub struct AppState {
    pub device_manager: Arc<DeviceManager>,
    /// Events for the presentation layer; take it once and drain it
    pub events: Option<UnboundedReceiver<DeviceEvent>>,
    pub config: AppConfig,
}

impl AppState {
    /// Builds the state on top of the system Bluetooth adapter.
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!("Initializing Bluetooth transport...");
        let transport = BluestTransport::new(&config.connection).await?;
        Self::with_transport(Arc::new(transport), config)
    }

    /// Builds the state on top of any transport, e.g. a mock in tests.
    pub fn with_transport(transport: Arc<dyn Transport>, config: AppConfig) -> Result<Self> {
        let (sink, events) = EventSink::channel();
        let manager = DeviceManager::new(transport, &config, sink)?;
        Ok(Self {
            device_manager: Arc::new(manager),
            events: Some(events),
            config,
        })
    }

    /// Gets a reference to the device manager
    pub fn get_device_manager_arc(&self) -> Arc<DeviceManager> {
        self.device_manager.clone()
    }
}
