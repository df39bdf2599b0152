//! Transport over the platform Bluetooth stack, via bluest

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bluest::{Adapter, Characteristic, Device};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use regex::Regex;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::connection_config::ConnectionConfig;
use crate::core::bluetooth::scanner::{BluetoothScanner, DeviceMap};
use crate::core::bluetooth::transport::{RawStream, Transport, TransportError};
use crate::core::bluetooth::types::{DeviceIdentity, SessionHandle};

struct BluestSession {
    device: Device,
    characteristics: HashMap<Uuid, Characteristic>,
    /// One cancellation token per live notification task
    subscriptions: HashMap<Uuid, CancellationToken>,
}

pub struct BluestTransport {
    adapter: Adapter,
    devices: DeviceMap,
    scanner: BluetoothScanner,
    sessions: tokio::sync::Mutex<HashMap<u64, BluestSession>>,
    next_session: AtomicU64,
}

impl BluestTransport {
    /// Waits for the default adapter to become available.
    pub async fn new(config: &ConnectionConfig) -> Result<Self, TransportError> {
        let adapter = Adapter::default()
            .await
            .ok_or(TransportError::AdapterUnavailable)?;
        adapter.wait_available().await?;
        info!("Bluetooth adapter is available.");

        let name_filter = config
            .name_pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| TransportError::Backend(format!("invalid name pattern: {}", e)))?;

        let devices: DeviceMap = Arc::new(Mutex::new(HashMap::new()));
        let scanner = BluetoothScanner::new(
            adapter.clone(),
            devices.clone(),
            config.min_rssi,
            name_filter,
        );

        Ok(Self {
            adapter,
            devices,
            scanner,
            sessions: tokio::sync::Mutex::new(HashMap::new()),
            next_session: AtomicU64::new(1),
        })
    }

    /// Finds a device by id among scan results or already-connected devices.
    async fn find_device(&self, address: &str) -> Result<Device, TransportError> {
        let known = self
            .devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(address)
            .cloned();
        if let Some(device) = known {
            return Ok(device);
        }

        self.adapter
            .connected_devices()
            .await?
            .into_iter()
            .find(|d| d.id().to_string() == address)
            .ok_or_else(|| TransportError::DeviceNotFound(address.to_string()))
    }

    async fn characteristic(
        &self,
        session: &SessionHandle,
        uuid: Uuid,
    ) -> Result<Characteristic, TransportError> {
        let sessions = self.sessions.lock().await;
        let entry = sessions
            .get(&session.id)
            .ok_or(TransportError::UnknownSession(session.id))?;
        if entry.characteristics.is_empty() {
            return Err(TransportError::ServicesNotReady);
        }
        entry
            .characteristics
            .get(&uuid)
            .cloned()
            .ok_or(TransportError::CharacteristicNotFound(uuid))
    }
}

#[async_trait::async_trait]
impl Transport for BluestTransport {
    async fn scan(&self, duration: Duration) -> Result<Vec<DeviceIdentity>, TransportError> {
        self.scanner.scan(duration).await
    }

    async fn open(&self, address: &str) -> Result<SessionHandle, TransportError> {
        let device = self.find_device(address).await?;
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        info!("Device details - ID: {}, Name: {:?}", address, name);

        if !device.is_connected().await {
            info!("Initiating connection to {}...", address);
            self.adapter.connect_device(&device).await?;
        }

        let id = self.next_session.fetch_add(1, Ordering::SeqCst);
        self.sessions.lock().await.insert(
            id,
            BluestSession {
                device,
                characteristics: HashMap::new(),
                subscriptions: HashMap::new(),
            },
        );
        Ok(SessionHandle {
            id,
            address: address.to_string(),
        })
    }

    async fn discover_services(
        &self,
        session: &SessionHandle,
    ) -> Result<HashSet<Uuid>, TransportError> {
        let device = {
            let sessions = self.sessions.lock().await;
            sessions
                .get(&session.id)
                .ok_or(TransportError::UnknownSession(session.id))?
                .device
                .clone()
        };

        let mut characteristics = HashMap::new();
        for service in device.services().await? {
            debug!("Available service: {}", service.uuid());
            for characteristic in service.characteristics().await? {
                characteristics.insert(characteristic.uuid(), characteristic);
            }
        }

        let found: HashSet<Uuid> = characteristics.keys().copied().collect();
        let mut sessions = self.sessions.lock().await;
        let entry = sessions
            .get_mut(&session.id)
            .ok_or(TransportError::UnknownSession(session.id))?;
        entry.characteristics = characteristics;
        Ok(found)
    }

    async fn read(&self, session: &SessionHandle, uuid: Uuid) -> Result<Vec<u8>, TransportError> {
        let characteristic = self.characteristic(session, uuid).await?;
        Ok(characteristic.read().await?)
    }

    async fn write(
        &self,
        session: &SessionHandle,
        uuid: Uuid,
        data: &[u8],
    ) -> Result<(), TransportError> {
        let characteristic = self.characteristic(session, uuid).await?;
        characteristic.write(data).await?;
        Ok(())
    }

    async fn subscribe(
        &self,
        session: &SessionHandle,
        uuid: Uuid,
    ) -> Result<RawStream, TransportError> {
        let characteristic = self.characteristic(session, uuid).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        let (ack_tx, ack_rx) = oneshot::channel();
        let cancel = CancellationToken::new();
        let cancel_for_task = cancel.clone();

        tokio::spawn(async move {
            let mut notification_stream = match characteristic.notify().await {
                Ok(stream) => {
                    let _ = ack_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ack_tx.send(Err(TransportError::from(e)));
                    return;
                }
            };

            loop {
                tokio::select! {
                    _ = cancel_for_task.cancelled() => break,
                    item = notification_stream.next() => match item {
                        Some(Ok(value)) => {
                            if tx.send(value).is_err() {
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            error!("Error in notification stream for {}: {}", uuid, e);
                            break;
                        }
                        None => break,
                    }
                }
            }
            debug!("Notification stream for {} ended", uuid);
        });

        match ack_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(TransportError::Backend(
                    "notification task ended before subscribing".into(),
                ))
            }
        }

        let mut sessions = self.sessions.lock().await;
        match sessions.get_mut(&session.id) {
            Some(entry) => {
                if let Some(previous) = entry.subscriptions.insert(uuid, cancel) {
                    previous.cancel();
                }
                Ok(rx)
            }
            None => {
                cancel.cancel();
                Err(TransportError::UnknownSession(session.id))
            }
        }
    }

    async fn unsubscribe(&self, session: &SessionHandle, uuid: Uuid) -> Result<(), TransportError> {
        let mut sessions = self.sessions.lock().await;
        let entry = sessions
            .get_mut(&session.id)
            .ok_or(TransportError::AlreadyDisconnected)?;
        match entry.subscriptions.remove(&uuid) {
            // dropping the notify stream inside the task turns notifications off
            Some(cancel) => {
                cancel.cancel();
                Ok(())
            }
            None => Err(TransportError::NotSubscribed(uuid)),
        }
    }

    async fn close(&self, session: &SessionHandle) -> Result<(), TransportError> {
        let entry = self
            .sessions
            .lock()
            .await
            .remove(&session.id)
            .ok_or(TransportError::AlreadyDisconnected)?;

        for cancel in entry.subscriptions.values() {
            cancel.cancel();
        }

        if entry.device.is_connected().await {
            info!("Disconnecting from device {}", entry.device.id());
            self.adapter.disconnect_device(&entry.device).await?;
            info!("Successfully disconnected");
            Ok(())
        } else {
            warn!("Device {} not connected", entry.device.id());
            Err(TransportError::AlreadyDisconnected)
        }
    }
}
