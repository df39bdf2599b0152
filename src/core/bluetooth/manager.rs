//! Device manager for the sensor board
//! This module sequences the start and shutdown of every subsystem on top of
//! the connection state machine and is the single entry point the
//! application talks to.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{error, info, warn};
use serde::Serialize;
use tokio::time::sleep;
use uuid::Uuid;

use crate::config::connection_config::ConnectionConfig;
use crate::config::AppConfig;
use crate::core::bluetooth::connection::{ConnectionManager, ConnectionState};
use crate::core::bluetooth::constants::*;
use crate::core::bluetooth::events::EventSink;
use crate::core::bluetooth::notification::{CharacteristicChannel, SubscriptionState, ValueHandler};
use crate::core::bluetooth::transport::Transport;
use crate::core::bluetooth::types::{DeviceIdentity, DeviceProfile, SessionHandle, SessionState};
use crate::core::bluetooth::watchdog::Watchdog;
use crate::core::codec::{
    CodecRegistry, DecodeError, DeviceConfig, DeviceTimestamp, Payload, Value,
};
use crate::error::DeviceError;

/// A named group of characteristics started and stopped together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubsystemSpec {
    pub name: &'static str,
    pub characteristics: Vec<Uuid>,
    /// A critical subsystem that fails to start aborts the whole connection
    pub critical: bool,
    /// Notifications on this characteristic feed the liveness watchdog
    pub heartbeat: Option<Uuid>,
}

impl SubsystemSpec {
    pub fn critical(name: &'static str, characteristics: &[Uuid]) -> Self {
        Self {
            name,
            characteristics: characteristics.to_vec(),
            critical: true,
            heartbeat: None,
        }
    }

    pub fn best_effort(name: &'static str, characteristics: &[Uuid]) -> Self {
        Self {
            critical: false,
            ..Self::critical(name, characteristics)
        }
    }

    pub fn with_heartbeat(mut self, uuid: Uuid) -> Self {
        self.heartbeat = Some(uuid);
        self
    }
}

/// The sensor board's subsystems, in startup priority order.
pub fn default_subsystems() -> Vec<SubsystemSpec> {
    vec![
        SubsystemSpec::critical(SUBSYSTEM_STATUS, &[UUID_OVERALL_STATUS]),
        SubsystemSpec::critical(SUBSYSTEM_IMU1, &[UUID_IMU1_VECTOR]),
        SubsystemSpec::critical(SUBSYSTEM_IMU2, &[UUID_IMU2_VECTOR]),
        SubsystemSpec::best_effort(SUBSYSTEM_BATTERY, &[UUID_BATTERY_LEVEL, UUID_CHARGE_STATE])
            .with_heartbeat(UUID_CHARGE_STATE),
        SubsystemSpec::best_effort(SUBSYSTEM_SENSORS, &[UUID_FLEX_SENSOR, UUID_FORCE_SENSOR]),
        SubsystemSpec::best_effort(SUBSYSTEM_GAMEPAD, &[UUID_JOYSTICK, UUID_BUTTONS]),
        SubsystemSpec::best_effort(SUBSYSTEM_ORIENTATION, &[UUID_IMU1_EULER, UUID_IMU2_EULER]),
    ]
}

/// Outcome of a successful connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectReport {
    pub device: DeviceIdentity,
    pub profile: DeviceProfile,
    /// Best-effort subsystems that did not start
    pub degraded: Vec<String>,
}

struct Subsystem {
    spec: SubsystemSpec,
    channels: Vec<CharacteristicChannel>,
    available: AtomicBool,
}

/// Manages the session with one sensor board
pub struct DeviceManager {
    transport: Arc<dyn Transport>,
    registry: CodecRegistry,
    connection: ConnectionManager,
    subsystems: Vec<Subsystem>,
    timestamp: CharacteristicChannel,
    device_config: CharacteristicChannel,
    watchdog: Arc<Watchdog>,
    events: EventSink,
    settings: ConnectionConfig,
    session_state: Arc<Mutex<SessionState>>,
    failed: Mutex<Vec<String>>,
    /// Serializes connect/disconnect at the orchestration level
    op_lock: tokio::sync::Mutex<()>,
}

impl DeviceManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        config: &AppConfig,
        events: EventSink,
    ) -> Result<Self, DeviceError> {
        Self::with_subsystems(transport, config, events, default_subsystems())
    }

    /// Builds a manager over a custom subsystem table, in priority order.
    pub fn with_subsystems(
        transport: Arc<dyn Transport>,
        config: &AppConfig,
        events: EventSink,
        specs: Vec<SubsystemSpec>,
    ) -> Result<Self, DeviceError> {
        let registry = CodecRegistry::standard();
        let settings = config.connection.clone();

        let channel = |uuid: Uuid| -> Result<CharacteristicChannel, DeviceError> {
            let descriptor = registry
                .get(&uuid)
                .copied()
                .ok_or(DeviceError::UnknownCharacteristic(uuid))?;
            Ok(CharacteristicChannel::new(
                descriptor,
                transport.clone(),
                settings.subscribe_retry,
            ))
        };

        let mut subsystems = Vec::with_capacity(specs.len());
        for spec in specs {
            let channels = spec
                .characteristics
                .iter()
                .map(|uuid| channel(*uuid))
                .collect::<Result<Vec<_>, _>>()?;
            subsystems.push(Subsystem {
                spec,
                channels,
                available: AtomicBool::new(false),
            });
        }
        let timestamp = channel(UUID_TIMESTAMP)?;
        let device_config = channel(UUID_DEVICE_CONFIG)?;

        let connection = ConnectionManager::new(
            transport.clone(),
            settings.open_retry,
            settings.discovery_retry,
        );
        let session_state = Arc::new(Mutex::new(SessionState::Disconnected));
        {
            let session_state = session_state.clone();
            let events = events.clone();
            connection.set_observer(Arc::new(move |state| {
                let mapped = match state {
                    ConnectionState::Disconnected => SessionState::Disconnected,
                    ConnectionState::Connecting => SessionState::Connecting,
                    ConnectionState::DiscoveringServices => SessionState::DiscoveringServices,
                    ConnectionState::Disconnecting => SessionState::Disconnecting,
                    // the orchestrator moves on to StartingSubsystems itself
                    ConnectionState::Connected => return,
                };
                publish_state(&session_state, &events, mapped);
            }));
        }

        let watchdog = Arc::new(Watchdog::new(
            config.watchdog.stale_after(),
            config.watchdog.check_interval(),
            events.clone(),
        ));

        Ok(Self {
            transport,
            registry,
            connection,
            subsystems,
            timestamp,
            device_config,
            watchdog,
            events,
            settings,
            session_state,
            failed: Mutex::new(Vec::new()),
            op_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Scans for nearby boards, strongest signal first.
    pub async fn scan(&self) -> Result<Vec<DeviceIdentity>, DeviceError> {
        info!("Scanning for {} s...", self.settings.scan_duration_secs);
        let mut devices = self.transport.scan(self.settings.scan_duration()).await?;
        devices.sort_by(|a, b| b.rssi.cmp(&a.rssi));
        info!("Scan found {} device(s)", devices.len());
        Ok(devices)
    }

    /// Connects to `identity` and starts every subsystem.
    ///
    /// Fails if the link cannot be established or any critical subsystem does
    /// not start; in both cases the session is fully torn down again.
    /// Best-effort failures are listed in the report.
    pub async fn connect(&self, identity: &DeviceIdentity) -> Result<ConnectReport, DeviceError> {
        let _guard = self.op_lock.lock().await;

        let session = self.connection.connect(identity).await?;
        let profile = self.connection.load_profile(&self.registry).await;

        self.set_state(SessionState::StartingSubsystems);
        sleep(self.settings.settle_delay()).await;

        let mut failed = Vec::new();
        for (index, subsystem) in self.subsystems.iter().enumerate() {
            if index > 0 {
                sleep(self.settings.inter_subsystem_delay()).await;
            }
            if !self.start_subsystem(subsystem, &session).await {
                failed.push(subsystem.spec.name.to_string());
            }
        }

        match self.timestamp.read_once(&session).await {
            Ok(value) => {
                if let Value::Timestamp(stamp) = &value {
                    info!("Device clock: {}", stamp.formatted());
                }
                self.events.on_value_changed(SUBSYSTEM_TIMESTAMP, value);
            }
            Err(e) => warn!("Could not read device timestamp: {}", e),
        }

        *lock(&self.failed) = failed.clone();

        let critical: Vec<String> = failed
            .iter()
            .filter(|name| self.is_critical(name))
            .cloned()
            .collect();
        if !critical.is_empty() {
            error!(
                "Critical subsystem(s) failed: {}; tearing the session down",
                critical.join(", ")
            );
            self.cleanup().await;
            if let Err(e) = self.connection.disconnect().await {
                warn!("Disconnect after failed startup reported: {}", e);
            }
            self.set_state(SessionState::Disconnected);
            return Err(DeviceError::CriticalSubsystemFailure { failed: critical });
        }

        if failed.is_empty() {
            info!("All subsystems started");
        } else {
            warn!("Running degraded, unavailable: {}", failed.join(", "));
        }
        self.set_state(SessionState::Ready);

        Ok(ConnectReport {
            device: identity.clone(),
            profile,
            degraded: failed,
        })
    }

    /// Stops every subsystem and closes the session. Always ends `Disconnected`.
    /// Waits for an in-flight connect to settle first.
    pub async fn disconnect(&self) -> Result<(), DeviceError> {
        let _guard = self.op_lock.lock().await;

        if self.connection.state() == ConnectionState::Disconnected {
            self.set_state(SessionState::Disconnected);
            return Err(DeviceError::NotConnected);
        }

        self.set_state(SessionState::Disconnecting);
        self.cleanup().await;
        let result = self.connection.disconnect().await;
        lock(&self.failed).clear();
        self.set_state(SessionState::Disconnected);

        result.map_err(DeviceError::from)
    }

    /// Disconnects if needed, then connects to the last device again.
    pub async fn reconnect(&self) -> Result<ConnectReport, DeviceError> {
        let identity = self
            .connection
            .last_identity()
            .ok_or(DeviceError::NoPreviousDevice)?;

        info!("Reconnecting to {}...", identity.address);
        match self.disconnect().await {
            Ok(()) | Err(DeviceError::NotConnected) => {}
            Err(e) => warn!("Disconnect before reconnect reported: {}", e),
        }
        self.connect(&identity).await
    }

    /// Stops every channel in reverse priority order, ignoring failures, then
    /// clears all last-known values and disarms the watchdog.
    pub async fn cleanup(&self) {
        info!("Stopping all subsystems...");
        for subsystem in self.subsystems.iter().rev() {
            for channel in subsystem.channels.iter().rev() {
                if let Err(e) = channel.stop().await {
                    warn!(
                        "Ignoring stop failure for {} in {}: {}",
                        channel.descriptor().name,
                        subsystem.spec.name,
                        e
                    );
                }
                channel.clear();
            }
            if subsystem.available.swap(false, Ordering::SeqCst) {
                self.events.on_availability(subsystem.spec.name, false);
            }
            self.events.on_cleared(subsystem.spec.name);
        }
        self.timestamp.clear();
        self.events.on_cleared(SUBSYSTEM_TIMESTAMP);
        self.watchdog.disarm();
    }

    /// The configuration blob exactly as the board reports it. Only the
    /// length is checked; use [`Self::read_device_config`] for the typed view.
    pub async fn read_config(&self) -> Result<[u8; 15], DeviceError> {
        let session = self.session()?;
        let raw = self.transport.read(&session, UUID_DEVICE_CONFIG).await?;
        <[u8; 15]>::try_from(raw.as_slice()).map_err(|_| {
            DeviceError::from(DecodeError::LengthMismatch {
                expected: DeviceConfig::LEN,
                actual: raw.len(),
            })
        })
    }

    /// Writes the whole configuration blob as given. Callers change single
    /// fields by reading first and preserving the other bytes.
    pub async fn write_config(&self, bytes: [u8; 15]) -> Result<(), DeviceError> {
        let session = self.session()?;
        info!("Writing device config: {:?}", bytes);
        self.transport
            .write(&session, UUID_DEVICE_CONFIG, &bytes)
            .await?;
        Ok(())
    }

    pub async fn read_device_config(&self) -> Result<DeviceConfig, DeviceError> {
        let session = self.session()?;
        match self.device_config.read_once(&session).await? {
            Value::DeviceConfig(config) => Ok(config),
            other => Err(unexpected("device config", "a configuration blob", &other)),
        }
    }

    pub async fn write_device_config(&self, config: &DeviceConfig) -> Result<(), DeviceError> {
        let session = self.session()?;
        info!("Writing device config: {:?}", config.to_array());
        self.device_config
            .write(&session, &Value::DeviceConfig(*config))
            .await?;
        Ok(())
    }

    pub async fn read_timestamp(&self) -> Result<DeviceTimestamp, DeviceError> {
        let session = self.session()?;
        match self.timestamp.read_once(&session).await? {
            Value::Timestamp(stamp) => Ok(stamp),
            other => Err(unexpected("timestamp", "a timestamp", &other)),
        }
    }

    /// Sets the board clock to the host's time and returns what the board reports back.
    pub async fn sync_clock(&self) -> Result<DeviceTimestamp, DeviceError> {
        let session = self.session()?;
        let now = DeviceTimestamp::now();
        self.timestamp
            .write(&session, &Value::Timestamp(now))
            .await?;
        let stamp = self.read_timestamp().await?;
        info!("Device clock set to {}", stamp.formatted());
        self.events
            .on_value_changed(SUBSYSTEM_TIMESTAMP, Value::Timestamp(stamp));
        Ok(stamp)
    }

    /// Reads and decodes any registered characteristic once.
    pub async fn read_characteristic(&self, uuid: Uuid) -> Result<Value, DeviceError> {
        let descriptor = self
            .registry
            .get(&uuid)
            .ok_or(DeviceError::UnknownCharacteristic(uuid))?;
        let session = self.session()?;
        let raw = self.transport.read(&session, uuid).await?;
        Ok(descriptor.decode(&raw)?)
    }

    pub fn session_state(&self) -> SessionState {
        *lock(&self.session_state)
    }

    pub fn profile(&self) -> DeviceProfile {
        self.connection.profile()
    }

    pub fn connected_device(&self) -> Option<DeviceIdentity> {
        match self.connection.state() {
            ConnectionState::Connected => self.connection.last_identity(),
            _ => None,
        }
    }

    /// Subsystems that failed during the last connect
    pub fn failed_subsystems(&self) -> Vec<String> {
        lock(&self.failed).clone()
    }

    pub fn is_available(&self, subsystem: &str) -> bool {
        self.subsystems
            .iter()
            .any(|s| s.spec.name == subsystem && s.available.load(Ordering::SeqCst))
    }

    pub fn subsystem_names(&self) -> Vec<&'static str> {
        self.subsystems.iter().map(|s| s.spec.name).collect()
    }

    /// Subscription state of every subsystem channel
    pub fn channel_states(&self) -> Vec<(Uuid, SubscriptionState)> {
        self.subsystems
            .iter()
            .flat_map(|s| s.channels.iter())
            .map(|c| (c.uuid(), c.state()))
            .collect()
    }

    pub fn is_stale(&self) -> bool {
        self.watchdog.is_stale()
    }

    /// Starts all channels of one subsystem; on any failure the ones that did
    /// start are stopped again so the subsystem stays silent.
    async fn start_subsystem(&self, subsystem: &Subsystem, session: &SessionHandle) -> bool {
        info!("Starting subsystem {}", subsystem.spec.name);

        let mut started = true;
        for channel in &subsystem.channels {
            let handler = self.value_handler(&subsystem.spec, channel.uuid());
            if channel.start(session, handler).await != SubscriptionState::Subscribed {
                started = false;
                break;
            }
        }

        if !started {
            for channel in &subsystem.channels {
                if let Err(e) = channel.stop().await {
                    warn!("Ignoring stop failure for {}: {}", channel.descriptor().name, e);
                }
            }
            let level = if subsystem.spec.critical {
                log::Level::Error
            } else {
                log::Level::Warn
            };
            log::log!(level, "Subsystem {} failed to start", subsystem.spec.name);
        }

        subsystem.available.store(started, Ordering::SeqCst);
        self.events.on_availability(subsystem.spec.name, started);
        started
    }

    fn value_handler(&self, spec: &SubsystemSpec, uuid: Uuid) -> ValueHandler {
        let events = self.events.clone();
        let name = spec.name;
        let watchdog = (spec.heartbeat == Some(uuid)).then(|| self.watchdog.clone());
        Arc::new(move |value| {
            if let Some(watchdog) = &watchdog {
                watchdog.heartbeat();
            }
            events.on_value_changed(name, value);
        })
    }

    fn is_critical(&self, name: &str) -> bool {
        self.subsystems
            .iter()
            .any(|s| s.spec.name == name && s.spec.critical)
    }

    fn session(&self) -> Result<SessionHandle, DeviceError> {
        self.connection.session().ok_or(DeviceError::NotConnected)
    }

    fn set_state(&self, state: SessionState) {
        publish_state(&self.session_state, &self.events, state);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn publish_state(current: &Mutex<SessionState>, events: &EventSink, state: SessionState) {
    {
        let mut current = lock(current);
        if *current == state {
            return;
        }
        *current = state;
    }
    info!("Session state: {}", state);
    events.on_status_changed(state);
}

fn unexpected(name: &'static str, expected: &'static str, actual: &Value) -> DeviceError {
    DeviceError::UnexpectedValue {
        name,
        expected,
        actual: format!("{:?}", actual),
    }
}
