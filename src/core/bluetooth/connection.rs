//! Connection state machine for the sensor board
//! This module opens the transport session, waits for service discovery and
//! tears the session down again.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, error, info, warn};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::core::bluetooth::constants::{
    UUID_FIRMWARE_REVISION, UUID_HARDWARE_REVISION, UUID_MANUFACTURER_NAME, UUID_MODEL_NUMBER,
};
use crate::core::bluetooth::retry::{RetryExhausted, RetryPolicy};
use crate::core::bluetooth::transport::{Transport, TransportError};
use crate::core::bluetooth::types::{DeviceIdentity, DeviceProfile, SessionHandle};
use crate::core::codec::{CodecRegistry, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    DiscoveringServices,
    Connected,
    Disconnecting,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("cannot connect while {0:?}")]
    InvalidState(ConnectionState),

    #[error("no device connected")]
    NotConnected,

    #[error(transparent)]
    Exhausted(#[from] RetryExhausted),
}

/// Called after every state change, outside of any lock.
pub type StateObserver = Arc<dyn Fn(ConnectionState) + Send + Sync>;

#[derive(Default)]
struct Inner {
    state: ConnectionState,
    session: Option<SessionHandle>,
    identity: Option<DeviceIdentity>,
    profile: DeviceProfile,
    services: HashSet<Uuid>,
}

/// Connection manager for the sensor board
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    open_retry: RetryPolicy,
    discovery_retry: RetryPolicy,
    /// Serializes connect/disconnect; a disconnect waits for an in-flight connect
    op_lock: tokio::sync::Mutex<()>,
    inner: Mutex<Inner>,
    observer: Mutex<Option<StateObserver>>,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        open_retry: RetryPolicy,
        discovery_retry: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            open_retry,
            discovery_retry,
            op_lock: tokio::sync::Mutex::new(()),
            inner: Mutex::new(Inner::default()),
            observer: Mutex::new(None),
        }
    }

    pub fn set_observer(&self, observer: StateObserver) {
        *self
            .observer
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(observer);
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    /// The open session, once services are discovered
    pub fn session(&self) -> Option<SessionHandle> {
        let inner = self.lock();
        match inner.state {
            ConnectionState::Connected => inner.session.clone(),
            _ => None,
        }
    }

    /// The device of the current session, or of the last one attempted
    pub fn last_identity(&self) -> Option<DeviceIdentity> {
        self.lock().identity.clone()
    }

    pub fn profile(&self) -> DeviceProfile {
        self.lock().profile.clone()
    }

    pub fn has_characteristic(&self, uuid: &Uuid) -> bool {
        self.lock().services.contains(uuid)
    }

    /// Opens a session to `identity` and waits until its services are enumerated.
    ///
    /// Rejected without any state change unless the machine is `Disconnected`.
    /// On failure the machine is back in `Disconnected`.
    pub async fn connect(&self, identity: &DeviceIdentity) -> Result<SessionHandle, ConnectionError> {
        let current = self.state();
        if current != ConnectionState::Disconnected {
            return Err(ConnectionError::InvalidState(current));
        }

        let _guard = self.op_lock.lock().await;
        {
            let mut inner = self.lock();
            if inner.state != ConnectionState::Disconnected {
                return Err(ConnectionError::InvalidState(inner.state));
            }
            inner.identity = Some(identity.clone());
        }

        info!(
            "Connecting to {} ({})...",
            identity.name, identity.address
        );
        self.set_state(ConnectionState::Connecting);
        let mut pending = PendingConnect {
            connection: self,
            session: None,
            armed: true,
        };

        let session = match self
            .open_retry
            .run("open", move |_| self.transport.open(&identity.address))
            .await
        {
            Ok(session) => session,
            Err(e) => {
                error!("Failed to connect to {}: {}", identity.address, e);
                pending.settle();
                self.set_state(ConnectionState::Disconnected);
                return Err(e.into());
            }
        };

        info!("Connection successful, discovering services...");
        self.lock().session = Some(session.clone());
        pending.session = Some(session.clone());
        self.set_state(ConnectionState::DiscoveringServices);

        let session_ref = &session;
        let discovered = self
            .discovery_retry
            .run("service discovery", move |_| async move {
                let found = self.transport.discover_services(session_ref).await?;
                if found.is_empty() {
                    // the stack reports the link before GATT discovery has finished
                    return Err(TransportError::ServicesNotReady);
                }
                Ok(found)
            })
            .await;
        pending.settle();

        let services = match discovered {
            Ok(services) => services,
            Err(e) => {
                error!("Service discovery failed: {}", e);
                self.close_quietly(&session).await;
                self.lock().session = None;
                self.set_state(ConnectionState::Disconnected);
                return Err(e.into());
            }
        };

        info!("Discovered {} characteristics", services.len());
        self.lock().services = services;
        self.set_state(ConnectionState::Connected);
        Ok(session)
    }

    /// Closes the session. Always ends in `Disconnected`, whether or not the
    /// transport managed to close.
    pub async fn disconnect(&self) -> Result<(), ConnectionError> {
        let _guard = self.op_lock.lock().await;

        let session = {
            let inner = self.lock();
            if inner.state == ConnectionState::Disconnected {
                info!("Disconnect requested but no device is connected");
                return Err(ConnectionError::NotConnected);
            }
            inner.session.clone()
        };

        self.set_state(ConnectionState::Disconnecting);
        if let Some(session) = session {
            info!("Disconnecting from device {}", session.address);
            self.close_quietly(&session).await;
        }

        {
            let mut inner = self.lock();
            inner.session = None;
            inner.services.clear();
            inner.profile = DeviceProfile::default();
        }
        self.set_state(ConnectionState::Disconnected);
        info!("Successfully disconnected");
        Ok(())
    }

    /// Reads whichever Device Information strings the board exposes.
    /// Missing or unreadable fields stay `None`.
    pub async fn load_profile(&self, registry: &CodecRegistry) -> DeviceProfile {
        let Some(session) = self.session() else {
            return DeviceProfile::default();
        };

        let mut profile = DeviceProfile::default();
        for (uuid, field) in [
            (UUID_MANUFACTURER_NAME, &mut profile.manufacturer),
            (UUID_MODEL_NUMBER, &mut profile.model),
            (UUID_FIRMWARE_REVISION, &mut profile.firmware),
            (UUID_HARDWARE_REVISION, &mut profile.hardware_revision),
        ] {
            if !self.has_characteristic(&uuid) {
                continue;
            }
            match self.transport.read(&session, uuid).await {
                Ok(bytes) => match registry.decode(&uuid, &bytes) {
                    Ok(Value::Text(text)) => *field = Some(text),
                    Ok(other) => debug!("Unexpected value for {}: {:?}", uuid, other),
                    Err(e) => warn!("Could not decode {}: {}", uuid, e),
                },
                Err(e) => warn!("Could not read {}: {}", uuid, e),
            }
        }

        info!("Device profile: {:?}", profile);
        self.lock().profile = profile.clone();
        profile
    }

    async fn close_quietly(&self, session: &SessionHandle) {
        match self.transport.close(session).await {
            Ok(()) => {}
            Err(e) if e.is_already_released() => debug!("Session already closed: {}", e),
            Err(e) => warn!("Failed to close session {}: {}", session.id, e),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = std::mem::replace(&mut self.lock().state, state);
        if previous != state {
            debug!("Connection state {:?} -> {:?}", previous, state);
        }
        let observer = self
            .observer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(observer) = observer {
            observer(state);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Undoes a connect whose future was dropped before it finished: the
/// machine goes back to `Disconnected` and an opened session is closed.
struct PendingConnect<'a> {
    connection: &'a ConnectionManager,
    session: Option<SessionHandle>,
    armed: bool,
}

impl PendingConnect<'_> {
    /// The connect reached an outcome of its own.
    fn settle(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingConnect<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!("Connect abandoned, resetting to disconnected");

        {
            let mut inner = self.connection.lock();
            inner.session = None;
            inner.services.clear();
        }
        if let Some(session) = self.session.take() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let transport = self.connection.transport.clone();
                    handle.spawn(async move {
                        if let Err(e) = transport.close(&session).await {
                            debug!("Closing abandoned session {}: {}", session.id, e);
                        }
                    });
                }
                Err(_) => error!("No runtime left to close session {}", session.id),
            }
        }
        self.connection.set_state(ConnectionState::Disconnected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::core::bluetooth::constants::{UUID_IMU1_VECTOR, UUID_MODEL_NUMBER};
    use crate::core::bluetooth::mock::MockTransport;

    fn manager(mock: &Arc<MockTransport>) -> ConnectionManager {
        ConnectionManager::new(
            mock.clone(),
            RetryPolicy::new(5, 1000),
            RetryPolicy::new(5, 500),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn connects_after_transient_open_failures() {
        let mock = Arc::new(MockTransport::with_board());
        mock.fail_opens(2);
        let connection = manager(&mock);

        let session = connection.connect(&mock.board_identity()).await.unwrap();
        assert_eq!(connection.state(), ConnectionState::Connected);
        assert_eq!(connection.session(), Some(session));
        assert_eq!(mock.calls("open"), 3);
        assert!(connection.has_characteristic(&UUID_IMU1_VECTOR));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_open_budget_returns_to_disconnected() {
        let mock = Arc::new(MockTransport::with_board());
        mock.fail_opens(u32::MAX);
        let connection = manager(&mock);

        let err = connection.connect(&mock.board_identity()).await.unwrap_err();
        match err {
            ConnectionError::Exhausted(e) => assert_eq!(e.attempts, 5),
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(mock.calls("open"), 5);
        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_late_service_discovery() {
        let mock = Arc::new(MockTransport::with_board());
        mock.empty_discoveries(3);
        let connection = manager(&mock);

        connection.connect(&mock.board_identity()).await.unwrap();
        assert_eq!(mock.calls("discover_services"), 4);
        assert_eq!(connection.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_discovery_closes_the_session() {
        let mock = Arc::new(MockTransport::with_board());
        mock.empty_discoveries(u32::MAX);
        let connection = manager(&mock);

        assert!(connection.connect(&mock.board_identity()).await.is_err());
        assert_eq!(mock.calls("discover_services"), 5);
        assert_eq!(mock.calls("close"), 1);
        assert_eq!(mock.open_sessions(), 0);
        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_connect_closes_its_session() {
        let mock = Arc::new(MockTransport::with_board());
        mock.empty_discoveries(u32::MAX);
        let connection = manager(&mock);

        let attempt = tokio::time::timeout(
            Duration::from_millis(700),
            connection.connect(&mock.board_identity()),
        )
        .await;
        assert!(attempt.is_err());

        // the close runs on a spawned task
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(connection.state(), ConnectionState::Disconnected);
        assert_eq!(connection.session(), None);
        assert_eq!(mock.calls("close"), 1);
        assert_eq!(mock.open_sessions(), 0);

        mock.empty_discoveries(0);
        connection.connect(&mock.board_identity()).await.unwrap();
        assert_eq!(connection.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_abandoned_while_opening_resets_state() {
        let mock = Arc::new(MockTransport::with_board());
        mock.fail_opens(u32::MAX);
        let connection = manager(&mock);

        let attempt = tokio::time::timeout(
            Duration::from_millis(1500),
            connection.connect(&mock.board_identity()),
        )
        .await;
        assert!(attempt.is_err());
        assert_eq!(mock.calls("open"), 2);
        assert_eq!(connection.state(), ConnectionState::Disconnected);
        assert_eq!(mock.calls("close"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn session_is_hidden_until_connected() {
        let mock = Arc::new(MockTransport::with_board());
        mock.empty_discoveries(u32::MAX);
        let connection = Arc::new(manager(&mock));

        let task = {
            let connection = connection.clone();
            let identity = mock.board_identity();
            tokio::spawn(async move { connection.connect(&identity).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(connection.state(), ConnectionState::DiscoveringServices);
        assert_eq!(connection.session(), None);

        assert!(task.await.unwrap().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn second_connect_is_rejected() {
        let mock = Arc::new(MockTransport::with_board());
        let connection = manager(&mock);
        connection.connect(&mock.board_identity()).await.unwrap();

        let err = connection.connect(&mock.board_identity()).await.unwrap_err();
        assert_eq!(err, ConnectionError::InvalidState(ConnectionState::Connected));
        assert_eq!(mock.calls("open"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_survives_close_failure() {
        let mock = Arc::new(MockTransport::with_board());
        let connection = manager(&mock);
        connection.connect(&mock.board_identity()).await.unwrap();
        connection.load_profile(&CodecRegistry::standard()).await;

        mock.fail_cleanup(true);
        connection.disconnect().await.unwrap();
        assert_eq!(connection.state(), ConnectionState::Disconnected);
        assert_eq!(connection.session(), None);
        assert_eq!(connection.profile(), DeviceProfile::default());

        assert_eq!(
            connection.disconnect().await,
            Err(ConnectionError::NotConnected)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn profile_skips_missing_fields() {
        let mock = Arc::new(MockTransport::with_board());
        mock.remove_characteristic(UUID_MODEL_NUMBER);
        let connection = manager(&mock);
        connection.connect(&mock.board_identity()).await.unwrap();

        let profile = connection.load_profile(&CodecRegistry::standard()).await;
        assert!(profile.manufacturer.is_some());
        assert_eq!(profile.model, None);
        assert_eq!(connection.profile(), profile);
    }

    #[tokio::test(start_paused = true)]
    async fn observer_sees_every_transition() {
        let mock = Arc::new(MockTransport::with_board());
        let connection = manager(&mock);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        connection.set_observer(Arc::new(move |state| sink.lock().unwrap().push(state)));

        connection.connect(&mock.board_identity()).await.unwrap();
        connection.disconnect().await.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ConnectionState::Connecting,
                ConnectionState::DiscoveringServices,
                ConnectionState::Connected,
                ConnectionState::Disconnecting,
                ConnectionState::Disconnected,
            ]
        );
    }
}
