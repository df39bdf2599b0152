//! In-memory transport for tests and simulated boards (`mock` feature)
//! Behaves like a single sensor board; failures are scripted per operation.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::debug;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::core::bluetooth::constants::*;
use crate::core::bluetooth::transport::{RawStream, Transport, TransportError};
use crate::core::bluetooth::types::{DeviceIdentity, SessionHandle};

/// Address of the board created by [`MockTransport::with_board`]
pub const MOCK_BOARD_ADDRESS: &str = "AA:BB:CC:DD:EE:01";
pub const MOCK_BOARD_NAME: &str = "SensorBoard";

/// Remaining failures for one scripted operation; `u32::MAX` never runs out.
fn take_failure(remaining: &mut u32) -> bool {
    match *remaining {
        0 => false,
        u32::MAX => true,
        _ => {
            *remaining -= 1;
            true
        }
    }
}

#[derive(Default)]
struct MockState {
    devices: Vec<DeviceIdentity>,
    characteristics: HashSet<Uuid>,
    values: HashMap<Uuid, Vec<u8>>,
    open_failures: u32,
    empty_discoveries: u32,
    subscribe_failures: HashMap<Uuid, u32>,
    fail_cleanup: bool,
    next_session: u64,
    sessions: HashSet<u64>,
    subscriptions: HashMap<Uuid, mpsc::UnboundedSender<Vec<u8>>>,
    subscribe_attempts: HashMap<Uuid, u32>,
    calls: HashMap<&'static str, u32>,
}

#[derive(Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
}

impl MockTransport {
    /// A transport with no devices and no characteristics.
    pub fn new() -> Self {
        Self::default()
    }

    /// One sensor board exposing every known characteristic with idle values.
    pub fn with_board() -> Self {
        let mock = Self::new();
        mock.add_device(DeviceIdentity::new(MOCK_BOARD_ADDRESS, MOCK_BOARD_NAME, -55));

        let values: [(Uuid, Vec<u8>); 17] = [
            (UUID_MANUFACTURER_NAME, b"Open Sensor Lab".to_vec()),
            (UUID_MODEL_NUMBER, b"SB-2\0".to_vec()),
            (UUID_FIRMWARE_REVISION, b"2.4.1".to_vec()),
            (UUID_HARDWARE_REVISION, b"rev C".to_vec()),
            (UUID_IMU1_VECTOR, vec![0; 18]),
            (UUID_IMU2_VECTOR, vec![0; 18]),
            (UUID_IMU1_EULER, vec![0; 13]),
            (UUID_IMU2_EULER, vec![0; 13]),
            (UUID_TIMESTAMP, 1_700_000_000u64.to_le_bytes().to_vec()),
            (UUID_BATTERY_LEVEL, vec![87]),
            (UUID_CHARGE_STATE, vec![0]),
            (UUID_OVERALL_STATUS, vec![0, 3, 3, 3]),
            (UUID_FLEX_SENSOR, vec![0; 20]),
            (UUID_FORCE_SENSOR, vec![0; 4]),
            (UUID_JOYSTICK, vec![0; 5]),
            (UUID_BUTTONS, vec![0; 4]),
            (UUID_DEVICE_CONFIG, vec![0, 1, 0, 3, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]),
        ];
        {
            let mut state = mock.lock();
            for (uuid, value) in values {
                state.characteristics.insert(uuid);
                state.values.insert(uuid, value);
            }
        }
        mock
    }

    pub fn board_identity(&self) -> DeviceIdentity {
        DeviceIdentity::new(MOCK_BOARD_ADDRESS, MOCK_BOARD_NAME, -55)
    }

    pub fn add_device(&self, identity: DeviceIdentity) {
        self.lock().devices.push(identity);
    }

    pub fn add_characteristic(&self, uuid: Uuid, value: Vec<u8>) {
        let mut state = self.lock();
        state.characteristics.insert(uuid);
        state.values.insert(uuid, value);
    }

    pub fn remove_characteristic(&self, uuid: Uuid) {
        let mut state = self.lock();
        state.characteristics.remove(&uuid);
        state.values.remove(&uuid);
    }

    pub fn set_value(&self, uuid: Uuid, value: Vec<u8>) {
        self.lock().values.insert(uuid, value);
    }

    pub fn value(&self, uuid: Uuid) -> Option<Vec<u8>> {
        self.lock().values.get(&uuid).cloned()
    }

    /// The next `count` opens fail with a retryable error
    pub fn fail_opens(&self, count: u32) {
        self.lock().open_failures = count;
    }

    /// The next `count` discoveries report no characteristics
    pub fn empty_discoveries(&self, count: u32) {
        self.lock().empty_discoveries = count;
    }

    /// The next `count` subscriptions to `uuid` are refused
    pub fn fail_subscribe(&self, uuid: Uuid, count: u32) {
        self.lock().subscribe_failures.insert(uuid, count);
    }

    /// Makes unsubscribe and close fail with a backend error
    pub fn fail_cleanup(&self, fail: bool) {
        self.lock().fail_cleanup = fail;
    }

    /// Delivers a notification on a live subscription. Returns false when
    /// nobody is subscribed to `uuid`.
    pub fn push(&self, uuid: Uuid, data: Vec<u8>) -> bool {
        let state = self.lock();
        match state.subscriptions.get(&uuid) {
            Some(tx) => tx.send(data).is_ok(),
            None => false,
        }
    }

    pub fn is_subscribed(&self, uuid: Uuid) -> bool {
        self.lock().subscriptions.contains_key(&uuid)
    }

    pub fn subscribed(&self) -> Vec<Uuid> {
        self.lock().subscriptions.keys().copied().collect()
    }

    pub fn subscribe_attempts(&self, uuid: Uuid) -> u32 {
        self.lock().subscribe_attempts.get(&uuid).copied().unwrap_or(0)
    }

    /// Number of calls made to the named transport operation
    pub fn calls(&self, operation: &str) -> u32 {
        self.lock().calls.get(operation).copied().unwrap_or(0)
    }

    pub fn open_sessions(&self) -> usize {
        self.lock().sessions.len()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Counts the call and checks the session is open.
    fn enter(
        &self,
        operation: &'static str,
        session: &SessionHandle,
    ) -> Result<MutexGuard<'_, MockState>, TransportError> {
        let mut state = self.lock();
        *state.calls.entry(operation).or_default() += 1;
        if !state.sessions.contains(&session.id) {
            return Err(TransportError::UnknownSession(session.id));
        }
        Ok(state)
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn scan(&self, _duration: Duration) -> Result<Vec<DeviceIdentity>, TransportError> {
        let mut state = self.lock();
        *state.calls.entry("scan").or_default() += 1;
        Ok(state.devices.clone())
    }

    async fn open(&self, address: &str) -> Result<SessionHandle, TransportError> {
        let mut state = self.lock();
        *state.calls.entry("open").or_default() += 1;
        if take_failure(&mut state.open_failures) {
            return Err(TransportError::Backend("connection refused".into()));
        }
        if !state.devices.iter().any(|d| d.address == address) {
            return Err(TransportError::DeviceNotFound(address.to_string()));
        }
        state.next_session += 1;
        let id = state.next_session;
        state.sessions.insert(id);
        debug!("Mock session {} opened to {}", id, address);
        Ok(SessionHandle {
            id,
            address: address.to_string(),
        })
    }

    async fn discover_services(
        &self,
        session: &SessionHandle,
    ) -> Result<HashSet<Uuid>, TransportError> {
        let mut state = self.enter("discover_services", session)?;
        if take_failure(&mut state.empty_discoveries) {
            return Ok(HashSet::new());
        }
        Ok(state.characteristics.clone())
    }

    async fn read(&self, session: &SessionHandle, uuid: Uuid) -> Result<Vec<u8>, TransportError> {
        let state = self.enter("read", session)?;
        if !state.characteristics.contains(&uuid) {
            return Err(TransportError::CharacteristicNotFound(uuid));
        }
        state
            .values
            .get(&uuid)
            .cloned()
            .ok_or_else(|| TransportError::Backend(format!("{} has no value", uuid)))
    }

    async fn write(
        &self,
        session: &SessionHandle,
        uuid: Uuid,
        data: &[u8],
    ) -> Result<(), TransportError> {
        let mut state = self.enter("write", session)?;
        if !state.characteristics.contains(&uuid) {
            return Err(TransportError::CharacteristicNotFound(uuid));
        }
        state.values.insert(uuid, data.to_vec());
        Ok(())
    }

    async fn subscribe(
        &self,
        session: &SessionHandle,
        uuid: Uuid,
    ) -> Result<RawStream, TransportError> {
        let mut state = self.enter("subscribe", session)?;
        *state.subscribe_attempts.entry(uuid).or_default() += 1;
        if !state.characteristics.contains(&uuid) {
            return Err(TransportError::CharacteristicNotFound(uuid));
        }
        if let Some(remaining) = state.subscribe_failures.get_mut(&uuid) {
            if take_failure(remaining) {
                return Err(TransportError::Backend("subscription refused".into()));
            }
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.subscriptions.insert(uuid, tx);
        Ok(rx)
    }

    async fn unsubscribe(&self, session: &SessionHandle, uuid: Uuid) -> Result<(), TransportError> {
        let mut state = self.enter("unsubscribe", session)?;
        if state.fail_cleanup {
            return Err(TransportError::Backend("unsubscribe failed".into()));
        }
        match state.subscriptions.remove(&uuid) {
            Some(_) => Ok(()),
            None => Err(TransportError::NotSubscribed(uuid)),
        }
    }

    async fn close(&self, session: &SessionHandle) -> Result<(), TransportError> {
        let mut state = self.lock();
        *state.calls.entry("close").or_default() += 1;
        if state.fail_cleanup {
            return Err(TransportError::Backend("close failed".into()));
        }
        if !state.sessions.remove(&session.id) {
            return Err(TransportError::AlreadyDisconnected);
        }
        // dropping the senders ends every notification stream
        state.subscriptions.clear();
        Ok(())
    }
}
