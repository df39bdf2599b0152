//! Characteristic channels
//! One channel owns the subscribe/read/write relationship with a single
//! characteristic. Raw notifications are decoded on a dispatch task and
//! handed to the registered handler.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, error, info, warn};
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::bluetooth::retry::RetryPolicy;
use crate::core::bluetooth::transport::{RawStream, Transport, TransportError};
use crate::core::bluetooth::types::SessionHandle;
use crate::core::codec::{CharacteristicDescriptor, DecodeError, EncodeError, Value};
use crate::utils::to_hex_string;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    #[default]
    Unsubscribed,
    Subscribing,
    Subscribed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("characteristic {0} is read-only")]
    ReadOnly(Uuid),
}

/// Receives every successfully decoded notification. Must not block.
pub type ValueHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Latest data seen on a channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelSnapshot {
    pub last_value: Option<Value>,
    /// Last raw payload, kept even when it failed to decode
    pub last_raw: Option<Vec<u8>>,
}

#[derive(Default)]
struct ChannelInner {
    session: Option<SessionHandle>,
    cancel: Option<CancellationToken>,
    dispatch: Option<JoinHandle<()>>,
}

pub struct CharacteristicChannel {
    descriptor: CharacteristicDescriptor,
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    /// Held for the whole of start/stop so transitions never overlap
    inner: tokio::sync::Mutex<ChannelInner>,
    state: Mutex<SubscriptionState>,
    snapshot: Arc<Mutex<ChannelSnapshot>>,
}

impl CharacteristicChannel {
    pub fn new(
        descriptor: CharacteristicDescriptor,
        transport: Arc<dyn Transport>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            descriptor,
            transport,
            retry,
            inner: tokio::sync::Mutex::new(ChannelInner::default()),
            state: Mutex::new(SubscriptionState::Unsubscribed),
            snapshot: Arc::new(Mutex::new(ChannelSnapshot::default())),
        }
    }

    pub fn descriptor(&self) -> &CharacteristicDescriptor {
        &self.descriptor
    }

    pub fn uuid(&self) -> Uuid {
        self.descriptor.uuid
    }

    pub fn state(&self) -> SubscriptionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> ChannelSnapshot {
        lock_snapshot(&self.snapshot).clone()
    }

    /// Forgets the last value and raw payload.
    pub fn clear(&self) {
        *lock_snapshot(&self.snapshot) = ChannelSnapshot::default();
    }

    /// Subscribes and starts dispatching decoded values to `handler`.
    ///
    /// Does nothing unless the channel is `Unsubscribed`; returns the state
    /// the channel is in afterwards.
    pub async fn start(&self, session: &SessionHandle, handler: ValueHandler) -> SubscriptionState {
        let mut inner = self.inner.lock().await;

        let current = self.state();
        if current != SubscriptionState::Unsubscribed {
            debug!("{} already {:?}, not subscribing again", self.descriptor.name, current);
            return current;
        }

        self.set_state(SubscriptionState::Subscribing);
        let transport = &self.transport;
        let uuid = self.descriptor.uuid;
        let operation = format!("subscribe to {}", self.descriptor.name);

        match self
            .retry
            .run(&operation, move |_| transport.subscribe(session, uuid))
            .await
        {
            Ok(stream) => {
                let cancel = CancellationToken::new();
                let handle = tokio::spawn(dispatch(
                    self.descriptor,
                    stream,
                    handler,
                    self.snapshot.clone(),
                    cancel.clone(),
                ));
                inner.session = Some(session.clone());
                inner.cancel = Some(cancel);
                inner.dispatch = Some(handle);
                self.set_state(SubscriptionState::Subscribed);
                info!("Subscribed to {}", self.descriptor.name);
            }
            Err(e) => {
                error!("Giving up on {}: {}", self.descriptor.name, e);
                self.set_state(SubscriptionState::Failed);
            }
        }

        self.state()
    }

    /// Stops dispatching and unsubscribes. The channel ends `Unsubscribed`
    /// whatever happens; a transport error is still returned for logging.
    pub async fn stop(&self) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().await;

        if let Some(cancel) = inner.cancel.take() {
            cancel.cancel();
        }
        if let Some(handle) = inner.dispatch.take() {
            if let Err(e) = handle.await {
                error!("Dispatch task for {} ended abnormally: {}", self.descriptor.name, e);
            }
        }

        let result = match inner.session.take() {
            Some(session) => match self.transport.unsubscribe(&session, self.descriptor.uuid).await {
                Ok(()) => Ok(()),
                Err(e) if e.is_already_released() => {
                    debug!("{} was already unsubscribed", self.descriptor.name);
                    Ok(())
                }
                Err(e) => {
                    warn!("Failed to unsubscribe from {}: {}", self.descriptor.name, e);
                    Err(e)
                }
            },
            None => Ok(()),
        };

        self.set_state(SubscriptionState::Unsubscribed);
        result
    }

    /// One read and decode, independent of the subscription.
    pub async fn read_once(&self, session: &SessionHandle) -> Result<Value, ChannelError> {
        let raw = self.transport.read(session, self.descriptor.uuid).await?;
        let decoded = self.descriptor.decode(&raw);

        let mut snapshot = lock_snapshot(&self.snapshot);
        snapshot.last_raw = Some(raw);
        let value = decoded?;
        snapshot.last_value = Some(value.clone());
        Ok(value)
    }

    pub async fn write(&self, session: &SessionHandle, value: &Value) -> Result<(), ChannelError> {
        if !self.descriptor.writable {
            return Err(ChannelError::ReadOnly(self.descriptor.uuid));
        }
        let bytes = self.descriptor.encode(value)?;
        debug!("Writing {} to {}", to_hex_string(&bytes), self.descriptor.name);
        self.transport
            .write(session, self.descriptor.uuid, &bytes)
            .await?;
        Ok(())
    }

    fn set_state(&self, state: SubscriptionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

fn lock_snapshot(snapshot: &Mutex<ChannelSnapshot>) -> MutexGuard<'_, ChannelSnapshot> {
    snapshot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Decodes raw notifications until cancelled or the stream ends.
async fn dispatch(
    descriptor: CharacteristicDescriptor,
    mut stream: RawStream,
    handler: ValueHandler,
    snapshot: Arc<Mutex<ChannelSnapshot>>,
    cancel: CancellationToken,
) {
    debug!("Listening for {} notifications...", descriptor.name);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = stream.recv() => {
                let Some(raw) = next else {
                    info!("Notification stream for {} ended", descriptor.name);
                    break;
                };
                match descriptor.decode(&raw) {
                    Ok(value) => {
                        {
                            let mut snapshot = lock_snapshot(&snapshot);
                            snapshot.last_raw = Some(raw);
                            snapshot.last_value = Some(value.clone());
                        }
                        handler(value);
                    }
                    Err(e) => {
                        warn!(
                            "Dropping {} payload [{}]: {}",
                            descriptor.name,
                            to_hex_string(&raw),
                            e
                        );
                        lock_snapshot(&snapshot).last_raw = Some(raw);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::constants::{UUID_BATTERY_LEVEL, UUID_JOYSTICK, UUID_TIMESTAMP};
    use crate::core::bluetooth::mock::{MockTransport, MOCK_BOARD_ADDRESS};
    use crate::core::codec::{BatteryLevel, CodecRegistry, DeviceTimestamp, Joystick};
    use tokio::sync::mpsc;

    async fn setup(uuid: Uuid) -> (Arc<MockTransport>, SessionHandle, CharacteristicChannel) {
        let mock = Arc::new(MockTransport::with_board());
        let session = mock.open(MOCK_BOARD_ADDRESS).await.unwrap();
        let descriptor = *CodecRegistry::standard().get(&uuid).unwrap();
        let channel = CharacteristicChannel::new(descriptor, mock.clone(), RetryPolicy::new(5, 500));
        (mock, session, channel)
    }

    fn collector() -> (ValueHandler, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler: ValueHandler = Arc::new(move |value| {
            let _ = tx.send(value);
        });
        (handler, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_subscription_spends_the_budget() {
        let (mock, session, channel) = setup(UUID_JOYSTICK).await;
        mock.fail_subscribe(UUID_JOYSTICK, u32::MAX);
        let (handler, _rx) = collector();

        let state = channel.start(&session, handler.clone()).await;
        assert_eq!(state, SubscriptionState::Failed);
        assert_eq!(mock.subscribe_attempts(UUID_JOYSTICK), 5);

        // a failed channel is not retried until it is stopped
        assert_eq!(channel.start(&session, handler).await, SubscriptionState::Failed);
        assert_eq!(mock.subscribe_attempts(UUID_JOYSTICK), 5);

        channel.stop().await.unwrap();
        assert_eq!(channel.state(), SubscriptionState::Unsubscribed);
    }

    #[tokio::test(start_paused = true)]
    async fn bad_payloads_are_dropped() {
        let (mock, session, channel) = setup(UUID_JOYSTICK).await;
        let (handler, mut rx) = collector();
        assert_eq!(
            channel.start(&session, handler).await,
            SubscriptionState::Subscribed
        );

        assert!(mock.push(UUID_JOYSTICK, vec![1, 2, 3]));
        let good = Joystick { x: -3, y: 7, button: 1 };
        let raw = vec![0xFD, 0xFF, 0x07, 0x00, 0x01];
        assert!(mock.push(UUID_JOYSTICK, raw.clone()));

        assert_eq!(rx.recv().await, Some(Value::Joystick(good)));
        assert_eq!(channel.state(), SubscriptionState::Subscribed);
        let snapshot = channel.snapshot();
        assert_eq!(snapshot.last_raw, Some(raw));
        assert_eq!(snapshot.last_value, Some(Value::Joystick(good)));
    }

    #[tokio::test(start_paused = true)]
    async fn no_values_after_stop() {
        let (mock, session, channel) = setup(UUID_BATTERY_LEVEL).await;
        let (handler, mut rx) = collector();
        channel.start(&session, handler).await;

        channel.stop().await.unwrap();
        assert!(!mock.is_subscribed(UUID_BATTERY_LEVEL));
        assert!(!mock.push(UUID_BATTERY_LEVEL, vec![50]));
        assert!(rx.try_recv().is_err());

        // stopping twice is fine, the transport reports it already released
        channel.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_after_failed_cleanup_still_unsubscribes_locally() {
        let (mock, session, channel) = setup(UUID_BATTERY_LEVEL).await;
        let (handler, _rx) = collector();
        channel.start(&session, handler).await;

        mock.fail_cleanup(true);
        assert!(channel.stop().await.is_err());
        assert_eq!(channel.state(), SubscriptionState::Unsubscribed);
    }

    #[tokio::test(start_paused = true)]
    async fn read_once_and_write() {
        let (mock, session, channel) = setup(UUID_TIMESTAMP).await;
        let stamp = DeviceTimestamp { unix_seconds: 42 };
        channel
            .write(&session, &Value::Timestamp(stamp))
            .await
            .unwrap();
        assert_eq!(mock.value(UUID_TIMESTAMP), Some(42u64.to_le_bytes().to_vec()));
        assert_eq!(
            channel.read_once(&session).await.unwrap(),
            Value::Timestamp(stamp)
        );
        assert_eq!(channel.state(), SubscriptionState::Unsubscribed);
    }

    #[tokio::test(start_paused = true)]
    async fn read_only_characteristic_refuses_writes() {
        let (_mock, session, channel) = setup(UUID_BATTERY_LEVEL).await;
        let err = channel
            .write(&session, &Value::BatteryLevel(BatteryLevel { percent: 10 }))
            .await
            .unwrap_err();
        assert_eq!(err, ChannelError::ReadOnly(UUID_BATTERY_LEVEL));
    }
}
