use std::sync::Arc;
use std::time::Duration;

use sensor_board_monitor_lib::config::AppConfig;
use sensor_board_monitor_lib::core::bluetooth::mock::MockTransport;
use sensor_board_monitor_lib::core::bluetooth::*;
use sensor_board_monitor_lib::core::codec::Value;
use sensor_board_monitor_lib::DeviceError;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::sleep;

fn setup() -> (
    Arc<MockTransport>,
    Arc<DeviceManager>,
    UnboundedReceiver<DeviceEvent>,
) {
    let mock = Arc::new(MockTransport::with_board());
    let (sink, events) = EventSink::channel();
    let manager = DeviceManager::new(mock.clone(), &AppConfig::default(), sink).unwrap();
    (mock, Arc::new(manager), events)
}

fn drain(events: &mut UnboundedReceiver<DeviceEvent>) -> Vec<DeviceEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn statuses(events: &[DeviceEvent]) -> Vec<SessionState> {
    events
        .iter()
        .filter_map(|e| match e {
            DeviceEvent::StatusChanged { state } => Some(*state),
            _ => None,
        })
        .collect()
}

fn values_for<'a>(events: &'a [DeviceEvent], name: &str) -> Vec<&'a Value> {
    events
        .iter()
        .filter_map(|e| match e {
            DeviceEvent::ValueChanged { subsystem, value } if subsystem == name => Some(value),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn healthy_board_reaches_ready() {
    let (mock, manager, mut events) = setup();

    let report = manager.connect(&mock.board_identity()).await.unwrap();
    assert!(report.degraded.is_empty());
    assert_eq!(report.profile.manufacturer.as_deref(), Some("Open Sensor Lab"));
    assert_eq!(manager.session_state(), SessionState::Ready);
    assert!(manager
        .channel_states()
        .iter()
        .all(|(_, state)| *state == SubscriptionState::Subscribed));
    assert!(manager.subsystem_names().iter().all(|n| manager.is_available(n)));

    let events = drain(&mut events);
    assert_eq!(
        statuses(&events),
        vec![
            SessionState::Connecting,
            SessionState::DiscoveringServices,
            SessionState::StartingSubsystems,
            SessionState::Ready,
        ]
    );
    // the timestamp is read once after startup
    assert_eq!(values_for(&events, SUBSYSTEM_TIMESTAMP).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn critical_failure_leaves_nothing_subscribed() {
    let (mock, manager, _events) = setup();
    mock.fail_subscribe(UUID_IMU2_VECTOR, u32::MAX);

    let err = manager.connect(&mock.board_identity()).await.unwrap_err();
    assert_eq!(
        err,
        DeviceError::CriticalSubsystemFailure {
            failed: vec![SUBSYSTEM_IMU2.to_string()]
        }
    );

    assert_eq!(mock.subscribe_attempts(UUID_IMU2_VECTOR), 5);
    assert!(mock.subscribed().is_empty());
    assert!(manager
        .channel_states()
        .iter()
        .all(|(_, state)| *state == SubscriptionState::Unsubscribed));
    assert_eq!(manager.session_state(), SessionState::Disconnected);
    assert_eq!(mock.open_sessions(), 0);
}

#[tokio::test(start_paused = true)]
async fn best_effort_failure_degrades_but_connects() {
    let (mock, manager, mut events) = setup();
    mock.fail_subscribe(UUID_BUTTONS, u32::MAX);

    let report = manager.connect(&mock.board_identity()).await.unwrap();
    assert_eq!(report.degraded, vec![SUBSYSTEM_GAMEPAD.to_string()]);
    assert_eq!(manager.failed_subsystems(), vec![SUBSYSTEM_GAMEPAD.to_string()]);
    assert_eq!(manager.session_state(), SessionState::Ready);
    assert!(!manager.is_available(SUBSYSTEM_GAMEPAD));
    assert!(manager.is_available(SUBSYSTEM_SENSORS));

    // the joystick did subscribe, but was stopped with the rest of its subsystem
    assert!(!mock.is_subscribed(UUID_JOYSTICK));
    assert!(drain(&mut events).contains(&DeviceEvent::SubsystemAvailability {
        subsystem: SUBSYSTEM_GAMEPAD.to_string(),
        available: false
    }));

    assert!(!mock.push(UUID_JOYSTICK, vec![1, 0, 2, 0, 1]));
    assert!(mock.push(UUID_FORCE_SENSOR, 12.5f32.to_le_bytes().to_vec()));
    sleep(Duration::from_millis(10)).await;

    let events = drain(&mut events);
    assert!(values_for(&events, SUBSYSTEM_GAMEPAD).is_empty());
    assert_eq!(values_for(&events, SUBSYSTEM_SENSORS).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn transient_subscribe_failures_are_retried() {
    let (mock, manager, _events) = setup();
    mock.fail_subscribe(UUID_IMU1_VECTOR, 2);

    let report = manager.connect(&mock.board_identity()).await.unwrap();
    assert!(report.degraded.is_empty());
    assert_eq!(mock.subscribe_attempts(UUID_IMU1_VECTOR), 3);
}

#[tokio::test(start_paused = true)]
async fn failed_link_reports_connection_error() {
    let (mock, manager, _events) = setup();
    mock.fail_opens(u32::MAX);

    let err = manager.connect(&mock.board_identity()).await.unwrap_err();
    assert!(matches!(err, DeviceError::Connection(_)));
    assert_eq!(mock.calls("open"), 5);
    assert_eq!(mock.calls("subscribe"), 0);
    assert_eq!(manager.session_state(), SessionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn disconnect_ends_disconnected_even_when_cleanup_fails() {
    let (mock, manager, mut events) = setup();
    manager.connect(&mock.board_identity()).await.unwrap();
    drain(&mut events);

    mock.fail_cleanup(true);
    manager.disconnect().await.unwrap();

    assert_eq!(manager.session_state(), SessionState::Disconnected);
    assert!(manager
        .channel_states()
        .iter()
        .all(|(_, state)| *state == SubscriptionState::Unsubscribed));
    assert_eq!(manager.profile(), DeviceProfile::default());

    let events = drain(&mut events);
    assert_eq!(
        statuses(&events),
        vec![SessionState::Disconnecting, SessionState::Disconnected]
    );
    for name in manager.subsystem_names() {
        assert!(events.contains(&DeviceEvent::Cleared {
            subsystem: name.to_string()
        }));
    }
}

#[tokio::test(start_paused = true)]
async fn disconnect_waits_for_in_flight_connect() {
    let (mock, manager, _events) = setup();

    let connecting = {
        let manager = manager.clone();
        let identity = mock.board_identity();
        tokio::spawn(async move { manager.connect(&identity).await })
    };
    tokio::task::yield_now().await;
    assert_ne!(manager.session_state(), SessionState::Disconnected);

    manager.disconnect().await.unwrap();
    let report = connecting.await.unwrap();

    assert!(report.is_ok());
    assert_eq!(manager.session_state(), SessionState::Disconnected);
    assert!(mock.subscribed().is_empty());
}

#[tokio::test(start_paused = true)]
async fn idle_config_blob_round_trips() {
    let (mock, manager, _events) = setup();
    manager.connect(&mock.board_identity()).await.unwrap();

    let blob = [0u8, 1, 0, 3, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
    manager.write_config(blob).await.unwrap();
    assert_eq!(manager.read_config().await.unwrap(), blob);

    let edited = ConfigEditor::new(manager.as_ref())
        .set_aux_sample_rate(250)
        .await
        .unwrap();
    assert_eq!(edited.aux_sample_rate_ms, 250);
    let mut expected = blob;
    expected[11..13].copy_from_slice(&250u16.to_le_bytes());
    assert_eq!(manager.read_config().await.unwrap(), expected);
}

#[tokio::test(start_paused = true)]
async fn silent_heartbeat_marks_session_stale_once() {
    let (mock, manager, mut events) = setup();
    manager.connect(&mock.board_identity()).await.unwrap();
    drain(&mut events);

    assert!(mock.push(UUID_CHARGE_STATE, vec![1]));
    sleep(Duration::from_secs(1)).await;
    assert!(mock.push(UUID_CHARGE_STATE, vec![1]));
    sleep(Duration::from_millis(3100)).await;

    let events = drain(&mut events);
    let stale: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, DeviceEvent::Stale { .. }))
        .collect();
    assert_eq!(stale, vec![&DeviceEvent::Stale { stale: true }]);
    assert!(manager.is_stale());

    // reconnecting clears the stale flag and opens a fresh session
    manager.reconnect().await.unwrap();
    assert!(!manager.is_stale());
    assert_eq!(mock.calls("open"), 2);
    assert_eq!(manager.session_state(), SessionState::Ready);
}

#[tokio::test(start_paused = true)]
async fn malformed_notification_is_dropped() {
    let (mock, manager, mut events) = setup();
    manager.connect(&mock.board_identity()).await.unwrap();
    drain(&mut events);

    assert!(mock.push(UUID_OVERALL_STATUS, vec![0, 5, 0, 0]));
    assert!(mock.push(UUID_OVERALL_STATUS, vec![0, 3, 3, 3]));
    sleep(Duration::from_millis(10)).await;

    let events = drain(&mut events);
    let status = values_for(&events, SUBSYSTEM_STATUS);
    assert_eq!(status.len(), 1);
    match status[0] {
        Value::OverallStatus(s) => assert!(s.all_running()),
        other => panic!("unexpected value {:?}", other),
    }
    assert_eq!(manager.session_state(), SessionState::Ready);
}
