//! Liveness watchdog
//! Armed by the first heartbeat (charging-state notification). If no
//! heartbeat arrives for `stale_after`, the session is reported stale once
//! and the watchdog keeps checking every `check_interval` until a heartbeat
//! returns or it is disarmed.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::events::EventSink;

#[derive(Default)]
struct WatchdogState {
    last_beat: Option<Instant>,
    stale: bool,
    cancel: Option<CancellationToken>,
}

pub struct Watchdog {
    stale_after: Duration,
    check_interval: Duration,
    events: EventSink,
    state: Arc<Mutex<WatchdogState>>,
}

impl Watchdog {
    pub fn new(stale_after: Duration, check_interval: Duration, events: EventSink) -> Self {
        Self {
            stale_after,
            check_interval,
            events,
            state: Arc::new(Mutex::new(WatchdogState::default())),
        }
    }

    pub fn is_armed(&self) -> bool {
        lock(&self.state).cancel.is_some()
    }

    pub fn is_stale(&self) -> bool {
        lock(&self.state).stale
    }

    /// Records a heartbeat; the first one arms the watchdog.
    /// Must be called from within a tokio runtime.
    pub fn heartbeat(&self) {
        let mut state = lock(&self.state);
        state.last_beat = Some(Instant::now());

        let recovered = std::mem::take(&mut state.stale);

        if state.cancel.is_none() {
            let cancel = CancellationToken::new();
            state.cancel = Some(cancel.clone());
            info!("Watchdog armed ({} ms threshold)", self.stale_after.as_millis());
            tokio::spawn(watch(
                self.state.clone(),
                self.events.clone(),
                self.stale_after,
                self.check_interval,
                cancel,
            ));
        }
        drop(state);

        if recovered {
            info!("Heartbeat resumed, session no longer stale");
            self.events.on_stale(false);
        }
    }

    /// Stops watching. A stale session is reported as no longer stale.
    pub fn disarm(&self) {
        let mut state = lock(&self.state);
        if let Some(cancel) = state.cancel.take() {
            cancel.cancel();
            debug!("Watchdog disarmed");
        }
        state.last_beat = None;
        let was_stale = std::mem::take(&mut state.stale);
        drop(state);

        if was_stale {
            self.events.on_stale(false);
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        if let Some(cancel) = lock(&self.state).cancel.take() {
            cancel.cancel();
        }
    }
}

fn lock(state: &Mutex<WatchdogState>) -> MutexGuard<'_, WatchdogState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn watch(
    state: Arc<Mutex<WatchdogState>>,
    events: EventSink,
    stale_after: Duration,
    check_interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        let deadline = {
            let state = lock(&state);
            match state.last_beat {
                _ if state.stale => Instant::now() + check_interval,
                Some(last) => last + stale_after,
                None => return,
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = sleep_until(deadline) => {}
        }

        let mut guard = lock(&state);
        if guard.stale {
            debug!("Session still stale");
            continue;
        }
        let Some(last) = guard.last_beat else {
            return;
        };
        let gap = Instant::now().duration_since(last);
        if gap >= stale_after {
            guard.stale = true;
            drop(guard);
            warn!(
                "No heartbeat for {} ms, session is stale",
                gap.as_millis()
            );
            events.on_stale(true);
        }
    }
}
