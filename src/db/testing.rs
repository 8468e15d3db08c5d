//! In-memory connector for exercising the connection manager

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::db::manager::{ConnectionConfig, Connector, LiveHandle, LiveState, LiveStateCell};
use crate::types::ConnectionError;

/// Handle produced by [`FakeConnector`]
#[derive(Debug)]
pub struct FakeHandle {
    serial: usize,
    state: LiveStateCell,
}

impl FakeHandle {
    /// 1-based establish number that produced this handle
    pub fn serial(&self) -> usize {
        self.serial
    }
}

impl LiveHandle for FakeHandle {
    fn live_state(&self) -> LiveState {
        self.state.get()
    }
}

#[derive(Default)]
struct FakeState {
    establishes: AtomicUsize,
    failure: Mutex<Option<String>>,
    settle: Mutex<Option<LiveState>>,
    last_state: Mutex<Option<LiveStateCell>>,
}

/// Counts establishes, optionally delays or fails them, and hands back
/// handles whose live state the test controls.
#[derive(Clone, Default)]
pub struct FakeConnector {
    inner: Arc<FakeState>,
    delay: Duration,
    second_phase: Duration,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Establish in two sleeps, like a driver that resolves then handshakes
    pub fn with_phases(mut self, first: Duration, second: Duration) -> Self {
        self.delay = first;
        self.second_phase = second;
        self
    }

    pub fn failing(self, reason: &str) -> Self {
        self.set_failure(Some(reason));
        self
    }

    pub fn settling_as(self, state: LiveState) -> Self {
        self.settle_as(state);
        self
    }

    pub fn set_failure(&self, reason: Option<&str>) {
        *self.inner.failure.lock().unwrap() = reason.map(str::to_string);
    }

    /// State new handles start in (defaults to `Connected`)
    pub fn settle_as(&self, state: LiveState) {
        *self.inner.settle.lock().unwrap() = Some(state);
    }

    pub fn establish_count(&self) -> usize {
        self.inner.establishes.load(Ordering::SeqCst)
    }

    /// Live state cell of the most recently produced handle
    pub fn last_state(&self) -> LiveStateCell {
        self.inner
            .last_state
            .lock()
            .unwrap()
            .clone()
            .expect("no handle established yet")
    }
}

#[async_trait]
impl Connector for FakeConnector {
    type Handle = FakeHandle;

    async fn establish(
        &self,
        _target: &str,
        _config: &ConnectionConfig,
    ) -> Result<FakeHandle, ConnectionError> {
        let serial = self.inner.establishes.fetch_add(1, Ordering::SeqCst) + 1;

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if !self.second_phase.is_zero() {
            tokio::time::sleep(self.second_phase).await;
        }

        if let Some(reason) = self.inner.failure.lock().unwrap().clone() {
            return Err(ConnectionError::EstablishmentFailed(reason));
        }

        let initial = self.inner.settle.lock().unwrap().unwrap_or(LiveState::Connected);
        let state = LiveStateCell::new(initial);
        *self.inner.last_state.lock().unwrap() = Some(state.clone());

        Ok(FakeHandle { serial, state })
    }
}
