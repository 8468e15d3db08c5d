//! Connection lifecycle manager
//!
//! Owns the one logical database connection of the process and mediates every
//! attempt to acquire it:
//!
//! - **Fast path**: a cached handle whose live state is `Connected` is handed
//!   out without I/O.
//! - **Single flight**: concurrent callers that find no usable handle share one
//!   in-flight establish attempt. The check-then-register step happens under a
//!   single lock, so at most one underlying connect is ever issued at a time.
//! - **Staleness**: a cached handle that reports anything but `Connected` is
//!   given one bounded grace wait (only while it is still `Connecting`), then
//!   evicted and re-established. Staleness is only discovered when somebody
//!   asks; nothing polls in the background.
//! - **Clean retry**: a failed attempt is cleared before its error reaches the
//!   callers, so the next independent call starts fresh.
//!
//! The store itself sits behind the [`Connector`] seam so the manager can be
//! exercised without a running MongoDB.

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::types::ConnectionError;

/// Default server selection timeout
pub const DEFAULT_SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Default idle limit for pooled sockets
pub const DEFAULT_SOCKET_IDLE_TIMEOUT: Duration = Duration::from_secs(45);

/// Default grace wait for a connection that is still settling
pub const DEFAULT_GRACE_WAIT: Duration = Duration::from_secs(1);

/// Default maximum driver pool size
pub const DEFAULT_MAX_POOL_SIZE: u32 = 10;

/// Current reported state of the underlying transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LiveState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Unknown,
}

impl LiveState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
            Self::Unknown => "unknown",
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
            Self::Disconnecting => 3,
            Self::Unknown => 4,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Disconnected,
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Disconnecting,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for LiveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared, lock-free cell holding a [`LiveState`]
///
/// Transport event callbacks write it, and `live_state()` reads it
/// synchronously on demand.
#[derive(Debug, Clone)]
pub struct LiveStateCell {
    state: Arc<AtomicU8>,
}

impl LiveStateCell {
    pub fn new(initial: LiveState) -> Self {
        Self {
            state: Arc::new(AtomicU8::new(initial.as_u8())),
        }
    }

    pub fn get(&self) -> LiveState {
        LiveState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set(&self, state: LiveState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }
}

impl Default for LiveStateCell {
    fn default() -> Self {
        Self::new(LiveState::Unknown)
    }
}

/// An established connection that can report its own liveness
pub trait LiveHandle: Send + Sync + 'static {
    /// Point-in-time transport state. Must be cheap and never block.
    fn live_state(&self) -> LiveState;
}

/// Establishes connections to the backing store
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Handle: LiveHandle;

    /// Open a new connection to `target`, honouring the timeouts in `config`.
    async fn establish(
        &self,
        target: &str,
        config: &ConnectionConfig,
    ) -> Result<Self::Handle, ConnectionError>;
}

/// Connection manager configuration
#[derive(Clone)]
pub struct ConnectionConfig {
    /// Connection target (URI with credentials). `None` means unconfigured.
    pub target: Option<String>,
    /// Database to use on the target
    pub db_name: String,
    /// Time allowed to find a reachable server
    pub server_selection_timeout: Duration,
    /// Idle limit for pooled sockets
    pub socket_idle_timeout: Duration,
    /// Maximum driver pool size
    pub max_pool_size: u32,
    /// Bounded pause for a connection that is still settling
    pub grace_wait: Duration,
}

impl ConnectionConfig {
    /// Configuration pointing at `target` with default tuning
    pub fn with_target(target: impl Into<String>) -> Self {
        Self {
            target: Some(target.into()),
            ..Self::default()
        }
    }

    /// Upper bound for one whole establish attempt.
    ///
    /// Covers URI resolution plus the server selection done by the ping.
    pub fn establish_deadline(&self) -> Duration {
        self.server_selection_timeout * 2
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            target: None,
            db_name: "e-commerce".to_string(),
            server_selection_timeout: DEFAULT_SERVER_SELECTION_TIMEOUT,
            socket_idle_timeout: DEFAULT_SOCKET_IDLE_TIMEOUT,
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
            grace_wait: DEFAULT_GRACE_WAIT,
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The target carries credentials
        f.debug_struct("ConnectionConfig")
            .field("target", &self.target.as_ref().map(|_| "<redacted>"))
            .field("db_name", &self.db_name)
            .field("server_selection_timeout", &self.server_selection_timeout)
            .field("socket_idle_timeout", &self.socket_idle_timeout)
            .field("max_pool_size", &self.max_pool_size)
            .field("grace_wait", &self.grace_wait)
            .finish()
    }
}

/// Presence of watched credentials, without their values
#[derive(Debug, Clone, Default)]
pub struct CredentialPresence {
    entries: Vec<(&'static str, bool)>,
}

impl CredentialPresence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a watched credential
    pub fn watch(mut self, name: &'static str, present: bool) -> Self {
        self.entries.push((name, present));
        self
    }

    /// Whether `name` is set, or `None` if it is not watched
    pub fn is_set(&self, name: &str) -> Option<bool> {
        self.entries
            .iter()
            .find(|(watched, _)| *watched == name)
            .map(|(_, present)| *present)
    }

    /// Every watched credential is present
    pub fn all_set(&self) -> bool {
        self.entries.iter().all(|(_, present)| *present)
    }

    /// `{NAME: "SET" | "NOT SET"}` map for diagnostics
    pub fn as_env_report(&self) -> BTreeMap<&'static str, &'static str> {
        self.entries
            .iter()
            .map(|(name, present)| (*name, if *present { "SET" } else { "NOT SET" }))
            .collect()
    }
}

/// Best-effort view of the connection, safe to expose to operators
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    /// Whether the connection target and every watched auxiliary credential
    /// are present. Connecting only needs the target; see `credentials` for
    /// which entry is missing.
    pub configured: bool,
    /// Transport state of the cached handle (or of the in-flight attempt)
    pub live_state: LiveState,
    /// Most recent connection failure, if the connection is not healthy
    pub last_error: Option<String>,
    #[serde(skip)]
    pub credentials: CredentialPresence,
}

impl StatusSnapshot {
    /// Connected with no outstanding failure
    pub fn is_connected(&self) -> bool {
        self.live_state == LiveState::Connected && self.last_error.is_none()
    }
}

type Attempt<H> = Shared<BoxFuture<'static, Result<Arc<H>, ConnectionError>>>;

/// A registered establish attempt
struct InFlight<H> {
    id: u64,
    started: Instant,
    future: Attempt<H>,
}

impl<H> InFlight<H> {
    fn is(&self, id: u64) -> bool {
        self.id == id
    }
}

/// The `{handle, attempt}` pair plus bookkeeping, guarded by one lock
struct Slot<H> {
    handle: Option<Arc<H>>,
    attempt: Option<InFlight<H>>,
    last_error: Option<String>,
    attempts_started: u64,
}

impl<H> Default for Slot<H> {
    fn default() -> Self {
        Self {
            handle: None,
            attempt: None,
            last_error: None,
            attempts_started: 0,
        }
    }
}

/// Result of inspecting the cached handle
enum CacheLookup<H> {
    Empty,
    Live(Arc<H>),
    Stale(Arc<H>, LiveState),
}

/// Outcome of the atomic check-then-register step
enum Ticket<H> {
    Ready(Arc<H>),
    Pending(u64, Attempt<H>),
}

/// Process-wide connection cache with single-flight establishment
pub struct ConnectionManager<C: Connector> {
    connector: Arc<C>,
    config: ConnectionConfig,
    credentials: CredentialPresence,
    slot: Mutex<Slot<C::Handle>>,
}

impl<C: Connector> ConnectionManager<C> {
    /// Create a manager. No I/O happens until the first `ensure_connected`.
    pub fn new(connector: C, config: ConnectionConfig, credentials: CredentialPresence) -> Self {
        Self {
            connector: Arc::new(connector),
            config,
            credentials,
            slot: Mutex::new(Slot::default()),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn is_configured(&self) -> bool {
        self.config.target.is_some()
    }

    /// Number of underlying establish operations issued so far
    pub async fn establish_count(&self) -> u64 {
        self.slot.lock().await.attempts_started
    }

    /// Return a live connection handle, establishing one if needed.
    ///
    /// Fails with [`ConnectionError::ConfigurationMissing`] before any I/O when
    /// no target is configured. Callers joined on the same attempt all see
    /// the same handle or the same error.
    pub async fn ensure_connected(&self) -> Result<Arc<C::Handle>, ConnectionError> {
        let target = self
            .config
            .target
            .as_deref()
            .ok_or(ConnectionError::ConfigurationMissing)?;

        match self.lookup_cached().await {
            CacheLookup::Live(handle) => {
                debug!("Using cached database connection");
                return Ok(handle);
            }
            CacheLookup::Stale(handle, state) => {
                if let Some(handle) = self.recover_stale(handle, state).await {
                    return Ok(handle);
                }
            }
            CacheLookup::Empty => {}
        }

        let (id, attempt) = match self.join_or_start(target).await {
            Ticket::Ready(handle) => return Ok(handle),
            Ticket::Pending(id, attempt) => (id, attempt),
        };

        let outcome = attempt.await;
        self.settle(id, &outcome).await;
        self.confirm_live(id, outcome?).await
    }

    /// Status for diagnostics. Never fails.
    ///
    /// When a target is configured this first tries to connect so the report
    /// reflects a live read; a failure lands in `last_error`.
    pub async fn query_status(&self) -> StatusSnapshot {
        if !self.is_configured() {
            return self.snapshot().await;
        }

        let result = self.ensure_connected().await;
        let mut snapshot = self.snapshot().await;
        snapshot.last_error = result.err().map(|e| e.to_string());
        snapshot
    }

    /// Status without attempting to connect
    pub async fn snapshot(&self) -> StatusSnapshot {
        let slot = self.slot.lock().await;

        let live_state = match (&slot.handle, &slot.attempt) {
            (Some(handle), _) => handle.live_state(),
            (None, Some(_)) => LiveState::Connecting,
            (None, None) => LiveState::Disconnected,
        };

        let last_error = if self.is_configured() {
            slot.last_error.clone()
        } else {
            Some(ConnectionError::ConfigurationMissing.to_string())
        };

        StatusSnapshot {
            configured: self.is_configured() && self.credentials.all_set(),
            live_state,
            last_error,
            credentials: self.credentials.clone(),
        }
    }

    async fn lookup_cached(&self) -> CacheLookup<C::Handle> {
        let slot = self.slot.lock().await;
        match &slot.handle {
            None => CacheLookup::Empty,
            Some(handle) => match handle.live_state() {
                LiveState::Connected => CacheLookup::Live(Arc::clone(handle)),
                state => CacheLookup::Stale(Arc::clone(handle), state),
            },
        }
    }

    /// Give a settling handle one grace wait, otherwise evict it.
    async fn recover_stale(&self, handle: Arc<C::Handle>, state: LiveState) -> Option<Arc<C::Handle>> {
        warn!(live_state = %state, "Cached database connection is not connected");

        if state == LiveState::Connecting && !self.config.grace_wait.is_zero() {
            tokio::time::sleep(self.config.grace_wait).await;
            if handle.live_state() == LiveState::Connected {
                debug!("Cached database connection settled during grace wait");
                return Some(handle);
            }
        }

        self.evict(&handle).await;
        None
    }

    /// Drop `handle` from the cache if it is still the cached one
    async fn evict(&self, handle: &Arc<C::Handle>) {
        let mut slot = self.slot.lock().await;
        if slot.handle.as_ref().is_some_and(|cached| Arc::ptr_eq(cached, handle)) {
            slot.handle = None;
            info!("Evicted stale database connection");
        }
    }

    /// Join the in-flight attempt or register a new one, atomically.
    async fn join_or_start(&self, target: &str) -> Ticket<C::Handle> {
        let mut slot = self.slot.lock().await;

        // Another caller may have finished while we were probing
        if let Some(handle) = &slot.handle {
            if handle.live_state() == LiveState::Connected {
                return Ticket::Ready(Arc::clone(handle));
            }
        }

        if let Some(in_flight) = &slot.attempt {
            // Every waiter may have been cancelled: a failure nobody settled, or
            // a pending attempt nobody polled until its deadline, must not be
            // handed to a new caller.
            let outcome = in_flight.future.peek();
            let failure = outcome.and_then(|result| result.as_ref().err()).map(|e| e.to_string());
            let abandoned = outcome.is_none()
                && in_flight.started.elapsed() >= self.config.establish_deadline();

            if failure.is_none() && !abandoned {
                debug!(attempt = in_flight.id, "Joining in-flight connection attempt");
                return Ticket::Pending(in_flight.id, in_flight.future.clone());
            }

            warn!(attempt = in_flight.id, abandoned, "Discarding unsettled connection attempt");
            slot.attempt = None;
            if let Some(e) = failure {
                slot.last_error = Some(e);
            }
        }

        slot.attempts_started += 1;
        let id = slot.attempts_started;
        let attempt = self.start_attempt(id, target.to_string());
        slot.attempt = Some(InFlight {
            id,
            started: Instant::now(),
            future: attempt.clone(),
        });

        Ticket::Pending(id, attempt)
    }

    fn start_attempt(&self, id: u64, target: String) -> Attempt<C::Handle> {
        let connector = Arc::clone(&self.connector);
        let config = self.config.clone();
        let deadline = config.establish_deadline();

        async move {
            info!(attempt = id, db = %config.db_name, "Attempting to connect to MongoDB");
            let started = Instant::now();

            match tokio::time::timeout(deadline, connector.establish(&target, &config)).await {
                Ok(Ok(handle)) => {
                    info!(
                        attempt = id,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "MongoDB connection established"
                    );
                    Ok(Arc::new(handle))
                }
                Ok(Err(e)) => {
                    error!(attempt = id, error = %e, "MongoDB connection failed");
                    Err(e)
                }
                Err(_) => {
                    let e = ConnectionError::EstablishmentFailed(format!(
                        "connection attempt timed out after {}ms",
                        deadline.as_millis()
                    ));
                    error!(attempt = id, error = %e, "MongoDB connection failed");
                    Err(e)
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Record the outcome of attempt `id`. The first joiner to get here wins.
    async fn settle(&self, id: u64, outcome: &Result<Arc<C::Handle>, ConnectionError>) {
        let mut slot = self.slot.lock().await;
        if !slot.attempt.as_ref().is_some_and(|current| current.is(id)) {
            return;
        }

        slot.attempt = None;
        match outcome {
            Ok(handle) => {
                slot.handle = Some(Arc::clone(handle));
                slot.last_error = None;
            }
            Err(e) => {
                slot.last_error = Some(e.to_string());
            }
        }
    }

    /// Final liveness check on a freshly established handle.
    ///
    /// A handle that is still not connected after one grace wait is evicted,
    /// and any in-flight marker left by this attempt is cleared.
    async fn confirm_live(&self, id: u64, handle: Arc<C::Handle>) -> Result<Arc<C::Handle>, ConnectionError> {
        if handle.live_state() == LiveState::Connected {
            return Ok(handle);
        }

        debug!(
            attempt = id,
            live_state = %handle.live_state(),
            "Fresh connection not yet connected, waiting"
        );
        tokio::time::sleep(self.config.grace_wait).await;

        let state = handle.live_state();
        if state == LiveState::Connected {
            return Ok(handle);
        }

        let e = ConnectionError::EstablishmentFailed(format!(
            "connection not live after establish (state: {})",
            state
        ));
        warn!(attempt = id, error = %e, "Discarding untrusted database connection");

        let mut slot = self.slot.lock().await;
        if slot.handle.as_ref().is_some_and(|cached| Arc::ptr_eq(cached, &handle)) {
            slot.handle = None;
        }
        if slot.attempt.as_ref().is_some_and(|current| current.is(id)) {
            slot.attempt = None;
        }
        slot.last_error = Some(e.to_string());

        Err(e)
    }
}
