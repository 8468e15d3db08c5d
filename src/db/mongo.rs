//! MongoDB connector
//!
//! Opens a driver `Client` with bounded timeouts, verifies it with a `ping`,
//! and keeps a live-state cell current from the driver's SDAM events so the
//! connection manager can check liveness synchronously.

use async_trait::async_trait;
use bson::doc;
use mongodb::event::sdam::SdamEvent;
use mongodb::event::EventHandler;
use mongodb::options::ClientOptions;
use mongodb::{Client, Database};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::db::manager::{ConnectionConfig, Connector, LiveHandle, LiveState, LiveStateCell};
use crate::types::ConnectionError;

/// Opens MongoDB sessions for the connection manager
#[derive(Debug, Clone)]
pub struct MongoConnector {
    app_name: String,
}

impl MongoConnector {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
        }
    }
}

impl Default for MongoConnector {
    fn default() -> Self {
        Self::new("storefront")
    }
}

#[async_trait]
impl Connector for MongoConnector {
    type Handle = MongoSession;

    async fn establish(
        &self,
        target: &str,
        config: &ConnectionConfig,
    ) -> Result<MongoSession, ConnectionError> {
        let mut options = ClientOptions::parse(target).await.map_err(|e| {
            ConnectionError::EstablishmentFailed(format!("Invalid MongoDB URI: {}", e))
        })?;

        options.app_name = Some(self.app_name.clone());
        options.server_selection_timeout = Some(config.server_selection_timeout);
        options.connect_timeout = Some(config.server_selection_timeout);
        options.max_idle_time = Some(config.socket_idle_timeout);
        options.max_pool_size = Some(config.max_pool_size);

        let tracker = TopologyTracker::new();
        let events = tracker.clone();
        options.sdam_event_handler = Some(EventHandler::callback(move |event: SdamEvent| {
            events.observe(event)
        }));

        let client = Client::with_options(options).map_err(|e| {
            ConnectionError::EstablishmentFailed(format!("Failed to create MongoDB client: {}", e))
        })?;

        // Server selection for the ping is bounded by server_selection_timeout
        if let Err(e) = client
            .database(&config.db_name)
            .run_command(doc! { "ping": 1 })
            .await
        {
            tracker.state.set(LiveState::Disconnected);
            return Err(ConnectionError::EstablishmentFailed(format!(
                "MongoDB ping failed: {}",
                e
            )));
        }

        tracker.mark_verified();
        info!(db = %config.db_name, "Connected to MongoDB database");

        Ok(MongoSession {
            client,
            db_name: config.db_name.clone(),
            state: tracker.state,
        })
    }
}

/// An established MongoDB session
pub struct MongoSession {
    client: Client,
    db_name: String,
    state: LiveStateCell,
}

impl MongoSession {
    /// Get the raw MongoDB client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Get the configured database
    pub fn database(&self) -> Database {
        self.client.database(&self.db_name)
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }
}

impl LiveHandle for MongoSession {
    fn live_state(&self) -> LiveState {
        self.state.get()
    }
}

/// Folds SDAM heartbeat events into a single [`LiveState`].
///
/// The session counts as connected while at least one known server answers
/// heartbeats, and as disconnected once every known server is failing or the
/// topology has been closed.
#[derive(Clone)]
struct TopologyTracker {
    state: LiveStateCell,
    servers: Arc<Mutex<HashMap<String, bool>>>,
}

impl TopologyTracker {
    fn new() -> Self {
        Self {
            state: LiveStateCell::new(LiveState::Connecting),
            servers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn observe(&self, event: SdamEvent) {
        match event {
            SdamEvent::ServerHeartbeatSucceeded(ev) => {
                self.record_heartbeat(ev.server_address.to_string(), true)
            }
            SdamEvent::ServerHeartbeatFailed(ev) => {
                self.record_heartbeat(ev.server_address.to_string(), false)
            }
            SdamEvent::ServerClosed(ev) => self.forget_server(&ev.address.to_string()),
            SdamEvent::TopologyClosed(_) => {
                debug!("MongoDB topology closed");
                self.state.set(LiveState::Disconnected);
            }
            _ => {}
        }
    }

    fn record_heartbeat(&self, address: String, healthy: bool) {
        let mut servers = self.servers.lock().unwrap_or_else(|e| e.into_inner());
        let previous = servers.insert(address.clone(), healthy);

        if previous == Some(true) && !healthy {
            warn!(server = %address, "MongoDB server heartbeat failed");
        }

        // Still settling: the first heartbeats have not all come back yet
        self.recompute(&servers, previous.is_none());
    }

    /// A server left the topology, so its last heartbeat no longer counts
    fn forget_server(&self, address: &str) {
        let mut servers = self.servers.lock().unwrap_or_else(|e| e.into_inner());
        if servers.remove(address).is_some() {
            debug!(server = %address, "MongoDB server removed from topology");
            self.recompute(&servers, false);
        }
    }

    fn recompute(&self, servers: &HashMap<String, bool>, first_report: bool) {
        let any_healthy = servers.values().any(|ok| *ok);
        let current = self.state.get();
        let next = match (any_healthy, current) {
            (true, _) => LiveState::Connected,
            (false, LiveState::Connecting) if first_report => LiveState::Connecting,
            (false, LiveState::Connecting) if servers.is_empty() => LiveState::Connecting,
            (false, _) => LiveState::Disconnected,
        };

        if next != current {
            debug!(from = %current, to = %next, "MongoDB live state changed");
            self.state.set(next);
        }
    }

    /// The ping succeeded, so at least one server is reachable right now
    fn mark_verified(&self) {
        if self.state.get() != LiveState::Disconnected {
            self.state.set(LiveState::Connected);
        }
    }
}
