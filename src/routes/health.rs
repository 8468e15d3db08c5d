//! Health check endpoints
//!
//! Kubernetes-style checks:
//! - /health, /healthz - Liveness (is the service running?)
//! - /ready, /readyz - Readiness (is there a live database connection?)
//!
//! Neither check opens a connection. They read the manager's snapshot, so a
//! burst of checks against a dead store costs nothing.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;

use crate::db::{Connector, LiveState};
use crate::server::response::json_response;
use crate::server::AppState;

/// Health response
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall health status (true if service is running)
    pub healthy: bool,
    /// 'online' with a live database, 'degraded' otherwise
    pub status: &'static str,
    /// Service version
    pub version: &'static str,
    /// Uptime in seconds
    pub uptime: u64,
    /// Current timestamp
    pub timestamp: String,
    /// Node identifier
    pub node_id: String,
    /// Database connection status
    pub database: DatabaseHealth,
}

/// Database connection health details
#[derive(Serialize)]
pub struct DatabaseHealth {
    pub configured: bool,
    pub connected: bool,
    #[serde(rename = "liveState")]
    pub live_state: LiveState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

async fn build_health_response<C: Connector>(state: &AppState<C>) -> HealthResponse {
    let snapshot = state.db.snapshot().await;
    let connected = snapshot.is_connected();

    HealthResponse {
        healthy: true,
        status: if connected { "online" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        uptime: state.started_at.elapsed().as_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        node_id: state.args.node_id.to_string(),
        database: DatabaseHealth {
            configured: snapshot.configured,
            connected,
            live_state: snapshot.live_state,
            error: snapshot.last_error,
        },
    }
}

/// Handle liveness check (/health, /healthz)
///
/// Always 200 while the process serves requests.
pub async fn health_check<C: Connector>(state: &AppState<C>) -> Response<Full<Bytes>> {
    json_response(StatusCode::OK, &build_health_response(state).await)
}

/// Handle readiness check (/ready, /readyz)
///
/// 200 only when the cached connection is live. A process that has not
/// served a data request yet has no connection and reports 503 until it does.
pub async fn readiness_check<C: Connector>(state: &AppState<C>) -> Response<Full<Bytes>> {
    let response = build_health_response(state).await;
    let status = if response.database.connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    json_response(status, &response)
}

/// Version information for deployment verification
#[derive(Serialize)]
pub struct VersionResponse {
    pub version: &'static str,
    pub commit: &'static str,
    pub commit_full: &'static str,
    pub build_time: &'static str,
    pub service: &'static str,
}

/// Handle version endpoint (/version)
pub fn version_info() -> Response<Full<Bytes>> {
    let response = VersionResponse {
        version: env!("CARGO_PKG_VERSION"),
        commit: option_env!("GIT_COMMIT_SHORT").unwrap_or("unknown"),
        commit_full: option_env!("GIT_COMMIT_FULL").unwrap_or("unknown"),
        build_time: option_env!("BUILD_TIMESTAMP").unwrap_or("unknown"),
        service: "storefront",
    };

    json_response(StatusCode::OK, &response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Args;
    use crate::db::testing::FakeConnector;
    use crate::db::{ConnectionConfig, ConnectionManager, CredentialPresence};
    use clap::Parser;

    fn state(fake: &FakeConnector) -> AppState<FakeConnector> {
        let args = Args::try_parse_from(["storefront"]).unwrap();
        let db = ConnectionManager::new(
            fake.clone(),
            ConnectionConfig::with_target("mongodb://fake"),
            CredentialPresence::new(),
        );
        AppState::new(args, db)
    }

    #[tokio::test]
    async fn test_health_checks_do_not_connect() {
        let fake = FakeConnector::new();
        let state = state(&fake);

        assert_eq!(health_check(&state).await.status(), StatusCode::OK);
        assert_eq!(readiness_check(&state).await.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(fake.establish_count(), 0);
    }

    #[tokio::test]
    async fn test_ready_after_connection() {
        let fake = FakeConnector::new();
        let state = state(&fake);

        state.db.ensure_connected().await.unwrap();
        assert_eq!(readiness_check(&state).await.status(), StatusCode::OK);

        fake.last_state().set(LiveState::Disconnected);
        assert_eq!(readiness_check(&state).await.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
