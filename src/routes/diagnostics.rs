//! Operator diagnostics (/api/diagnostics, /api/debug)
//!
//! Tries a live connection and reports what happened. Always answers 200 with
//! a well-formed body, including when the store is unreachable: the failure is
//! reported as data, never as a transport error.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::db::{Connector, LiveState, StatusSnapshot};
use crate::server::response::json_response;
use crate::server::AppState;

/// Diagnostics body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsResponse {
    pub success: bool,
    /// Watched credentials, `SET` or `NOT SET`
    pub env: BTreeMap<&'static str, &'static str>,
    pub configured: bool,
    /// `connected` or `failed`
    pub db_status: &'static str,
    pub db_error: Option<String>,
    pub live_state: LiveState,
}

impl From<StatusSnapshot> for DiagnosticsResponse {
    fn from(snapshot: StatusSnapshot) -> Self {
        let connected = snapshot.is_connected();
        let db_error = match (connected, snapshot.last_error) {
            (true, _) => None,
            (false, Some(e)) => Some(e),
            (false, None) => Some(format!("Database is {}", snapshot.live_state)),
        };

        Self {
            success: true,
            env: snapshot.credentials.as_env_report(),
            configured: snapshot.configured,
            db_status: if connected { "connected" } else { "failed" },
            db_error,
            live_state: snapshot.live_state,
        }
    }
}

/// Handle diagnostics request
pub async fn diagnostics<C: Connector>(state: &AppState<C>) -> Response<Full<Bytes>> {
    let report = DiagnosticsResponse::from(state.db.query_status().await);
    json_response(StatusCode::OK, &report)
}
