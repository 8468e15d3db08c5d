//! Request gate
//!
//! Every data-touching request passes through here first. The gate asks the
//! connection manager for a live handle; if that fails the request is answered
//! with 503 and never reaches a handler.

use bytes::Bytes;
use http_body_util::Full;
use hyper::Response;
use serde::Serialize;
use std::sync::Arc;
use tracing::error;

use crate::db::{ConnectionManager, Connector};
use crate::server::response::json_response;
use crate::types::{ConnectionError, StorefrontError};

/// Body returned when the database is unavailable
#[derive(Debug, Serialize)]
pub struct UnavailableBody {
    pub success: bool,
    pub message: &'static str,
    pub error: String,
}

/// Obtain a live connection or the 503 response to send instead
pub async fn require_connection<C: Connector>(
    db: &ConnectionManager<C>,
) -> Result<Arc<C::Handle>, Response<Full<Bytes>>> {
    db.ensure_connected().await.map_err(|e| {
        error!(error = %e, "Database connection error");
        unavailable_response(&e)
    })
}

/// 503 response for a connection failure
pub fn unavailable_response(err: &ConnectionError) -> Response<Full<Bytes>> {
    json_response(
        StorefrontError::Connection(err.clone()).status_code(),
        &UnavailableBody {
            success: false,
            message: "Database connection failed",
            error: err.to_string(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::FakeConnector;
    use crate::db::{ConnectionConfig, CredentialPresence};
    use http_body_util::BodyExt;
    use hyper::StatusCode;

    #[tokio::test]
    async fn test_gate_passes_live_connection() {
        let fake = FakeConnector::new();
        let db = ConnectionManager::new(
            fake.clone(),
            ConnectionConfig::with_target("mongodb://fake"),
            CredentialPresence::new(),
        );

        let handle = require_connection(&db).await.unwrap();
        assert_eq!(handle.serial(), 1);
    }

    #[tokio::test]
    async fn test_gate_rejects_with_503_body() {
        let db = ConnectionManager::new(
            FakeConnector::new(),
            ConnectionConfig::default(),
            CredentialPresence::new(),
        );

        let response = require_connection(&db).await.err().unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["message"], "Database connection failed");
        assert_eq!(json["error"], "MONGODB_URI environment variable is not set");
    }
}
