//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo, one task per accepted connection. Request
//! bodies are collected up front so routing works on `Request<Bytes>`.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::config::Args;
use crate::db::{ConnectionManager, Connector, MongoConnector};
use crate::routes::{self, Resource, ResourceHandler, UnimplementedResources};
use crate::server::gate;
use crate::server::response::{error_response, preflight_response, text_response};
use crate::types::StorefrontError;

/// Shared application state
pub struct AppState<C: Connector = MongoConnector> {
    pub args: Args,
    /// Process-wide database connection manager
    pub db: ConnectionManager<C>,
    /// Handler for gated resource routes
    pub resources: Arc<dyn ResourceHandler<C::Handle>>,
    /// When this state was created, for uptime reporting
    pub started_at: Instant,
}

impl<C: Connector> AppState<C> {
    /// Create AppState with the fallback resource handler
    pub fn new(args: Args, db: ConnectionManager<C>) -> Self {
        Self::with_resources(args, db, Arc::new(UnimplementedResources))
    }

    /// Create AppState with a custom resource handler
    pub fn with_resources(
        args: Args,
        db: ConnectionManager<C>,
        resources: Arc<dyn ResourceHandler<C::Handle>>,
    ) -> Self {
        Self {
            args,
            db,
            resources,
            started_at: Instant::now(),
        }
    }
}

/// Start the HTTP server. Returns after Ctrl-C.
pub async fn run<C: Connector>(state: Arc<AppState<C>>) -> Result<(), StorefrontError> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!(
        "Storefront listening on {} as node {}",
        state.args.listen, state.args.node_id
    );

    if !state.db.is_configured() {
        warn!("MONGODB_URI is not set - data routes will answer 503");
    }

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let state = Arc::clone(&state);
                    tokio::spawn(async move {
                        let io = TokioIo::new(stream);

                        let service = service_fn(move |req| {
                            let state = Arc::clone(&state);
                            async move { handle_request(state, addr, req).await }
                        });

                        if let Err(err) = http1::Builder::new()
                            .serve_connection(io, service)
                            .await
                        {
                            error!("Error serving connection from {}: {:?}", addr, err);
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {:?}", e);
                }
            },
            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping listener");
                return Ok(());
            }
        }
    }
}

/// Collect the body and route the request
async fn handle_request<C: Connector>(
    state: Arc<AppState<C>>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    info!("[{}] {} {}", addr, req.method(), req.uri().path());

    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!("Request body error from {}: {}", addr, e);
            return Ok(error_response(StorefrontError::from(e)));
        }
    };

    Ok(route(state, Request::from_parts(parts, body)).await)
}

/// Dispatch a request with a collected body
pub async fn route<C: Connector>(state: Arc<AppState<C>>, req: Request<Bytes>) -> Response<Full<Bytes>> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    if method == Method::OPTIONS {
        return preflight_response();
    }

    match (&method, path.as_str()) {
        (&Method::GET, "/api") => text_response(StatusCode::OK, "API Working"),

        // Liveness - 200 whenever the process is serving
        (&Method::GET, "/health") | (&Method::GET, "/healthz") => routes::health_check(&state).await,

        // Readiness - 200 only with a live cached connection
        (&Method::GET, "/ready") | (&Method::GET, "/readyz") => routes::readiness_check(&state).await,

        (&Method::GET, "/version") => routes::version_info(),

        // Operator diagnostics - always 200, even with the store down
        (&Method::GET, "/api/diagnostics") | (&Method::GET, "/api/debug") => {
            routes::diagnostics(&state).await
        }

        _ => match Resource::from_path(&path) {
            Some(resource) => {
                let conn = match gate::require_connection(&state.db).await {
                    Ok(conn) => conn,
                    Err(response) => return response,
                };
                state.resources.handle(resource, req, conn).await
            }
            None => error_response(StorefrontError::NotFound(path.clone())),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::{FakeConnector, FakeHandle};
    use crate::db::{ConnectionConfig, CredentialPresence};
    use async_trait::async_trait;
    use clap::Parser;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn state_with(fake: &FakeConnector, config: ConnectionConfig) -> Arc<AppState<FakeConnector>> {
        let args = Args::try_parse_from(["storefront"]).unwrap();
        let db = ConnectionManager::new(fake.clone(), config, CredentialPresence::new());
        Arc::new(AppState::new(args, db))
    }

    fn get(path: &str) -> Request<Bytes> {
        Request::builder().uri(path).body(Bytes::new()).unwrap()
    }

    async fn body_json(response: Response<Full<Bytes>>) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    struct CountingHandler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ResourceHandler<FakeHandle> for CountingHandler {
        async fn handle(&self, resource: Resource, _req: Request<Bytes>, conn: Arc<FakeHandle>) -> Response<Full<Bytes>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            crate::server::response::json_response(
                StatusCode::OK,
                &serde_json::json!({ "resource": resource.to_string(), "conn": conn.serial() }),
            )
        }
    }

    #[tokio::test]
    async fn test_api_root_answers() {
        let state = state_with(&FakeConnector::new(), ConnectionConfig::default());
        let response = route(state, get("/api")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"API Working");
    }

    #[tokio::test]
    async fn test_data_route_is_gated_when_unconfigured() {
        let fake = FakeConnector::new();
        let state = state_with(&fake, ConnectionConfig::default());

        let response = route(state, get("/api/product/list")).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let json = body_json(response).await;
        assert_eq!(json["success"], false);
        assert_eq!(fake.establish_count(), 0);
    }

    #[tokio::test]
    async fn test_data_route_reaches_handler_once_connected() {
        let fake = FakeConnector::new();
        let args = Args::try_parse_from(["storefront"]).unwrap();
        let handler = Arc::new(CountingHandler { calls: AtomicUsize::new(0) });
        let db = ConnectionManager::new(
            fake.clone(),
            ConnectionConfig::with_target("mongodb://fake"),
            CredentialPresence::new(),
        );
        let state = Arc::new(AppState::with_resources(args, db, handler.clone()));

        for path in ["/api/cart/get", "/api/order/list"] {
            let response = route(Arc::clone(&state), get(path)).await;
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(body_json(response).await["conn"], 1);
        }

        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
        assert_eq!(fake.establish_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_connect_never_reaches_handler() {
        let fake = FakeConnector::new().failing("connection refused");
        let args = Args::try_parse_from(["storefront"]).unwrap();
        let handler = Arc::new(CountingHandler { calls: AtomicUsize::new(0) });
        let db = ConnectionManager::new(
            fake.clone(),
            ConnectionConfig::with_target("mongodb://fake"),
            CredentialPresence::new(),
        );
        let state = Arc::new(AppState::with_resources(args, db, handler.clone()));

        let response = route(state, get("/api/user/login")).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            body_json(response).await["error"],
            "Database connection failed: connection refused"
        );
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_path_and_preflight() {
        let state = state_with(&FakeConnector::new(), ConnectionConfig::default());

        let response = route(Arc::clone(&state), get("/nope")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert_eq!(json["success"], false);
        assert_eq!(json["message"], "Not found: /nope");

        let preflight = Request::builder()
            .method(Method::OPTIONS)
            .uri("/api/product/add")
            .body(Bytes::new())
            .unwrap();
        let response = route(state, preflight).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("access-control-allow-methods"));
    }
}
