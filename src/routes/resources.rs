//! Resource routes (`/api/user`, `/api/product`, `/api/cart`, `/api/order`)
//!
//! The router sends these through the request gate and then hands the live
//! connection to a [`ResourceHandler`]. Record handlers plug in here; the
//! built-in [`UnimplementedResources`] answers 501 for everything.

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Full;
use hyper::{Request, Response, StatusCode};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::server::response::failure_response;

/// Top-level API resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    User,
    Product,
    Cart,
    Order,
}

impl Resource {
    const ALL: [Resource; 4] = [Self::User, Self::Product, Self::Cart, Self::Order];

    pub fn prefix(&self) -> &'static str {
        match self {
            Self::User => "/api/user",
            Self::Product => "/api/product",
            Self::Cart => "/api/cart",
            Self::Order => "/api/order",
        }
    }

    /// Match a request path to its resource, if any
    pub fn from_path(path: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|resource| {
            path.strip_prefix(resource.prefix())
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
        })
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::User => "user",
            Self::Product => "product",
            Self::Cart => "cart",
            Self::Order => "order",
        };
        f.write_str(name)
    }
}

/// Handles a gated resource request with a live connection
#[async_trait]
pub trait ResourceHandler<H: Send + Sync + 'static>: Send + Sync {
    async fn handle(&self, resource: Resource, req: Request<Bytes>, conn: Arc<H>) -> Response<Full<Bytes>>;
}

/// Fallback handler for deployments without record handlers
#[derive(Debug, Default, Clone, Copy)]
pub struct UnimplementedResources;

#[async_trait]
impl<H: Send + Sync + 'static> ResourceHandler<H> for UnimplementedResources {
    async fn handle(&self, resource: Resource, req: Request<Bytes>, _conn: Arc<H>) -> Response<Full<Bytes>> {
        debug!(%resource, method = %req.method(), path = %req.uri().path(), "No handler registered");
        failure_response(
            StatusCode::NOT_IMPLEMENTED,
            &format!("No {} handler is registered", resource),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_path_matches_whole_segments() {
        assert_eq!(Resource::from_path("/api/user"), Some(Resource::User));
        assert_eq!(Resource::from_path("/api/user/login"), Some(Resource::User));
        assert_eq!(Resource::from_path("/api/product/list"), Some(Resource::Product));
        assert_eq!(Resource::from_path("/api/cart/get"), Some(Resource::Cart));
        assert_eq!(Resource::from_path("/api/order/place"), Some(Resource::Order));

        assert_eq!(Resource::from_path("/api/users"), None);
        assert_eq!(Resource::from_path("/api"), None);
        assert_eq!(Resource::from_path("/api/diagnostics"), None);
    }

    #[tokio::test]
    async fn test_unimplemented_answers_501() {
        let req = Request::builder()
            .uri("/api/order/list")
            .body(Bytes::new())
            .unwrap();

        let response = UnimplementedResources
            .handle(Resource::Order, req, Arc::new(()))
            .await;
        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    }
}
