//! Storefront - e-commerce API backend
//!
//! Serves the user, product, cart and order API over MongoDB. Every
//! data-touching request goes through a request gate that asks the
//! [`ConnectionManager`](db::ConnectionManager) for a live connection first.
//!
//! ## Components
//!
//! - **db**: process-wide connection cache with single-flight establishment,
//!   staleness detection and a non-failing status query
//! - **server**: hyper HTTP server, request gate, response helpers
//! - **routes**: health checks, operator diagnostics, resource dispatch

pub mod config;
pub mod db;
pub mod logging;
pub mod routes;
pub mod server;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{ConnectionError, Result, StorefrontError};
