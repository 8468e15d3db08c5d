//! HTTP server, request gate and response helpers

pub mod gate;
pub mod http;
pub mod response;

pub use http::{route, run, AppState};
