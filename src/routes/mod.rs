//! HTTP routes for Storefront

pub mod diagnostics;
pub mod health;
pub mod resources;

pub use diagnostics::{diagnostics, DiagnosticsResponse};
pub use health::{health_check, readiness_check, version_info};
pub use resources::{Resource, ResourceHandler, UnimplementedResources};
