//! Shared types for Storefront

mod error;

pub use error::{ConnectionError, Result, StorefrontError};
