//! Error types for Storefront

use hyper::StatusCode;

/// Failure to obtain a live database connection.
///
/// Cloned to every caller joined on the same connection attempt, so the
/// payload is kept as plain strings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// No connection target was configured. Never retried automatically.
    #[error("MONGODB_URI environment variable is not set")]
    ConfigurationMissing,

    /// The underlying connect (or the post-connect liveness check) failed.
    #[error("Database connection failed: {0}")]
    EstablishmentFailed(String),
}

/// Errors the HTTP layer answers with.
///
/// Each variant maps to one status code, and [`error_response`] renders it as
/// the API's `{success:false, message}` body.
///
/// [`error_response`]: crate::server::response::error_response
#[derive(Debug, thiserror::Error)]
pub enum StorefrontError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl StorefrontError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Connection(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Convert to status code and body tuple for HTTP response
    pub fn into_status_code_and_body(self) -> (StatusCode, String) {
        let status = self.status_code();
        let body = self.to_string();
        (status, body)
    }
}

impl From<std::io::Error> for StorefrontError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

/// Only raised while collecting a request body, which is the client's fault
impl From<hyper::Error> for StorefrontError {
    fn from(err: hyper::Error) -> Self {
        Self::BadRequest(format!("Failed to read request body: {}", err))
    }
}

/// Result type alias for Storefront operations
pub type Result<T> = std::result::Result<T, StorefrontError>;
