//! Configuration for Storefront
//!
//! CLI arguments and environment variable handling using clap.
//! Every flag falls back to an environment variable, and `main` loads a
//! `.env` file first, so a bare `storefront` picks up the usual deployment env.

use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::time::Duration;
use uuid::Uuid;

use crate::db::{ConnectionConfig, CredentialPresence};
use crate::types::{Result, StorefrontError};

/// Storefront - e-commerce API backend
#[derive(Parser, Debug, Clone)]
#[command(name = "storefront")]
#[command(about = "E-commerce API backend over MongoDB")]
pub struct Args {
    /// Unique identifier for this instance (shows up in logs and /health)
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:4000")]
    pub listen: SocketAddr,

    /// MongoDB connection URI. When unset the server still starts, but every
    /// data route answers 503 and diagnostics report `configured: false`.
    #[arg(long, env = "MONGODB_URI")]
    pub mongodb_uri: Option<String>,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "e-commerce")]
    pub mongodb_db: String,

    /// How long the driver may spend finding a reachable server
    #[arg(long, env = "SERVER_SELECTION_TIMEOUT_MS", default_value = "10000")]
    pub server_selection_timeout_ms: u64,

    /// Idle limit for pooled sockets
    #[arg(long, env = "SOCKET_TIMEOUT_MS", default_value = "45000")]
    pub socket_timeout_ms: u64,

    /// Maximum connections in the driver pool
    #[arg(long, env = "MAX_POOL_SIZE", default_value = "10")]
    pub max_pool_size: u32,

    /// Pause allowed for a connection to settle into the connected state
    /// before it is judged stale
    #[arg(long, env = "GRACE_WAIT_MS", default_value = "1000")]
    pub grace_wait_ms: u64,

    /// Cloudinary cloud name (presence only is reported)
    #[arg(long, env = "CLOUDINARY_NAME", hide_env_values = true)]
    pub cloudinary_name: Option<String>,

    /// Cloudinary API key (presence only is reported)
    #[arg(long, env = "CLOUDINARY_API_KEY", hide_env_values = true)]
    pub cloudinary_api_key: Option<String>,

    /// Cloudinary API secret (presence only is reported)
    #[arg(long, env = "CLOUDINARY_SECRET_KEY", hide_env_values = true)]
    pub cloudinary_secret_key: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

impl Args {
    /// Build the connection manager configuration
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            target: self.mongodb_uri.clone(),
            db_name: self.mongodb_db.clone(),
            server_selection_timeout: Duration::from_millis(self.server_selection_timeout_ms),
            socket_idle_timeout: Duration::from_millis(self.socket_timeout_ms),
            max_pool_size: self.max_pool_size,
            grace_wait: Duration::from_millis(self.grace_wait_ms),
        }
    }

    /// Presence of each watched credential, never the values
    pub fn credentials(&self) -> CredentialPresence {
        CredentialPresence::new()
            .watch("MONGODB_URI", self.mongodb_uri.is_some())
            .watch("CLOUDINARY_NAME", self.cloudinary_name.is_some())
            .watch("CLOUDINARY_API_KEY", self.cloudinary_api_key.is_some())
            .watch("CLOUDINARY_SECRET_KEY", self.cloudinary_secret_key.is_some())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if let Some(uri) = &self.mongodb_uri {
            if uri.trim().is_empty() {
                return Err(StorefrontError::Config("MONGODB_URI is set but empty".into()));
            }
        }

        if self.server_selection_timeout_ms == 0 || self.socket_timeout_ms == 0 {
            return Err(StorefrontError::Config(
                "Connection timeouts must be greater than zero".into(),
            ));
        }

        if self.max_pool_size == 0 {
            return Err(StorefrontError::Config("MAX_POOL_SIZE must be at least 1".into()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["storefront"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults_match_driver_expectations() {
        let args = parse(&["--mongodb-uri", "mongodb://db:27017"]);
        let config = args.connection_config();

        assert_eq!(config.target.as_deref(), Some("mongodb://db:27017"));
        assert_eq!(config.db_name, "e-commerce");
        assert_eq!(config.server_selection_timeout, Duration::from_secs(10));
        assert_eq!(config.socket_idle_timeout, Duration::from_secs(45));
        assert_eq!(config.max_pool_size, 10);
        assert_eq!(config.grace_wait, Duration::from_secs(1));
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_credentials_report_presence_only() {
        let args = parse(&["--cloudinary-name", "shop", "--cloudinary-secret-key", "s3cr3t"]);
        let creds = args.credentials();

        let rendered = serde_json::to_string(&creds.as_env_report()).unwrap();
        assert!(!rendered.contains("s3cr3t"));
        assert_eq!(creds.is_set("CLOUDINARY_NAME"), Some(true));
        assert_eq!(creds.is_set("CLOUDINARY_API_KEY"), Some(false));
        assert_eq!(creds.is_set("MONGODB_URI"), Some(false));
    }

    #[test]
    fn test_validate_rejects_empty_uri_and_zero_pool() {
        let args = parse(&["--mongodb-uri", "  "]);
        assert!(args.validate().is_err());

        let args = parse(&["--max-pool-size", "0"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_missing_uri_is_not_a_startup_error() {
        let args = parse(&[]);
        assert!(args.validate().is_ok());
        assert!(args.connection_config().target.is_none());
    }
}
