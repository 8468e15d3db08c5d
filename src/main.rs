//! Storefront - e-commerce API backend

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

use storefront::{
    config::Args,
    db::{ConnectionManager, MongoConnector},
    logging, server,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    logging::init(&args.log_level, args.log_format)?;

    if let Err(e) = args.validate() {
        error!("{}", e);
        std::process::exit(1);
    }

    let config = args.connection_config();

    info!("======================================");
    info!("  Storefront API");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Listen: {}", args.listen);
    info!("MongoDB: {}", if config.target.is_some() { "configured" } else { "NOT SET" });
    info!("Database: {}", config.db_name);
    info!(
        "Timeouts: server selection {}ms, socket idle {}ms, grace {}ms",
        config.server_selection_timeout.as_millis(),
        config.socket_idle_timeout.as_millis(),
        config.grace_wait.as_millis()
    );
    info!("======================================");

    // Lazy: the first data request (or diagnostics call) opens the connection
    let db = ConnectionManager::new(MongoConnector::default(), config, args.credentials());

    let state = Arc::new(server::AppState::new(args, db));
    server::run(state).await?;

    Ok(())
}
