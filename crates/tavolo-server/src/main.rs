//! Tavolo push service binary.
//!
//! Hosts the order-status push dispatcher behind a small HTTP API. The
//! order status updater POSTs `/v1/notify` when an order changes state;
//! everything else (subscribe flow, expiry sweep) lives elsewhere in the
//! storefront.

mod http;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tavolo_push::{PushDispatcher, SqliteSubscriptionStore};
use tavolo_types::ServiceConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Tavolo order push notification service.
#[derive(Parser, Debug)]
#[command(name = "tavolo-server", version, about)]
struct Cli {
    /// Listen address (overrides TAVOLO_LISTEN).
    #[arg(long)]
    listen: Option<String>,

    /// SQLite database path (overrides TAVOLO_DB_PATH).
    #[arg(long)]
    db: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing with env filter (e.g., RUST_LOG=debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let mut config = ServiceConfig::from_env().context("loading configuration")?;
    if let Some(listen) = cli.listen {
        config.listen_addr = listen;
    }
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    let store = SqliteSubscriptionStore::open(&config.db_path)
        .with_context(|| format!("opening subscription store at {}", config.db_path))?;

    let dispatcher = PushDispatcher::new(
        store,
        &config.vapid,
        Duration::from_secs(config.push_timeout_secs),
    )
    .context("initializing push dispatcher")?;

    let app = http::router(Arc::new(dispatcher));

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, "tavolo push service listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .context("HTTP server error")?;

    Ok(())
}
