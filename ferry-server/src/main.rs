use std::sync::Arc;

use anyhow::Context;
use ferry_server::{broadcast::BroadcastRegistry, config::Config, db, server};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ferry_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Ferry server...");

    let config = Config::from_env()?;
    config.validate()?;

    tracing::info!("Connecting to database...");

    let store = db::connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    store
        .ensure_schema()
        .await
        .context("Failed to prepare log schema")?;

    let registry = Arc::new(BroadcastRegistry::with_config(config.broadcast.clone()));
    let _cleanup = registry.spawn_cleanup_task();

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    server::serve(listener, store, registry, &config).await
}
