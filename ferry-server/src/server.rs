//! Server assembly
//!
//! Wires the log store, broadcast registry, HTTP router and RPC service onto
//! one multiplexed listener.

use std::sync::Arc;

use tokio::net::TcpListener;

use crate::api::{self, AppState};
use crate::broadcast::BroadcastRegistry;
use crate::config::Config;
use crate::mux::Multiplexer;
use crate::repository::LogStore;
use crate::rpc;
use crate::service::LogIngestor;

/// Serve the HTTP API and the RPC service on `listener` until either fails
///
/// Binding is the caller's job so bind errors surface before anything starts.
pub async fn serve(
    listener: TcpListener,
    store: Arc<dyn LogStore>,
    registry: Arc<BroadcastRegistry>,
    config: &Config,
) -> anyhow::Result<()> {
    let (http_listener, rpc_incoming, accept_task) =
        Multiplexer::new(listener, config.mux.clone()).split()?;

    let app = api::create_router(AppState {
        store: Arc::clone(&store),
        registry: Arc::clone(&registry),
        keep_alive: config.keep_alive,
    });
    let ingestor = LogIngestor::new(store, registry, config.ingest.clone());

    let http = async {
        axum::serve(http_listener, app).await?;
        anyhow::Ok(())
    };
    let rpc = async {
        tonic::transport::Server::builder()
            .add_service(rpc::builds_server(ingestor))
            .serve_with_incoming(rpc_incoming)
            .await?;
        anyhow::Ok(())
    };

    let result = tokio::try_join!(http, rpc).map(|_| ());
    accept_task.abort();
    result
}
