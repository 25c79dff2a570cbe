//! API Module
//!
//! HTTP API layer for the server.
//! Each submodule handles endpoints for a specific domain.

pub mod error;
pub mod health;
pub mod stream;

use std::sync::Arc;
use std::time::Duration;

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::broadcast::BroadcastRegistry;
use crate::repository::LogStore;

/// Shared state handed to every HTTP handler
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn LogStore>,
    pub registry: Arc<BroadcastRegistry>,
    /// Interval of SSE keep-alive comments; a failed write reveals a gone client
    pub keep_alive: Duration,
}

/// Create the main API router with all endpoints
///
/// Other HTTP surfaces sharing the port can be attached with
/// [`Router::merge`].
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Live build logs
        .route("/api/build/{build_id}/stream", get(stream::stream_build_logs))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
