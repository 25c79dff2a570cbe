//! Health Check API Handler
//!
//! Health check endpoint for monitoring, reporting live fan-out load.

use axum::{Json, extract::State};
use serde::Serialize;

use crate::api::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub broadcasters: usize,
}

/// GET /health
/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        broadcasters: state.registry.broadcaster_count(),
    })
}
