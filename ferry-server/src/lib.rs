//! Ferry Server
//!
//! Build log ingestion and live distribution for a CI platform.
//!
//! Build agents stream log lines over gRPC; lines are validated, batched and
//! persisted, then fanned out to browsers following the build over
//! server-sent events. Both protocols share one TCP port.

pub mod api;
pub mod broadcast;
pub mod config;
pub mod db;
pub mod mux;
pub mod repository;
pub mod rpc;
pub mod server;
pub mod service;
