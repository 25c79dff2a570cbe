//! Service Module
//!
//! Business logic layer for the server.
//! Services orchestrate between repositories and the broadcast registry.

pub mod log;

// Re-export for convenience
pub use log as log_service;
pub use log::{IngestConfig, IngestError, LogIngestor};
