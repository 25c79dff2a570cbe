//! Core domain types
//!
//! These types represent build log data as it moves through Ferry: validated
//! on ingestion, persisted by the server, and fanned out to live subscribers.

pub mod log;
