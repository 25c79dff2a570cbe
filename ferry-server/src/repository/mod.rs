//! Repository Module
//!
//! Data access layer for the server.

pub mod log_store;

pub use log_store::{LogStore, PgLogStore, SqliteLogStore, StoreError};
