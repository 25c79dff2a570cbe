//! Data Transfer Objects
//!
//! Lightweight representations of domain entities optimized for network
//! transfer between the Ferry server and its clients.

pub mod log;
