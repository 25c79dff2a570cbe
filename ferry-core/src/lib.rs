//! Ferry Core
//!
//! Core types shared by the Ferry log server and its clients.
//!
//! This crate contains:
//! - Domain types: log lines before and after persistence
//! - DTOs: wire representations pushed to live log subscribers

pub mod domain;
pub mod dto;
