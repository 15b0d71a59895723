//! Interface layer - External interfaces
//!
//! This layer handles:
//! - The operational HTTP endpoints (health, metrics, sessions)
//! - Response formatting

pub mod api;
