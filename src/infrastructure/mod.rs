//! Infrastructure layer - Signaling adapters
//!
//! This layer contains:
//! - The ARI adapter (REST client and event feed)
//! - The in-memory signaling server

pub mod ari;
pub mod memory;
