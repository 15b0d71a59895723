//! Stasis orchestrator - call control on top of Asterisk ARI
//!
//! Inbound calls entering the Stasis application ring one or more
//! destinations concurrently. The first destination to answer is bridged
//! with the caller and the two legs share one lifetime.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interface;

// Re-export commonly used types
pub use domain::shared::error::DomainError;
pub use domain::shared::result::Result;
