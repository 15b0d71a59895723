//! Domain layer - Core call-control model and ports
//!
//! This layer contains:
//! - Entities and value objects: legs, groups, bridges, identifiers
//! - Events: leg notifications and inbound call-start occurrences
//! - Ports: the signaling traits the orchestration consumes
//! - The dial plan

pub mod call;
pub mod dial_plan;
pub mod shared;
pub mod signaling;

// Re-export commonly used types
pub use shared::{DomainError, Result};
