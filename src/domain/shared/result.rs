//! Domain result type

use super::error::DomainError;

/// Standard result type for orchestration operations
pub type Result<T> = std::result::Result<T, DomainError>;
