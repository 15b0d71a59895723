//! Domain errors

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Step of the bridge sequence that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SequenceFailure {
    /// Answering the inbound leg failed
    AnswerFailed,
    /// Creating the mixing point failed
    BridgeCreateFailed,
    /// Adding a member to the mixing point failed
    MemberAddFailed,
}

impl SequenceFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            SequenceFailure::AnswerFailed => "answer-failed",
            SequenceFailure::BridgeCreateFailed => "bridge-create-failed",
            SequenceFailure::MemberAddFailed => "member-add-failed",
        }
    }
}

impl fmt::Display for SequenceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A call into the signaling collaborator failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// The collaborator no longer knows the resource
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    /// Unexpected or unreadable leg state
    #[error("State error: {0}")]
    State(String),

    #[error("Bridge sequence failed ({failure}): {message}")]
    Sequence {
        failure: SequenceFailure,
        message: String,
    },

    #[error("No candidates succeeded: {0}")]
    NoCandidates(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl DomainError {
    pub fn sequence(failure: SequenceFailure, source: &DomainError) -> Self {
        DomainError::Sequence {
            failure,
            message: source.to_string(),
        }
    }

    /// True when the collaborator reported the resource as already gone
    pub fn is_not_found(&self) -> bool {
        matches!(self, DomainError::NotFound(_))
    }

    /// The failed bridge step, if this is a sequence error
    pub fn sequence_failure(&self) -> Option<SequenceFailure> {
        match self {
            DomainError::Sequence { failure, .. } => Some(*failure),
            _ => None,
        }
    }
}
