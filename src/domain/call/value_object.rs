//! Call value objects

use serde::{Deserialize, Serialize};
use std::fmt;

/// Leg state as seen by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LegState {
    /// Originated, not yet alerting
    Dialing,
    /// Far end is being alerted
    Ringing,
    /// Answered, media can flow
    Up,
    /// Torn down
    Down,
}

impl LegState {
    /// Map an ARI channel state string.
    ///
    /// Asterisk reports a freshly created, not yet off-hook channel as
    /// `Down`; that is still a live channel here. A leg only becomes
    /// [`LegState::Down`] once the channel is destroyed.
    pub fn from_ari(state: &str) -> Self {
        match state {
            "Up" => LegState::Up,
            "Ring" | "Ringing" => LegState::Ringing,
            _ => LegState::Dialing,
        }
    }

    /// Check if state transition is valid
    pub fn can_transition_to(&self, new_state: LegState) -> bool {
        use LegState::*;

        match (self, new_state) {
            (Down, _) => false,
            (Up, Dialing) | (Up, Ringing) => false,
            (a, b) => *a != b,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LegState::Down)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LegState::Dialing => "Dialing",
            LegState::Ringing => "Ringing",
            LegState::Up => "Up",
            LegState::Down => "Down",
        }
    }
}

impl fmt::Display for LegState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of per-leg notification a subscriber can ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LegEventKind {
    StateChange,
    Teardown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_ari() {
        assert_eq!(LegState::from_ari("Up"), LegState::Up);
        assert_eq!(LegState::from_ari("Ringing"), LegState::Ringing);
        assert_eq!(LegState::from_ari("Ring"), LegState::Ringing);
        assert_eq!(LegState::from_ari("Down"), LegState::Dialing);
        assert_eq!(LegState::from_ari("Dialing Offhook"), LegState::Dialing);
    }

    #[test]
    fn test_valid_state_transitions() {
        assert!(LegState::Dialing.can_transition_to(LegState::Ringing));
        assert!(LegState::Dialing.can_transition_to(LegState::Up));
        assert!(LegState::Ringing.can_transition_to(LegState::Up));
        assert!(LegState::Ringing.can_transition_to(LegState::Down));
        assert!(LegState::Up.can_transition_to(LegState::Down));
    }

    #[test]
    fn test_invalid_state_transitions() {
        assert!(!LegState::Down.can_transition_to(LegState::Up));
        assert!(!LegState::Down.can_transition_to(LegState::Down));
        assert!(!LegState::Up.can_transition_to(LegState::Ringing));
        assert!(!LegState::Ringing.can_transition_to(LegState::Ringing));
    }
}
