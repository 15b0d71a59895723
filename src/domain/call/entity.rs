//! Call entities

use crate::domain::call::value_object::LegState;
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{Destination, LegId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One leg under orchestration control
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallLeg {
    id: LegId,
    /// Endpoint the leg targets
    endpoint: Destination,
    state: LegState,
    created_at: DateTime<Utc>,
    /// When the leg was answered (if applicable)
    answered_at: Option<DateTime<Utc>>,
    /// When the leg was torn down (if applicable)
    ended_at: Option<DateTime<Utc>>,
}

impl CallLeg {
    pub fn new(id: LegId, endpoint: Destination) -> Self {
        Self::with_state(id, endpoint, LegState::Dialing)
    }

    pub fn with_state(id: LegId, endpoint: Destination, state: LegState) -> Self {
        let now = Utc::now();
        Self {
            id,
            endpoint,
            state,
            created_at: now,
            answered_at: (state == LegState::Up).then_some(now),
            ended_at: None,
        }
    }

    /// Apply a state notification
    pub fn transition_to(&mut self, new_state: LegState) -> Result<()> {
        if !self.state.can_transition_to(new_state) {
            return Err(DomainError::State(format!(
                "Leg {} cannot go from {} to {}",
                self.id, self.state, new_state
            )));
        }

        match new_state {
            LegState::Up => self.answered_at = Some(Utc::now()),
            LegState::Down => self.ended_at = Some(Utc::now()),
            _ => {}
        }
        self.state = new_state;
        Ok(())
    }

    pub fn id(&self) -> &LegId {
        &self.id
    }

    pub fn endpoint(&self) -> &Destination {
        &self.endpoint
    }

    pub fn state(&self) -> LegState {
        self.state
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn answered_at(&self) -> Option<DateTime<Utc>> {
        self.answered_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    pub fn is_down(&self) -> bool {
        self.state.is_terminal()
    }
}
