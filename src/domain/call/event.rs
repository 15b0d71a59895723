//! Call events

use crate::domain::call::value_object::{LegEventKind, LegState};
use crate::domain::shared::value_objects::LegId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Notification about one leg, delivered through a subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LegEvent {
    /// The leg changed state. `state` is what the notification carried, if
    /// anything; consumers read the authoritative state from the leg.
    StateChanged {
        leg: LegId,
        state: Option<LegState>,
        occurred_at: DateTime<Utc>,
    },
    /// Hangup was requested on the leg or the leg was destroyed
    Teardown {
        leg: LegId,
        cause: Option<String>,
        occurred_at: DateTime<Utc>,
    },
}

impl LegEvent {
    pub fn state_changed(leg: LegId, state: Option<LegState>) -> Self {
        LegEvent::StateChanged {
            leg,
            state,
            occurred_at: Utc::now(),
        }
    }

    pub fn teardown(leg: LegId, cause: Option<String>) -> Self {
        LegEvent::Teardown {
            leg,
            cause,
            occurred_at: Utc::now(),
        }
    }

    pub fn kind(&self) -> LegEventKind {
        match self {
            LegEvent::StateChanged { .. } => LegEventKind::StateChange,
            LegEvent::Teardown { .. } => LegEventKind::Teardown,
        }
    }

    pub fn leg(&self) -> &LegId {
        match self {
            LegEvent::StateChanged { leg, .. } => leg,
            LegEvent::Teardown { leg, .. } => leg,
        }
    }
}

/// Inbound call-start occurrence handed to the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallStart {
    /// Inbound leg
    pub leg: LegId,
    /// Caller number presented by the inbound leg
    pub caller_number: String,
    /// Application the occurrence was delivered to
    pub application: String,
    /// Application arguments; the first one is the dialed number
    pub args: Vec<String>,
    pub occurred_at: DateTime<Utc>,
}

impl CallStart {
    pub fn new(leg: LegId, caller_number: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            leg,
            caller_number: caller_number.into(),
            application: String::new(),
            args,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_application(mut self, application: impl Into<String>) -> Self {
        self.application = application.into();
        self
    }

    pub fn dialed_number(&self) -> Option<&str> {
        self.args
            .first()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }
}
