//! One inbound call, start to bridge
//!
//! A session resolves the dialed number into candidates, races them, links
//! the inbound leg with the winner and runs the bridge sequence. Sessions
//! share nothing with each other.

use crate::application::bridge_orchestrator::BridgeOrchestrator;
use crate::application::hangup_linker::HangupLinker;
use crate::application::race_dialer::RaceDialer;
use crate::domain::call::{Bridge, CallGroup, CallStart, LegEventKind, LegState};
use crate::domain::dial_plan::DialPlan;
use crate::domain::shared::error::DomainError;
use crate::domain::shared::value_objects::SessionId;
use crate::domain::signaling::{LegHandle, SignalingClient};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Settings every session of a dispatcher shares
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Application outbound legs are originated into
    pub originate_app: String,
    pub ring_timeout: Duration,
}

/// How a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The occurrence carried no dialed number
    Ignored,
    /// No candidate could be dialed
    NoCandidates,
    /// Nobody answered in time; nothing was bridged
    NoWinner,
    Bridged { bridge: Bridge },
    /// The bridge sequence failed
    Failed(DomainError),
    /// The caller hung up, or the service shut down, before bridging
    Aborted,
}

impl SessionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionOutcome::Ignored => "ignored",
            SessionOutcome::NoCandidates => "no_candidates",
            SessionOutcome::NoWinner => "no_winner",
            SessionOutcome::Bridged { .. } => "bridged",
            SessionOutcome::Failed(_) => "failed",
            SessionOutcome::Aborted => "aborted",
        }
    }
}

pub struct CallSession {
    id: SessionId,
    client: Arc<dyn SignalingClient>,
    dial_plan: Arc<DialPlan>,
    settings: SessionSettings,
}

impl CallSession {
    pub fn new(
        client: Arc<dyn SignalingClient>,
        dial_plan: Arc<DialPlan>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            id: SessionId::new(),
            client,
            dial_plan,
            settings,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Handle one call-start occurrence. `shutdown` aborts the session if it
    /// fires before the bridge exists.
    pub async fn run(self, start: CallStart, shutdown: CancellationToken) -> SessionOutcome {
        let Some(dialed) = start.dialed_number() else {
            debug!(
                "Session {}: call-start on {} has no dialed number, ignoring",
                self.id, start.leg
            );
            return SessionOutcome::Ignored;
        };

        let candidates = self.dial_plan.candidates(dialed);
        info!(
            "Session {}: {} from {} dialed {}, ringing {:?}",
            self.id,
            start.leg,
            start.caller_number,
            dialed,
            candidates.iter().map(|c| c.endpoint()).collect::<Vec<_>>()
        );

        let inbound = self.client.leg(&start.leg);
        // subscribe before the state check so a hangup in between is seen
        let mut inbound_teardown = inbound.subscribe(LegEventKind::Teardown);
        if let Ok(LegState::Down) = inbound.current_state().await {
            info!("Session {}: caller {} already hung up", self.id, start.leg);
            return SessionOutcome::Aborted;
        }

        let race_cancel = shutdown.child_token();
        let dialer = RaceDialer::new(
            self.client.clone(),
            self.settings.originate_app.clone(),
            self.settings.ring_timeout,
        );
        let race = dialer.race(&candidates, &start.caller_number, &race_cancel);
        tokio::pin!(race);

        let mut caller_gone = false;
        let mut watching = true;
        let result = loop {
            tokio::select! {
                result = &mut race => break result,
                event = inbound_teardown.next(), if watching => {
                    watching = false;
                    if event.is_some() {
                        info!("Session {}: caller {} hung up during the race", self.id, start.leg);
                        caller_gone = true;
                        race_cancel.cancel();
                    }
                }
            }
        };
        // the race and the caller's teardown can complete together
        if !caller_gone && inbound_teardown.try_next().is_some() {
            info!("Session {}: caller {} hung up as the race ended", self.id, start.leg);
            caller_gone = true;
        }

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(DomainError::NoCandidates(reason)) => {
                warn!("Session {}: no candidate could be dialed: {}", self.id, reason);
                return SessionOutcome::NoCandidates;
            }
            Err(e) => {
                error!("Session {}: race failed: {}", self.id, e);
                return SessionOutcome::Failed(e);
            }
        };

        let Some(winner) = outcome.winner else {
            if caller_gone || shutdown.is_cancelled() {
                return SessionOutcome::Aborted;
            }
            info!("Session {}: nobody answered {}", self.id, dialed);
            return SessionOutcome::NoWinner;
        };

        if caller_gone || shutdown.is_cancelled() {
            // the winner committed right as the race was cancelled
            info!("Session {}: dropping winner {}, the call is gone", self.id, winner.id());
            if let Err(e) = winner.hang_up().await {
                if !e.is_not_found() {
                    warn!("Session {}: failed to hang up winner {}: {}", self.id, winner.id(), e);
                }
            }
            return SessionOutcome::Aborted;
        }

        let legs: [Arc<dyn LegHandle>; 2] = [inbound.clone(), winner.clone()];
        let linked = HangupLinker::link_under(CallGroup::new(legs), &shutdown);
        // kept until now so no teardown goes unobserved; the linker reads
        // the state of every member once it is watching
        drop(inbound_teardown);
        debug!("Session {}: linked {:?}", self.id, linked.members());

        let mut orchestrator = BridgeOrchestrator::new(self.client.clone());
        match orchestrator.run(&inbound, &[winner]).await {
            Ok(bridge) => {
                info!(
                    "Session {}: bridge {} up with {} members",
                    self.id,
                    bridge.id(),
                    bridge.len()
                );
                SessionOutcome::Bridged { bridge }
            }
            Err(e) => {
                error!("Session {}: bridge sequence failed: {}", self.id, e);
                SessionOutcome::Failed(e)
            }
        }
    }
}
