//! Race outbound dial attempts
//!
//! Every candidate is originated and monitored in its own task. The first leg
//! to reach Up claims the winner slot; every other candidate is then
//! cancelled and hangs its own leg up. One shared deadline bounds the race.

use crate::application::state_waiter::LegMonitor;
use crate::domain::call::LegState;
use crate::domain::shared::error::{DomainError, SequenceFailure};
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{Destination, LegId};
use crate::domain::signaling::{BridgeHandle, LegHandle, OriginateRequest, SignalingClient};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How one candidate's attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateResolution {
    /// Origination itself failed, no leg exists
    OriginateFailed,
    /// Answered first and holds the winner slot
    Won,
    /// Cancelled before answering; its leg was hung up
    Cancelled,
    /// Answered after another candidate had already won; its leg was hung up
    Lost,
    /// The leg went down on its own before answering
    Ended,
}

/// Per-candidate summary of a race
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateReport {
    pub destination: Destination,
    pub leg: Option<LegId>,
    pub resolution: CandidateResolution,
}

#[derive(Debug, Default)]
enum SlotState {
    #[default]
    Open,
    Claimed(LegId),
    Closed,
}

/// Single-writer winner slot: the first claim wins, later claims are refused.
/// Closing the slot refuses every claim from then on.
#[derive(Debug, Default)]
pub struct WinnerSlot(Mutex<SlotState>);

impl WinnerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SlotState> {
        self.0.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Claim the slot for `leg`. True only for the first caller, and only
    /// while the slot is open and `cancel` has not fired.
    pub fn try_claim(&self, leg: &LegId, cancel: &CancellationToken) -> bool {
        let mut state = self.state();
        if cancel.is_cancelled() || !matches!(*state, SlotState::Open) {
            return false;
        }
        *state = SlotState::Claimed(leg.clone());
        true
    }

    /// Refuse all further claims. Returns the winner if one claimed first.
    pub fn close(&self) -> Option<LegId> {
        let mut state = self.state();
        match &*state {
            SlotState::Claimed(leg) => Some(leg.clone()),
            _ => {
                *state = SlotState::Closed;
                None
            }
        }
    }

    pub fn winner(&self) -> Option<LegId> {
        match &*self.state() {
            SlotState::Claimed(leg) => Some(leg.clone()),
            _ => None,
        }
    }
}

/// Result of a race that had at least one candidate originate
pub struct RaceOutcome {
    /// Winning leg, if any candidate answered in time
    pub winner: Option<Arc<dyn LegHandle>>,
    /// The deadline expired before anybody answered
    pub timed_out: bool,
    /// Reports in candidate order
    pub candidates: Vec<CandidateReport>,
}

impl RaceOutcome {
    pub fn winner_id(&self) -> Option<&LegId> {
        self.winner.as_ref().map(|w| w.id())
    }

    pub fn has_winner(&self) -> bool {
        self.winner.is_some()
    }

    pub fn count(&self, resolution: CandidateResolution) -> usize {
        self.candidates
            .iter()
            .filter(|c| c.resolution == resolution)
            .count()
    }
}

impl fmt::Debug for RaceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RaceOutcome")
            .field("winner", &self.winner_id())
            .field("timed_out", &self.timed_out)
            .field("candidates", &self.candidates)
            .finish()
    }
}

/// Dials candidates concurrently and keeps only the first to answer
pub struct RaceDialer {
    client: Arc<dyn SignalingClient>,
    originate_app: String,
    timeout: Duration,
    bridge: Option<Arc<dyn BridgeHandle>>,
}

impl RaceDialer {
    pub fn new(
        client: Arc<dyn SignalingClient>,
        originate_app: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            originate_app: originate_app.into(),
            timeout,
            bridge: None,
        }
    }

    /// Add the winner to this bridge as soon as it is declared
    pub fn with_bridge(mut self, bridge: Arc<dyn BridgeHandle>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    /// Run the race.
    ///
    /// Returns [`DomainError::NoCandidates`] when no destination could be
    /// originated. Nobody answering before the deadline, or `cancel` firing,
    /// is a normal outcome without a winner.
    pub async fn race(
        &self,
        destinations: &[Destination],
        caller_identity: &str,
        cancel: &CancellationToken,
    ) -> Result<RaceOutcome> {
        if destinations.is_empty() {
            return Err(DomainError::NoCandidates("no destinations to dial".to_string()));
        }

        info!(
            "Racing {} candidates for caller {} (timeout {:?})",
            destinations.len(),
            caller_identity,
            self.timeout
        );

        let race_token = cancel.child_token();
        let slot = Arc::new(WinnerSlot::new());
        let mut tokens = Vec::with_capacity(destinations.len());
        let mut tasks = JoinSet::new();

        for (index, destination) in destinations.iter().enumerate() {
            let token = race_token.child_token();
            tokens.push(token.clone());

            let request = OriginateRequest {
                destination: destination.clone(),
                caller_identity: caller_identity.to_string(),
                app: self.originate_app.clone(),
            };
            let client = self.client.clone();
            let slot = slot.clone();

            tasks.spawn(async move {
                let (leg, resolution) = run_candidate(client, request, slot, token).await;
                (index, leg, resolution)
            });
        }

        let mut reports: Vec<Option<CandidateReport>> = vec![None; destinations.len()];
        let mut winner: Option<Arc<dyn LegHandle>> = None;
        let mut timed_out = false;
        let mut bridge_error: Option<DomainError> = None;

        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                joined = tasks.join_next() => {
                    let Some(joined) = joined else { break };
                    let (index, leg, resolution) = match joined {
                        Ok(done) => done,
                        Err(e) => {
                            error!("Candidate task failed: {}", e);
                            continue;
                        }
                    };

                    if resolution == CandidateResolution::Won {
                        if let Some(leg) = leg.clone() {
                            info!(
                                "Candidate {} won the race with leg {}",
                                destinations[index],
                                leg.id()
                            );
                            // the winner joins the bridge before the others are let go
                            if let Some(bridge) = &self.bridge {
                                match bridge.add_member(leg.id()).await {
                                    Ok(()) => {
                                        info!("Winner {} added to bridge {}", leg.id(), bridge.id())
                                    }
                                    Err(e) => {
                                        error!(
                                            "Failed to add winner {} to bridge {}: {}",
                                            leg.id(),
                                            bridge.id(),
                                            e
                                        );
                                        bridge_error = Some(e);
                                    }
                                }
                            }
                            for (other, token) in tokens.iter().enumerate() {
                                if other != index {
                                    token.cancel();
                                }
                            }
                            winner = Some(leg);
                        }
                    }

                    reports[index] = Some(CandidateReport {
                        destination: destinations[index].clone(),
                        leg: leg.map(|l| l.id().clone()),
                        resolution,
                    });
                }
                _ = &mut deadline, if !timed_out && winner.is_none() => {
                    timed_out = true;
                    match slot.close() {
                        Some(leg) => debug!("Leg {} claimed the race right at the deadline", leg),
                        None => warn!(
                            "No candidate answered within {:?}, cancelling the race",
                            self.timeout
                        ),
                    }
                    race_token.cancel();
                }
            }
        }

        let candidates: Vec<CandidateReport> = reports
            .into_iter()
            .enumerate()
            .map(|(index, report)| {
                report.unwrap_or_else(|| CandidateReport {
                    destination: destinations[index].clone(),
                    leg: None,
                    resolution: CandidateResolution::OriginateFailed,
                })
            })
            .collect();

        if candidates
            .iter()
            .all(|c| c.resolution == CandidateResolution::OriginateFailed)
        {
            counter!("stasis_races_total", "outcome" => "no_candidates").increment(1);
            return Err(DomainError::NoCandidates(format!(
                "all {} originations failed",
                candidates.len()
            )));
        }

        if let Some(e) = bridge_error {
            if let Some(leg) = &winner {
                hang_up(leg).await;
            }
            counter!("stasis_races_total", "outcome" => "bridge_failed").increment(1);
            return Err(DomainError::sequence(SequenceFailure::MemberAddFailed, &e));
        }

        // a winner committed right as the deadline fired still counts
        let timed_out = timed_out && winner.is_none();
        let outcome = if winner.is_some() {
            "winner"
        } else if timed_out {
            "timeout"
        } else {
            "no_winner"
        };
        counter!("stasis_races_total", "outcome" => outcome).increment(1);

        Ok(RaceOutcome {
            winner,
            timed_out,
            candidates,
        })
    }
}

/// Originate and follow one candidate until it wins, is cancelled, loses or
/// its leg goes away
async fn run_candidate(
    client: Arc<dyn SignalingClient>,
    request: OriginateRequest,
    slot: Arc<WinnerSlot>,
    cancel: CancellationToken,
) -> (Option<Arc<dyn LegHandle>>, CandidateResolution) {
    let destination = request.destination.clone();
    let leg = match client.originate(request).await {
        Ok(leg) => leg,
        Err(e) => {
            warn!("Failed to originate call to {}: {}", destination, e);
            counter!("stasis_originate_failures_total").increment(1);
            return (None, CandidateResolution::OriginateFailed);
        }
    };
    info!("Call originated to {} on leg {}", destination, leg.id());

    let mut monitor = LegMonitor::new(leg.clone());
    loop {
        let observed = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Cancelling call to {}", destination);
                hang_up(&leg).await;
                return (Some(leg), CandidateResolution::Cancelled);
            }
            observed = monitor.next_state() => observed,
        };

        match observed {
            Some(LegState::Up) => {
                if slot.try_claim(leg.id(), &cancel) {
                    return (Some(leg), CandidateResolution::Won);
                }
                hang_up(&leg).await;
                if slot.winner().is_some() {
                    info!("Leg {} answered after the race was decided", leg.id());
                    return (Some(leg), CandidateResolution::Lost);
                }
                info!("Leg {} answered after the race was called off", leg.id());
                return (Some(leg), CandidateResolution::Cancelled);
            }
            Some(LegState::Down) | None => {
                debug!("Leg {} to {} ended before answering", leg.id(), destination);
                return (Some(leg), CandidateResolution::Ended);
            }
            Some(_) => continue,
        }
    }
}

async fn hang_up(leg: &Arc<dyn LegHandle>) {
    match leg.hang_up().await {
        Ok(()) => debug!("Leg {} hung up", leg.id()),
        Err(e) if e.is_not_found() => debug!("Leg {} was already gone", leg.id()),
        Err(e) => error!("Failed to hang up leg {}: {}", leg.id(), e),
    }
}
