//! Wait for any of a set of legs to reach a target state
//!
//! One monitoring task per leg, fanned in through a [`JoinSet`]. The first
//! task to finish with a hit is the winner; dropping the set aborts the rest
//! and releases their subscriptions, on the success path and on timeout.

use crate::domain::call::{LegEventKind, LegState};
use crate::domain::shared::value_objects::LegId;
use crate::domain::signaling::{LegHandle, Subscription};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Outcome of [`StateWaiter::wait_for_any`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitResult {
    pub success: bool,
    /// Leg that reached the target state first (only on success)
    pub leg: Option<LegId>,
}

impl WaitResult {
    pub fn reached(leg: LegId) -> Self {
        Self {
            success: true,
            leg: Some(leg),
        }
    }

    pub fn failed() -> Self {
        Self {
            success: false,
            leg: None,
        }
    }
}

/// Follows one leg's state through its state-change notifications
pub(crate) struct LegMonitor {
    leg: Arc<dyn LegHandle>,
    states: Subscription,
    primed: bool,
}

impl LegMonitor {
    pub(crate) fn new(leg: Arc<dyn LegHandle>) -> Self {
        let states = leg.subscribe(LegEventKind::StateChange);
        Self {
            leg,
            states,
            primed: false,
        }
    }

    pub(crate) fn leg(&self) -> &Arc<dyn LegHandle> {
        &self.leg
    }

    /// Next observed state, or `None` when the notification feed closed.
    ///
    /// The first call reads the state right away so a leg that changed before
    /// the subscription existed is not missed. Read failures are logged and
    /// the monitor keeps waiting for the next notification.
    pub(crate) async fn next_state(&mut self) -> Option<LegState> {
        if !self.primed {
            self.primed = true;
            if let Some(state) = self.read_state().await {
                return Some(state);
            }
        }

        loop {
            self.states.next().await?;
            if let Some(state) = self.read_state().await {
                return Some(state);
            }
        }
    }

    async fn read_state(&self) -> Option<LegState> {
        match self.leg.current_state().await {
            Ok(state) => {
                debug!("Leg {} state is {}", self.leg.id(), state);
                Some(state)
            }
            Err(e) => {
                warn!("Failed to read state of leg {}: {}", self.leg.id(), e);
                None
            }
        }
    }

    /// Wait until the leg reaches `target`. Gives up (returns `false`) if the
    /// leg goes down first or its feed closes.
    pub(crate) async fn reach(&mut self, target: LegState) -> bool {
        while let Some(state) = self.next_state().await {
            if state == target {
                return true;
            }
            if state.is_terminal() {
                debug!("Leg {} went down while waiting for {}", self.leg.id(), target);
                return false;
            }
        }
        false
    }
}

/// Group barrier over leg states
pub struct StateWaiter;

impl StateWaiter {
    /// Block until the first leg reaches `target` or `timeout` elapses.
    ///
    /// Returns early with a failure when every monitored leg has gone down.
    pub async fn wait_for_any(
        legs: &[Arc<dyn LegHandle>],
        target: LegState,
        timeout: Duration,
    ) -> WaitResult {
        if legs.is_empty() {
            warn!("wait_for_any called without legs");
            return WaitResult::failed();
        }
        if timeout.is_zero() {
            warn!("wait_for_any called with a zero timeout");
            return WaitResult::failed();
        }

        debug!(
            "Waiting for any of {} legs to reach {} (timeout {:?})",
            legs.len(),
            target,
            timeout
        );

        let mut monitors = JoinSet::new();
        for leg in legs {
            // subscribe before spawning so nothing published after this
            // point is missed
            let mut monitor = LegMonitor::new(leg.clone());
            monitors.spawn(async move {
                let reached = monitor.reach(target).await;
                reached.then(|| monitor.leg().id().clone())
            });
        }

        let first_hit = async {
            while let Some(joined) = monitors.join_next().await {
                match joined {
                    Ok(Some(leg)) => return Some(leg),
                    Ok(None) => continue,
                    Err(e) => warn!("Leg monitor task failed: {}", e),
                }
            }
            None
        };

        let result = match tokio::time::timeout(timeout, first_hit).await {
            Ok(Some(leg)) => {
                debug!("Leg {} reached {}", leg, target);
                WaitResult::reached(leg)
            }
            Ok(None) => {
                debug!("Every leg stopped before reaching {}", target);
                WaitResult::failed()
            }
            Err(_) => {
                debug!("Timed out after {:?} waiting for {}", timeout, target);
                WaitResult::failed()
            }
        };

        monitors.shutdown().await;
        result
    }
}
