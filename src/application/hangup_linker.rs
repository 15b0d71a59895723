//! Linked lifecycles for a call group
//!
//! One teardown monitor per member feeds a shared group teardown signal. The
//! first member to go down records itself as the origin and fires the
//! signal; every other member reacts by hanging its own leg up. A group of N
//! legs holds N subscriptions.

use crate::domain::call::{CallGroup, LegEventKind, LegState};
use crate::domain::shared::value_objects::LegId;
use crate::domain::signaling::{LegHandle, Subscription};
use metrics::counter;
use std::sync::{Arc, OnceLock};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How a member monitor ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberOutcome {
    /// The member itself went down and triggered (or joined) the teardown
    TornDown,
    /// The member was hung up because another member went down
    HungUp,
    /// The member was already gone when it was told to hang up
    AlreadyGone,
    /// Hanging the member up failed
    HangupFailed,
    /// The link was dissolved, or the member's feed closed without a
    /// teardown
    Dissolved,
}

/// Shared teardown signal of one group
#[derive(Debug, Default)]
struct GroupTeardown {
    origin: OnceLock<LegId>,
    fired: CancellationToken,
}

impl GroupTeardown {
    /// Record `leg` as going down; true if it is the first
    fn trigger(&self, leg: &LegId) -> bool {
        let first = self.origin.set(leg.clone()).is_ok();
        self.fired.cancel();
        first
    }
}

/// Handle on a linked group. Dropping it leaves the link running.
pub struct LinkedGroup {
    members: Vec<LegId>,
    teardown: Arc<GroupTeardown>,
    stop: CancellationToken,
    monitors: Option<tokio::task::JoinHandle<Vec<(LegId, MemberOutcome)>>>,
}

impl LinkedGroup {
    pub fn members(&self) -> &[LegId] {
        &self.members
    }

    /// Whether this group is actually being monitored
    pub fn is_active(&self) -> bool {
        self.monitors.is_some()
    }

    /// Leg whose teardown brought the group down, once that happened
    pub fn origin(&self) -> Option<&LegId> {
        self.teardown.origin.get()
    }

    /// Stop monitoring without hanging anything up
    pub fn dissolve(&self) {
        self.stop.cancel();
    }

    /// Wait for every member monitor to end
    pub async fn finished(mut self) -> Vec<(LegId, MemberOutcome)> {
        match self.monitors.take() {
            Some(handle) => match handle.await {
                Ok(outcomes) => outcomes,
                Err(e) => {
                    warn!("Hangup link supervisor failed: {}", e);
                    Vec::new()
                }
            },
            None => Vec::new(),
        }
    }
}

pub struct HangupLinker;

impl HangupLinker {
    /// Link the members of `group` so any one going down takes the rest down.
    /// Runs in the background for the lifetime of the group.
    pub fn link(group: CallGroup) -> LinkedGroup {
        Self::link_under(group, &CancellationToken::new())
    }

    /// Like [`link`](Self::link), dissolved when `parent` is cancelled
    pub fn link_under(group: CallGroup, parent: &CancellationToken) -> LinkedGroup {
        let members = group.member_ids();
        let teardown = Arc::new(GroupTeardown::default());
        let stop = parent.child_token();

        if !group.is_linkable() {
            debug!("Group {:?} has fewer than two members, nothing to link", members);
            return LinkedGroup {
                members,
                teardown,
                stop,
                monitors: None,
            };
        }

        let mut tasks = JoinSet::new();
        for leg in group.members() {
            // subscribe now so a teardown racing the spawn is not lost
            let teardowns = leg.subscribe(LegEventKind::Teardown);
            info!("Monitoring hangup of leg {}", leg.id());
            tasks.spawn(watch_member(leg.clone(), teardowns, teardown.clone(), stop.clone()));
        }

        let supervisor = tokio::spawn(async move {
            let mut outcomes = Vec::new();
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(e) => warn!("Hangup monitor task failed: {}", e),
                }
            }
            outcomes
        });

        LinkedGroup {
            members,
            teardown,
            stop,
            monitors: Some(supervisor),
        }
    }
}

/// Monitor one member. Handles at most one meaningful event.
async fn watch_member(
    leg: Arc<dyn LegHandle>,
    mut teardowns: Subscription,
    group: Arc<GroupTeardown>,
    stop: CancellationToken,
) -> (LegId, MemberOutcome) {
    let id = leg.id().clone();

    // a member that went down before the subscription existed sends nothing
    match leg.current_state().await {
        Ok(LegState::Down) if !stop.is_cancelled() => {
            if group.trigger(&id) {
                info!("Leg {} was already down when linked, tearing down its group", id);
            }
            return (id, MemberOutcome::TornDown);
        }
        Ok(_) => {}
        Err(e) => debug!("Could not read state of leg {} while linking: {}", id, e),
    }

    let outcome = tokio::select! {
        biased;
        _ = stop.cancelled() => MemberOutcome::Dissolved,
        event = teardowns.next() => match event {
            Some(_) => {
                if group.trigger(&id) {
                    info!("Leg {} hung up, tearing down its group", id);
                } else {
                    debug!("Leg {} went down after the group teardown started", id);
                }
                MemberOutcome::TornDown
            }
            None => {
                debug!("Teardown feed of leg {} closed", id);
                MemberOutcome::Dissolved
            }
        },
        _ = group.fired.cancelled() => hang_up_member(&leg, group.origin.get()).await,
    };

    (id, outcome)
}

async fn hang_up_member(leg: &Arc<dyn LegHandle>, origin: Option<&LegId>) -> MemberOutcome {
    let origin = origin.map(|o| o.to_string()).unwrap_or_default();
    match leg.hang_up().await {
        Ok(()) => {
            info!("Linked leg {} hung up after {} went down", leg.id(), origin);
            counter!("stasis_linked_hangups_total").increment(1);
            MemberOutcome::HungUp
        }
        Err(e) if e.is_not_found() => {
            debug!("Linked leg {} was already gone", leg.id());
            MemberOutcome::AlreadyGone
        }
        Err(e) => {
            warn!("Failed to hang up linked leg {}: {}", leg.id(), e);
            MemberOutcome::HangupFailed
        }
    }
}
