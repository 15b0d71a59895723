//! Inbound call dispatch
//!
//! Every call-start occurrence becomes its own [`CallSession`] task. Errors
//! inside a session end that session only.

use crate::application::call_session::{CallSession, SessionOutcome, SessionSettings};
use crate::domain::call::CallStart;
use crate::domain::dial_plan::DialPlan;
use crate::domain::signaling::SignalingClient;
use metrics::{counter, gauge};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

pub struct CallDispatcher {
    client: Arc<dyn SignalingClient>,
    dial_plan: Arc<DialPlan>,
    settings: SessionSettings,
    shutdown: CancellationToken,
    sessions: TaskTracker,
    active: Arc<AtomicUsize>,
}

impl CallDispatcher {
    pub fn new(client: Arc<dyn SignalingClient>, dial_plan: DialPlan, settings: SessionSettings) -> Self {
        Self {
            client,
            dial_plan: Arc::new(dial_plan),
            settings,
            shutdown: CancellationToken::new(),
            sessions: TaskTracker::new(),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Sessions currently being set up
    pub fn active_sessions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Shared counter behind [`active_sessions`](Self::active_sessions)
    pub fn active_counter(&self) -> Arc<AtomicUsize> {
        self.active.clone()
    }

    /// Token that aborts every running session when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Start a session for `start` and return right away. Occurrences
    /// without a dialed number are dropped here.
    pub fn handle_inbound_call(&self, start: CallStart) -> Option<JoinHandle<SessionOutcome>> {
        if start.dialed_number().is_none() {
            debug!("Call-start on {} has no arguments, ignoring", start.leg);
            counter!("stasis_sessions_total", "outcome" => SessionOutcome::Ignored.as_str()).increment(1);
            return None;
        }

        let session = CallSession::new(self.client.clone(), self.dial_plan.clone(), self.settings.clone());
        let session_id = session.id();
        let shutdown = self.shutdown.child_token();
        let active = self.active.clone();

        active.fetch_add(1, Ordering::SeqCst);
        gauge!("stasis_active_sessions").increment(1.0);
        info!("Session {} started for leg {}", session_id, start.leg);

        Some(self.sessions.spawn(async move {
            let outcome = session.run(start, shutdown).await;

            active.fetch_sub(1, Ordering::SeqCst);
            gauge!("stasis_active_sessions").decrement(1.0);
            counter!("stasis_sessions_total", "outcome" => outcome.as_str()).increment(1);
            info!("Session {} finished: {}", session_id, outcome.as_str());
            outcome
        }))
    }

    /// Dispatch occurrences until the feed closes or `stop` fires, then
    /// cancel the running sessions and wait for them
    pub async fn run(&self, mut calls: mpsc::UnboundedReceiver<CallStart>, stop: CancellationToken) {
        info!("Dispatching inbound calls");

        loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    info!("Dispatcher stopping");
                    break;
                }
                start = calls.recv() => match start {
                    Some(start) => {
                        self.handle_inbound_call(start);
                    }
                    None => {
                        info!("Call-start feed closed");
                        break;
                    }
                },
            }
        }

        self.shutdown.cancel();
        self.sessions.close();
        self.sessions.wait().await;
        info!("All sessions finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::call::LegState;
    use crate::infrastructure::memory::MemorySignaling;
    use std::collections::HashMap;
    use std::time::Duration;

    fn dispatcher(signaling: &MemorySignaling) -> CallDispatcher {
        CallDispatcher::new(
            Arc::new(signaling.clone()),
            DialPlan::new("PJSIP/{}", HashMap::new()),
            SessionSettings {
                originate_app: "callChildrens".to_string(),
                ring_timeout: Duration::from_secs(20),
            },
        )
    }

    #[tokio::test]
    async fn test_occurrence_without_args_is_dropped() {
        let signaling = MemorySignaling::new();
        let dispatcher = dispatcher(&signaling);

        let handle = dispatcher.handle_inbound_call(CallStart::new("inbound".into(), "2000", Vec::new()));
        assert!(handle.is_none());
        assert_eq!(dispatcher.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_session_runs_in_background() {
        let signaling = MemorySignaling::new();
        signaling.add_leg("inbound", LegState::Ringing);
        let dispatcher = dispatcher(&signaling);

        let handle = dispatcher
            .handle_inbound_call(CallStart::new("inbound".into(), "2000", vec!["1101".to_string()]))
            .unwrap();
        assert_eq!(dispatcher.active_sessions(), 1);

        signaling.wait_for_originated("PJSIP/1101").await.set_state(LegState::Up);

        assert!(matches!(handle.await.unwrap(), SessionOutcome::Bridged { .. }));
        assert_eq!(dispatcher.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_run_stops_sessions_when_feed_closes() {
        let signaling = MemorySignaling::new();
        signaling.add_leg("inbound", LegState::Ringing);
        let dispatcher = dispatcher(&signaling);

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(CallStart::new("inbound".into(), "2000", vec!["1101".to_string()]))
            .unwrap();
        drop(tx);

        // the session is cancelled mid-race once the feed is gone
        dispatcher.run(rx, CancellationToken::new()).await;

        assert_eq!(dispatcher.active_sessions(), 0);
        let legs = signaling.originated();
        assert!(legs.iter().all(|leg| leg.state() == LegState::Down));
    }
}
