//! In-memory signaling server
//!
//! Implements the signaling ports without any network. Legs and bridges live
//! in process; tests (and local dry runs) drive them through the inherent
//! methods: change states, hang legs up remotely, inject failures, and count
//! the instructions the orchestration issued.

use crate::domain::call::{CallLeg, LegEvent, LegEventKind, LegState};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{BridgeId, Destination, LegId};
use crate::domain::signaling::{BridgeHandle, LegHandle, OriginateRequest, SignalingClient, Subscription};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, Notify};
use tracing::debug;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct Inner {
    legs: Mutex<HashMap<LegId, Arc<MemoryLeg>>>,
    originated: Mutex<Vec<Arc<MemoryLeg>>>,
    requests: Mutex<Vec<OriginateRequest>>,
    unreachable: Mutex<HashSet<String>>,
    bridges: Mutex<Vec<Arc<MemoryBridge>>>,
    fail_bridge_creation: AtomicBool,
    /// 1-based add attempt that fails on new bridges, 0 for none
    fail_member_add_at: AtomicUsize,
    originated_notify: Notify,
}

/// Process-local signaling server. Clones share the same state.
#[derive(Clone, Default)]
pub struct MemorySignaling {
    inner: Arc<Inner>,
}

impl MemorySignaling {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an existing leg, e.g. an inbound caller
    pub fn add_leg(&self, id: &str, state: LegState) -> Arc<MemoryLeg> {
        let id = LegId::new(id);
        let leg = Arc::new(MemoryLeg::new(CallLeg::with_state(
            id.clone(),
            Destination::new(id.as_str()),
            state,
        )));
        lock(&self.inner.legs).insert(id, leg.clone());
        leg
    }

    /// Registered leg by id
    pub fn find_leg(&self, id: &LegId) -> Option<Arc<MemoryLeg>> {
        lock(&self.inner.legs).get(id).cloned()
    }

    /// Legs created by `originate`, in origination order
    pub fn originated(&self) -> Vec<Arc<MemoryLeg>> {
        lock(&self.inner.originated).clone()
    }

    /// Every originate request received, including failed ones
    pub fn originate_requests(&self) -> Vec<OriginateRequest> {
        lock(&self.inner.requests).clone()
    }

    /// Wait until a leg has been originated towards `endpoint`
    pub async fn wait_for_originated(&self, endpoint: &str) -> Arc<MemoryLeg> {
        loop {
            let notified = self.inner.originated_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let found = lock(&self.inner.originated)
                .iter()
                .find(|leg| leg.endpoint().endpoint() == endpoint)
                .cloned();
            if let Some(leg) = found {
                return leg;
            }
            notified.await;
        }
    }

    /// Originations towards `endpoint` fail from now on
    pub fn fail_originate_to(&self, endpoint: &str) {
        lock(&self.inner.unreachable).insert(endpoint.to_string());
    }

    pub fn fail_bridge_creation(&self) {
        self.inner.fail_bridge_creation.store(true, Ordering::SeqCst);
    }

    /// The `attempt`-th member add (1-based) on bridges created from now on
    /// fails
    pub fn fail_member_add_at(&self, attempt: usize) {
        self.inner.fail_member_add_at.store(attempt, Ordering::SeqCst);
    }

    pub fn bridges(&self) -> Vec<Arc<MemoryBridge>> {
        lock(&self.inner.bridges).clone()
    }
}

#[async_trait]
impl SignalingClient for MemorySignaling {
    async fn originate(&self, request: OriginateRequest) -> Result<Arc<dyn LegHandle>> {
        lock(&self.inner.requests).push(request.clone());

        let endpoint = request.destination.endpoint().to_string();
        if lock(&self.inner.unreachable).contains(&endpoint) {
            return Err(DomainError::Transport(format!("cannot originate to {}", endpoint)));
        }

        let id = LegId::generate();
        let leg = Arc::new(MemoryLeg::new(CallLeg::new(id.clone(), request.destination)));
        lock(&self.inner.legs).insert(id.clone(), leg.clone());
        lock(&self.inner.originated).push(leg.clone());
        self.inner.originated_notify.notify_waiters();

        debug!("Originated leg {} to {}", id, endpoint);
        Ok(leg)
    }

    async fn create_mixing_point(&self, scope: &LegId) -> Result<Arc<dyn BridgeHandle>> {
        if self.inner.fail_bridge_creation.load(Ordering::SeqCst) {
            return Err(DomainError::Transport(format!("bridge creation for {} refused", scope)));
        }

        let fail_at = match self.inner.fail_member_add_at.load(Ordering::SeqCst) {
            0 => None,
            attempt => Some(attempt),
        };
        let bridge = Arc::new(MemoryBridge::new(BridgeId::generate(), fail_at));
        lock(&self.inner.bridges).push(bridge.clone());

        debug!("Created bridge {} for leg {}", bridge.id(), scope);
        Ok(bridge)
    }

    fn leg(&self, id: &LegId) -> Arc<dyn LegHandle> {
        let mut legs = lock(&self.inner.legs);
        legs.entry(id.clone())
            .or_insert_with(|| {
                // unknown legs are inbound callers that were never registered
                Arc::new(MemoryLeg::new(CallLeg::with_state(
                    id.clone(),
                    Destination::new(id.as_str()),
                    LegState::Ringing,
                )))
            })
            .clone()
    }
}

/// One simulated leg
pub struct MemoryLeg {
    id: LegId,
    leg: Mutex<CallLeg>,
    subscribers: Mutex<Vec<(LegEventKind, mpsc::UnboundedSender<LegEvent>)>>,
    failing_reads: AtomicUsize,
    fail_answer: AtomicBool,
    fail_hangups: AtomicBool,
    hangups: AtomicUsize,
    answers: AtomicUsize,
}

impl MemoryLeg {
    fn new(leg: CallLeg) -> Self {
        Self {
            id: leg.id().clone(),
            leg: Mutex::new(leg),
            subscribers: Mutex::new(Vec::new()),
            failing_reads: AtomicUsize::new(0),
            fail_answer: AtomicBool::new(false),
            fail_hangups: AtomicBool::new(false),
            hangups: AtomicUsize::new(0),
            answers: AtomicUsize::new(0),
        }
    }

    pub fn leg_id(&self) -> &LegId {
        &self.id
    }

    pub fn endpoint(&self) -> Destination {
        lock(&self.leg).endpoint().clone()
    }

    pub fn state(&self) -> LegState {
        lock(&self.leg).state()
    }

    /// Move the leg to `state` and notify subscribers. Invalid transitions
    /// are ignored.
    pub fn set_state(&self, state: LegState) {
        if let Err(e) = lock(&self.leg).transition_to(state) {
            debug!("Ignoring simulated transition: {}", e);
            return;
        }

        self.publish(LegEvent::state_changed(self.id.clone(), Some(state)));
        if state == LegState::Down {
            self.publish(LegEvent::teardown(self.id.clone(), Some("normal clearing".to_string())));
        }
    }

    /// The far end hangs up
    pub fn remote_hangup(&self) {
        self.set_state(LegState::Down);
    }

    /// Deliver a teardown notification without touching the state
    pub fn emit_teardown(&self) {
        self.publish(LegEvent::teardown(self.id.clone(), None));
    }

    /// The next `count` state reads fail; `usize::MAX` fails them all
    pub fn fail_state_reads(&self, count: usize) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    pub fn fail_answer(&self) {
        self.fail_answer.store(true, Ordering::SeqCst);
    }

    pub fn fail_hangups(&self) {
        self.fail_hangups.store(true, Ordering::SeqCst);
    }

    /// Hangup instructions received, successful or not
    pub fn hangup_count(&self) -> usize {
        self.hangups.load(Ordering::SeqCst)
    }

    pub fn answer_count(&self) -> usize {
        self.answers.load(Ordering::SeqCst)
    }

    /// Subscriptions whose receiving side is still alive
    pub fn active_subscriptions(&self) -> usize {
        lock(&self.subscribers)
            .iter()
            .filter(|(_, tx)| !tx.is_closed())
            .count()
    }

    fn publish(&self, event: LegEvent) {
        let kind = event.kind();
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|(_, tx)| !tx.is_closed());
        for (_, tx) in subscribers.iter().filter(|(k, _)| *k == kind) {
            // a receiver dropped since the retain is harmless
            let _ = tx.send(event.clone());
        }
    }

    fn take_read_failure(&self) -> bool {
        self.failing_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                0 => None,
                usize::MAX => Some(usize::MAX),
                n => Some(n - 1),
            })
            .is_ok()
    }
}

#[async_trait]
impl LegHandle for MemoryLeg {
    fn id(&self) -> &LegId {
        &self.id
    }

    fn subscribe(&self, kind: LegEventKind) -> Subscription {
        let (tx, subscription) = Subscription::channel(kind);
        lock(&self.subscribers).push((kind, tx));
        subscription
    }

    async fn current_state(&self) -> Result<LegState> {
        if self.take_read_failure() {
            return Err(DomainError::Transport(format!("state read of {} failed", self.id)));
        }
        Ok(self.state())
    }

    async fn answer(&self) -> Result<()> {
        self.answers.fetch_add(1, Ordering::SeqCst);
        if self.fail_answer.load(Ordering::SeqCst) {
            return Err(DomainError::Transport(format!("answer of {} refused", self.id)));
        }
        match self.state() {
            LegState::Down => Err(DomainError::NotFound(format!("Leg {} not found", self.id))),
            LegState::Up => Ok(()),
            _ => {
                self.set_state(LegState::Up);
                Ok(())
            }
        }
    }

    async fn hang_up(&self) -> Result<()> {
        self.hangups.fetch_add(1, Ordering::SeqCst);
        if self.fail_hangups.load(Ordering::SeqCst) {
            return Err(DomainError::Transport(format!("hangup of {} refused", self.id)));
        }
        if self.state().is_terminal() {
            return Err(DomainError::NotFound(format!("Leg {} not found", self.id)));
        }
        self.set_state(LegState::Down);
        Ok(())
    }
}

/// One simulated mixing point
pub struct MemoryBridge {
    id: BridgeId,
    members: Mutex<Vec<LegId>>,
    attempts: AtomicUsize,
    fail_at: Option<usize>,
}

impl MemoryBridge {
    fn new(id: BridgeId, fail_at: Option<usize>) -> Self {
        Self {
            id,
            members: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            fail_at,
        }
    }

    /// Members in the order they were added
    pub fn members(&self) -> Vec<LegId> {
        lock(&self.members).clone()
    }

    pub fn add_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BridgeHandle for MemoryBridge {
    fn id(&self) -> &BridgeId {
        &self.id
    }

    async fn add_member(&self, leg: &LegId) -> Result<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_at == Some(attempt) {
            return Err(DomainError::Transport(format!("adding {} to {} failed", leg, self.id)));
        }
        lock(&self.members).push(leg.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_their_kind_only() {
        let signaling = MemorySignaling::new();
        let leg = signaling.add_leg("chan-1", LegState::Ringing);
        let mut states = leg.subscribe(LegEventKind::StateChange);
        let mut teardowns = leg.subscribe(LegEventKind::Teardown);

        leg.set_state(LegState::Up);
        leg.remote_hangup();

        assert!(matches!(
            states.next().await,
            Some(LegEvent::StateChanged { state: Some(LegState::Up), .. })
        ));
        assert!(matches!(
            states.next().await,
            Some(LegEvent::StateChanged { state: Some(LegState::Down), .. })
        ));
        assert!(matches!(teardowns.next().await, Some(LegEvent::Teardown { .. })));
    }

    #[tokio::test]
    async fn test_hang_up_of_gone_leg_is_not_found() {
        let signaling = MemorySignaling::new();
        let leg = signaling.add_leg("chan-1", LegState::Up);

        assert!(leg.hang_up().await.is_ok());
        let err = leg.hang_up().await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(leg.hangup_count(), 2);
    }

    #[tokio::test]
    async fn test_dropped_subscriptions_are_pruned() {
        let signaling = MemorySignaling::new();
        let leg = signaling.add_leg("chan-1", LegState::Ringing);

        let sub = leg.subscribe(LegEventKind::StateChange);
        assert_eq!(leg.active_subscriptions(), 1);
        drop(sub);
        assert_eq!(leg.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_state_read_failures_are_counted_down() {
        let signaling = MemorySignaling::new();
        let leg = signaling.add_leg("chan-1", LegState::Ringing);
        leg.fail_state_reads(1);

        assert!(leg.current_state().await.is_err());
        assert_eq!(leg.current_state().await.unwrap(), LegState::Ringing);
    }

    #[tokio::test]
    async fn test_originate_failure_is_recorded() {
        let signaling = MemorySignaling::new();
        signaling.fail_originate_to("PJSIP/1101");

        let result = signaling
            .originate(OriginateRequest {
                destination: Destination::new("PJSIP/1101"),
                caller_identity: "2000".to_string(),
                app: "callChildrens".to_string(),
            })
            .await;
        assert!(result.is_err());
        assert_eq!(signaling.originate_requests().len(), 1);
        assert!(signaling.originated().is_empty());
    }
}
