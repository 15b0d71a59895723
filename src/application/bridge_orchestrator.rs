//! Bridge orchestration: answer, create the mixing point, add members
//!
//! ```text
//! Init -> Answering -> BridgeCreated -> MembersAdded -> Complete
//!   \________\______________\_______________\-> Failed(reason)
//! ```

use crate::domain::call::Bridge;
use crate::domain::shared::error::{DomainError, SequenceFailure};
use crate::domain::shared::result::Result;
use crate::domain::signaling::{LegHandle, SignalingClient};
use metrics::counter;
use std::iter;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Stage of the bridge sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeStage {
    Init,
    Answering,
    BridgeCreated,
    MembersAdded,
    Complete,
    Failed(SequenceFailure),
}

impl BridgeStage {
    pub fn can_transition_to(&self, next: BridgeStage) -> bool {
        use BridgeStage::*;

        match (self, next) {
            (Complete, _) | (Failed(_), _) => false,
            (_, Failed(_)) => true,
            (Init, Answering) => true,
            (Answering, BridgeCreated) => true,
            (BridgeCreated, MembersAdded) => true,
            (MembersAdded, Complete) => true,
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BridgeStage::Complete | BridgeStage::Failed(_))
    }
}

/// Runs the bridge sequence once for one call session. No retries: the first
/// failure is terminal and returned to the caller.
pub struct BridgeOrchestrator {
    client: Arc<dyn SignalingClient>,
    stage: BridgeStage,
    bridge: Option<Bridge>,
}

impl BridgeOrchestrator {
    pub fn new(client: Arc<dyn SignalingClient>) -> Self {
        Self {
            client,
            stage: BridgeStage::Init,
            bridge: None,
        }
    }

    pub fn stage(&self) -> BridgeStage {
        self.stage
    }

    /// The bridge as far as it got, including members added before a failure
    pub fn bridge(&self) -> Option<&Bridge> {
        self.bridge.as_ref()
    }

    /// Answer `inbound`, create a mixing point scoped to it, then add
    /// `inbound` followed by each winner in the order given
    pub async fn run(
        &mut self,
        inbound: &Arc<dyn LegHandle>,
        winners: &[Arc<dyn LegHandle>],
    ) -> Result<Bridge> {
        if self.stage != BridgeStage::Init {
            return Err(DomainError::InvalidOperation(format!(
                "bridge sequence already ran (stage {:?})",
                self.stage
            )));
        }

        self.advance(BridgeStage::Answering)?;
        debug!("Answering leg {}", inbound.id());
        if let Err(e) = inbound.answer().await {
            error!("Failed to answer leg {}: {}", inbound.id(), e);
            return Err(self.fail(SequenceFailure::AnswerFailed, &e));
        }

        let handle = match self.client.create_mixing_point(inbound.id()).await {
            Ok(handle) => handle,
            Err(e) => {
                error!("Failed to create bridge for leg {}: {}", inbound.id(), e);
                return Err(self.fail(SequenceFailure::BridgeCreateFailed, &e));
            }
        };
        self.advance(BridgeStage::BridgeCreated)?;
        info!("Bridge {} created", handle.id());
        let bridge = self.bridge.insert(Bridge::new(handle.id().clone()));

        for leg in iter::once(inbound).chain(winners.iter()) {
            if bridge.contains(leg.id()) {
                warn!("Leg {} is already in bridge {}, not adding it again", leg.id(), bridge.id());
                continue;
            }
            if let Err(e) = handle.add_member(leg.id()).await {
                error!("Failed to add leg {} to bridge {}: {}", leg.id(), bridge.id(), e);
                return Err(self.fail(SequenceFailure::MemberAddFailed, &e));
            }
            bridge.record_member(leg.id().clone())?;
            info!("Leg {} added to bridge {}", leg.id(), bridge.id());
        }

        self.advance(BridgeStage::MembersAdded)?;
        debug!("Legs added to bridge {}", handle.id());
        self.advance(BridgeStage::Complete)?;
        counter!("stasis_bridges_total", "result" => "complete").increment(1);

        self.bridge
            .clone()
            .ok_or_else(|| DomainError::State("bridge missing after completion".to_string()))
    }

    fn advance(&mut self, next: BridgeStage) -> Result<()> {
        if !self.stage.can_transition_to(next) {
            return Err(DomainError::InvalidOperation(format!(
                "cannot move bridge sequence from {:?} to {:?}",
                self.stage, next
            )));
        }
        self.stage = next;
        Ok(())
    }

    fn fail(&mut self, failure: SequenceFailure, source: &DomainError) -> DomainError {
        self.stage = BridgeStage::Failed(failure);
        counter!("stasis_bridges_total", "result" => failure.as_str()).increment(1);
        DomainError::sequence(failure, source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::call::LegState;
    use crate::domain::shared::value_objects::{BridgeId, LegId};
    use crate::domain::signaling::{BridgeHandle, MockBridgeHandle, MockSignalingClient};
    use crate::infrastructure::memory::MemorySignaling;
    use mockall::predicate::eq;
    use mockall::Sequence;

    fn handles(signaling: &MemorySignaling, ids: &[&str]) -> Vec<Arc<dyn LegHandle>> {
        ids.iter()
            .map(|id| signaling.add_leg(id, LegState::Up) as Arc<dyn LegHandle>)
            .collect()
    }

    #[test]
    fn test_stage_transitions() {
        assert!(BridgeStage::Init.can_transition_to(BridgeStage::Answering));
        assert!(BridgeStage::Answering.can_transition_to(BridgeStage::BridgeCreated));
        assert!(BridgeStage::BridgeCreated.can_transition_to(BridgeStage::Failed(SequenceFailure::MemberAddFailed)));
        assert!(!BridgeStage::Init.can_transition_to(BridgeStage::Complete));
        assert!(!BridgeStage::Complete.can_transition_to(BridgeStage::Failed(SequenceFailure::AnswerFailed)));
        assert!(!BridgeStage::Failed(SequenceFailure::AnswerFailed).can_transition_to(BridgeStage::Answering));
    }

    #[tokio::test]
    async fn test_complete_sequence_adds_inbound_first() {
        let signaling = MemorySignaling::new();
        let inbound = signaling.add_leg("inbound", LegState::Ringing);
        let winners = handles(&signaling, &["out-2", "out-1"]);

        let mut orchestrator = BridgeOrchestrator::new(Arc::new(signaling.clone()));
        let inbound_handle: Arc<dyn LegHandle> = inbound.clone();
        let bridge = orchestrator.run(&inbound_handle, &winners).await.unwrap();

        assert_eq!(orchestrator.stage(), BridgeStage::Complete);
        assert_eq!(inbound.answer_count(), 1);
        let members: Vec<&str> = bridge.members().iter().map(|m| m.as_str()).collect();
        assert_eq!(members, vec!["inbound", "out-2", "out-1"]);
        assert_eq!(signaling.bridges()[0].members(), bridge.members().to_vec());
    }

    #[tokio::test]
    async fn test_answer_failure_skips_bridge() {
        let signaling = MemorySignaling::new();
        let inbound = signaling.add_leg("inbound", LegState::Ringing);
        inbound.fail_answer();

        let mut orchestrator = BridgeOrchestrator::new(Arc::new(signaling.clone()));
        let inbound_handle: Arc<dyn LegHandle> = inbound;
        let err = orchestrator.run(&inbound_handle, &[]).await.unwrap_err();

        assert_eq!(err.sequence_failure(), Some(SequenceFailure::AnswerFailed));
        assert_eq!(orchestrator.stage(), BridgeStage::Failed(SequenceFailure::AnswerFailed));
        assert!(signaling.bridges().is_empty());
        assert!(orchestrator.bridge().is_none());
    }

    #[tokio::test]
    async fn test_bridge_create_failure() {
        let signaling = MemorySignaling::new();
        signaling.fail_bridge_creation();
        let inbound: Arc<dyn LegHandle> = signaling.add_leg("inbound", LegState::Ringing);

        let mut orchestrator = BridgeOrchestrator::new(Arc::new(signaling.clone()));
        let err = orchestrator.run(&inbound, &[]).await.unwrap_err();

        assert_eq!(err.sequence_failure(), Some(SequenceFailure::BridgeCreateFailed));
        assert_eq!(orchestrator.stage(), BridgeStage::Failed(SequenceFailure::BridgeCreateFailed));
    }

    #[tokio::test]
    async fn test_member_add_failure_keeps_earlier_members() {
        let signaling = MemorySignaling::new();
        let inbound: Arc<dyn LegHandle> = signaling.add_leg("inbound", LegState::Ringing);
        let winners = handles(&signaling, &["out-1", "out-2", "out-3"]);

        let mut client = MockSignalingClient::new();
        client.expect_create_mixing_point().times(1).returning(|scope| {
            assert_eq!(scope.as_str(), "inbound");

            let mut bridge = MockBridgeHandle::new();
            let mut seq = Sequence::new();
            bridge.expect_id().return_const(BridgeId::new("br-1"));
            bridge
                .expect_add_member()
                .with(eq(LegId::new("inbound")))
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_| Ok(()));
            bridge
                .expect_add_member()
                .with(eq(LegId::new("out-1")))
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_| Ok(()));
            bridge
                .expect_add_member()
                .with(eq(LegId::new("out-2")))
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_| Err(DomainError::Transport("channel not in Stasis".to_string())));
            // out-3 must never be attempted

            Ok(Arc::new(bridge) as Arc<dyn BridgeHandle>)
        });

        let mut orchestrator = BridgeOrchestrator::new(Arc::new(client));
        let err = orchestrator.run(&inbound, &winners).await.unwrap_err();

        assert_eq!(err.sequence_failure(), Some(SequenceFailure::MemberAddFailed));
        assert_eq!(orchestrator.stage(), BridgeStage::Failed(SequenceFailure::MemberAddFailed));
        let kept: Vec<&str> = orchestrator
            .bridge()
            .unwrap()
            .members()
            .iter()
            .map(|m| m.as_str())
            .collect();
        assert_eq!(kept, vec!["inbound", "out-1"]);
    }

    #[tokio::test]
    async fn test_member_add_failure_on_memory_bridge() {
        let signaling = MemorySignaling::new();
        signaling.fail_member_add_at(2);
        let inbound: Arc<dyn LegHandle> = signaling.add_leg("inbound", LegState::Ringing);
        let winners = handles(&signaling, &["out-1", "out-2"]);

        let mut orchestrator = BridgeOrchestrator::new(Arc::new(signaling.clone()));
        assert!(orchestrator.run(&inbound, &winners).await.is_err());

        let bridge = &signaling.bridges()[0];
        assert_eq!(bridge.members(), vec![LegId::new("inbound")]);
        assert_eq!(bridge.add_attempts(), 2);
    }

    #[tokio::test]
    async fn test_winner_equal_to_inbound_is_not_re_added() {
        let signaling = MemorySignaling::new();
        let inbound: Arc<dyn LegHandle> = signaling.add_leg("inbound", LegState::Ringing);

        let mut orchestrator = BridgeOrchestrator::new(Arc::new(signaling.clone()));
        let bridge = orchestrator.run(&inbound, &[inbound.clone()]).await.unwrap();

        assert_eq!(bridge.len(), 1);
        assert_eq!(signaling.bridges()[0].add_attempts(), 1);
    }

    #[tokio::test]
    async fn test_runs_only_once() {
        let signaling = MemorySignaling::new();
        let inbound: Arc<dyn LegHandle> = signaling.add_leg("inbound", LegState::Ringing);

        let mut orchestrator = BridgeOrchestrator::new(Arc::new(signaling.clone()));
        orchestrator.run(&inbound, &[]).await.unwrap();
        let second = orchestrator.run(&inbound, &[]).await;
        assert!(matches!(second, Err(DomainError::InvalidOperation(_))));
    }
}
