//! Signaling ports
//!
//! The orchestrator never talks to Asterisk directly. It consumes these
//! traits, implemented in the infrastructure layer by the ARI adapter and by
//! the in-memory adapter.

use crate::domain::call::{LegEvent, LegEventKind, LegState};
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{BridgeId, Destination, LegId};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Request to originate one outbound leg
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginateRequest {
    pub destination: Destination,
    /// Caller id presented to the destination
    pub caller_identity: String,
    /// Application the new leg is placed into
    pub app: String,
}

/// Stream of notifications for one leg.
///
/// Dropping the subscription cancels it; publishers notice the closed channel
/// and stop delivering.
#[derive(Debug)]
pub struct Subscription {
    kind: LegEventKind,
    rx: mpsc::UnboundedReceiver<LegEvent>,
}

impl Subscription {
    /// Create a subscription and the sender a publisher delivers through
    pub fn channel(kind: LegEventKind) -> (mpsc::UnboundedSender<LegEvent>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { kind, rx })
    }

    pub fn kind(&self) -> LegEventKind {
        self.kind
    }

    /// Next notification, or `None` once the publisher went away
    pub async fn next(&mut self) -> Option<LegEvent> {
        self.rx.recv().await
    }

    /// Notification already delivered, without waiting
    pub fn try_next(&mut self) -> Option<LegEvent> {
        self.rx.try_recv().ok()
    }
}

/// Connection to the signaling server
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SignalingClient: Send + Sync {
    /// Originate a leg towards a destination
    async fn originate(&self, request: OriginateRequest) -> Result<Arc<dyn LegHandle>>;

    /// Create a mixing point scoped to the given leg's context
    async fn create_mixing_point(&self, scope: &LegId) -> Result<Arc<dyn BridgeHandle>>;

    /// Handle for an existing leg, e.g. the inbound leg of a call-start
    fn leg(&self, id: &LegId) -> Arc<dyn LegHandle>;
}

/// Primitive operations on one leg
#[async_trait]
pub trait LegHandle: Send + Sync {
    fn id(&self) -> &LegId;

    /// Subscribe to notifications of one kind
    fn subscribe(&self, kind: LegEventKind) -> Subscription;

    /// Read the leg's current state from the server
    async fn current_state(&self) -> Result<LegState>;

    async fn answer(&self) -> Result<()>;

    /// Hang the leg up. A leg that is already gone yields
    /// [`DomainError::NotFound`](crate::domain::shared::DomainError::NotFound).
    async fn hang_up(&self) -> Result<()>;
}

/// Primitive operations on a mixing point
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BridgeHandle: Send + Sync {
    fn id(&self) -> &BridgeId;

    async fn add_member(&self, leg: &LegId) -> Result<()>;
}
