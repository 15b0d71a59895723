//! Bridge (mixing point) model

use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{BridgeId, LegId};
use serde::{Deserialize, Serialize};

/// Mixing point created by one session, with its members in the order they
/// were added
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bridge {
    id: BridgeId,
    members: Vec<LegId>,
}

impl Bridge {
    pub fn new(id: BridgeId) -> Self {
        Self {
            id,
            members: Vec::new(),
        }
    }

    /// Record a member that was added. A leg is never added twice.
    pub fn record_member(&mut self, leg: LegId) -> Result<()> {
        if self.contains(&leg) {
            return Err(DomainError::InvalidOperation(format!(
                "Leg {} is already a member of bridge {}",
                leg, self.id
            )));
        }
        self.members.push(leg);
        Ok(())
    }

    pub fn contains(&self, leg: &LegId) -> bool {
        self.members.iter().any(|m| m == leg)
    }

    pub fn id(&self) -> &BridgeId {
        &self.id
    }

    pub fn members(&self) -> &[LegId] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_members_keep_insertion_order() {
        let mut bridge = Bridge::new(BridgeId::new("br-1"));
        bridge.record_member(LegId::new("inbound")).unwrap();
        bridge.record_member(LegId::new("out-2")).unwrap();
        bridge.record_member(LegId::new("out-1")).unwrap();

        let members: Vec<&str> = bridge.members().iter().map(|m| m.as_str()).collect();
        assert_eq!(members, vec!["inbound", "out-2", "out-1"]);
    }

    #[test]
    fn test_no_re_add() {
        let mut bridge = Bridge::new(BridgeId::new("br-2"));
        bridge.record_member(LegId::new("inbound")).unwrap();

        assert!(bridge.record_member(LegId::new("inbound")).is_err());
        assert_eq!(bridge.len(), 1);
    }
}
