//! Call group: legs whose lifetimes are linked

use crate::domain::shared::value_objects::LegId;
use crate::domain::signaling::LegHandle;
use std::fmt;
use std::sync::Arc;

/// Fixed set of legs sharing one fate. Duplicate legs collapse into one
/// member; membership never changes after creation.
#[derive(Clone)]
pub struct CallGroup {
    members: Vec<Arc<dyn LegHandle>>,
}

impl CallGroup {
    pub fn new(legs: impl IntoIterator<Item = Arc<dyn LegHandle>>) -> Self {
        let mut members: Vec<Arc<dyn LegHandle>> = Vec::new();
        for leg in legs {
            if !members.iter().any(|m| m.id() == leg.id()) {
                members.push(leg);
            }
        }
        Self { members }
    }

    /// Groups with fewer than two members perform no linking
    pub fn is_linkable(&self) -> bool {
        self.members.len() >= 2
    }

    pub fn members(&self) -> &[Arc<dyn LegHandle>] {
        &self.members
    }

    pub fn member_ids(&self) -> Vec<LegId> {
        self.members.iter().map(|m| m.id().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl fmt::Debug for CallGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallGroup")
            .field("members", &self.member_ids())
            .finish()
    }
}
