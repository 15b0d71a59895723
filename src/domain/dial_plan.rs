//! Dial plan: which destinations an inbound call rings

use crate::config::DialConfig;
use crate::domain::shared::value_objects::Destination;
use std::collections::HashMap;

/// Placeholder replaced by the extension in an endpoint template
const EXTENSION_PLACEHOLDER: &str = "{}";

/// Resolves a dialed number into candidate destinations
#[derive(Debug, Clone)]
pub struct DialPlan {
    endpoint_template: String,
    ring_groups: HashMap<String, Vec<String>>,
}

impl DialPlan {
    pub fn new(endpoint_template: impl Into<String>, ring_groups: HashMap<String, Vec<String>>) -> Self {
        Self {
            endpoint_template: endpoint_template.into(),
            ring_groups,
        }
    }

    pub fn from_config(config: &DialConfig) -> Self {
        Self::new(config.endpoint_template.clone(), config.ring_groups.clone())
    }

    /// Candidates for a dialed number: the members of its ring group, or the
    /// number itself when it is a direct extension
    pub fn candidates(&self, dialed: &str) -> Vec<Destination> {
        match self.ring_groups.get(dialed) {
            Some(extensions) => extensions.iter().map(|ext| self.endpoint_for(ext)).collect(),
            None => vec![self.endpoint_for(dialed)],
        }
    }

    pub fn is_ring_group(&self, dialed: &str) -> bool {
        self.ring_groups.contains_key(dialed)
    }

    fn endpoint_for(&self, extension: &str) -> Destination {
        Destination::new(self.endpoint_template.replace(EXTENSION_PLACEHOLDER, extension))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan() -> DialPlan {
        let mut groups = HashMap::new();
        groups.insert("100".to_string(), vec!["1101".to_string(), "1102".to_string()]);
        DialPlan::new("PJSIP/{}", groups)
    }

    #[test]
    fn test_ring_group_fans_out() {
        let candidates = plan().candidates("100");
        assert_eq!(
            candidates,
            vec![Destination::new("PJSIP/1101"), Destination::new("PJSIP/1102")]
        );
    }

    #[test]
    fn test_direct_extension() {
        let plan = plan();
        assert!(!plan.is_ring_group("1103"));
        assert_eq!(plan.candidates("1103"), vec![Destination::new("PJSIP/1103")]);
    }
}
