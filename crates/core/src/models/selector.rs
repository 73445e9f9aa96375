use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::agent::{Agent, AgentStatus};

/// Target selector for a campaign (spec §3, §9, §4.1). Supported
/// predicates are `tags` equality (all given key/value pairs must match)
/// and a `status` literal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Selector {
    #[serde(default)]
    pub tags: HashMap<String, String>,
    #[serde(default)]
    pub status: Option<AgentStatus>,
}

impl Selector {
    pub fn matches(&self, agent: &Agent, derived_status: AgentStatus) -> bool {
        if let Some(wanted) = self.status {
            if wanted != derived_status {
                return false;
            }
        }
        self.tags.iter().all(|(k, v)| agent.tags.get(k) == Some(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent_with_tags(tags: &[(&str, &str)]) -> Agent {
        Agent {
            id: "a".into(),
            tenant_id: uuid::Uuid::new_v4(),
            hostname: "h".into(),
            os: "linux".into(),
            arch: "x86_64".into(),
            version: "1".into(),
            tags: tags.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            last_seen_at: chrono::Utc::now(),
            registered_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn empty_selector_matches_everything() {
        let selector = Selector::default();
        assert!(selector.matches(&agent_with_tags(&[]), AgentStatus::Online));
    }

    #[test]
    fn tag_selector_requires_all_pairs() {
        let mut selector = Selector::default();
        selector.tags.insert("region".into(), "us-east".into());
        assert!(selector.matches(&agent_with_tags(&[("region", "us-east")]), AgentStatus::Online));
        assert!(!selector.matches(&agent_with_tags(&[("region", "us-west")]), AgentStatus::Online));
    }

    #[test]
    fn status_selector_filters() {
        let selector = Selector { tags: HashMap::new(), status: Some(AgentStatus::Online) };
        assert!(!selector.matches(&agent_with_tags(&[]), AgentStatus::Offline));
    }
}
