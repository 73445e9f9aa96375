use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    Denied,
}

/// Append-only audit record (spec §3). Not required to be totally
/// ordered across tenants; batched and flushed best-effort (spec §5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub tenant_id: Uuid,
    pub event_type: String,
    pub action: String,
    pub outcome: AuditOutcome,
    pub actor: String,
    pub resource: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl AuditEvent {
    pub fn new(
        tenant_id: Uuid,
        event_type: impl Into<String>,
        action: impl Into<String>,
        outcome: AuditOutcome,
        actor: impl Into<String>,
        resource: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: now,
            tenant_id,
            event_type: event_type.into(),
            action: action.into(),
            outcome,
            actor: actor.into(),
            resource: resource.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
