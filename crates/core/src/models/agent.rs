use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Online,
    Offline,
    Degraded,
    Unknown,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Degraded => "degraded",
            Self::Unknown => "unknown",
        }
    }
}

/// A managed host running the agent process, addressed by the control
/// plane through a reverse tunnel. `(id, tenant_id)` is unique; `status` is
/// derived, not stored authoritatively — see
/// [`Agent::derive_status`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub tenant_id: Uuid,
    pub hostname: String,
    pub os: String,
    pub arch: String,
    pub version: String,
    pub tags: HashMap<String, String>,
    pub last_seen_at: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
}

impl Agent {
    /// Tunnel endpoint identifier, per spec §4.2 / §6: `tenant-<tenant>/<agent>`.
    pub fn endpoint(&self) -> String {
        format!("tenant-{}/{}", self.tenant_id, self.id)
    }

    /// Status is derived from `last_seen_at` plus a heartbeat threshold
    /// rather than stored as an independent field (spec §3).
    pub fn derive_status(&self, now: DateTime<Utc>, heartbeat_threshold: chrono::Duration) -> AgentStatus {
        let elapsed = now - self.last_seen_at;
        if elapsed < chrono::Duration::zero() {
            // Clock skew from the agent; treat as freshly seen.
            return AgentStatus::Online;
        }
        if elapsed <= heartbeat_threshold {
            AgentStatus::Online
        } else if elapsed <= heartbeat_threshold * 3 {
            AgentStatus::Degraded
        } else {
            AgentStatus::Offline
        }
    }
}

/// Long-lived credential for one agent. Only one non-revoked token exists
/// per agent at a time; re-registration revokes the prior one (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentToken {
    pub id: Uuid,
    pub agent_id: String,
    pub tenant_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl AgentToken {
    pub fn new(agent_id: String, tenant_id: Uuid, token_hash: String, expires_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id,
            tenant_id,
            token_hash,
            expires_at,
            revoked_at: None,
        }
    }

    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && now < self.expires_at
    }

    pub fn revoke(&mut self, now: DateTime<Utc>) {
        if self.revoked_at.is_none() {
            self.revoked_at = Some(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn agent(last_seen: DateTime<Utc>) -> Agent {
        Agent {
            id: "a1".into(),
            tenant_id: Uuid::new_v4(),
            hostname: "host".into(),
            os: "linux".into(),
            arch: "x86_64".into(),
            version: "1.0.0".into(),
            tags: HashMap::new(),
            last_seen_at: last_seen,
            registered_at: last_seen,
        }
    }

    #[test]
    fn derives_online_within_threshold() {
        let now = Utc::now();
        let a = agent(now - Duration::seconds(10));
        assert_eq!(a.derive_status(now, Duration::seconds(30)), AgentStatus::Online);
    }

    #[test]
    fn derives_offline_beyond_threshold() {
        let now = Utc::now();
        let a = agent(now - Duration::minutes(10));
        assert_eq!(a.derive_status(now, Duration::seconds(30)), AgentStatus::Offline);
    }

    #[test]
    fn revoking_a_token_is_idempotent() {
        let now = Utc::now();
        let mut token = AgentToken::new("a1".into(), Uuid::new_v4(), "hash".into(), now + Duration::days(30));
        token.revoke(now);
        let first = token.revoked_at;
        token.revoke(now + Duration::seconds(5));
        assert_eq!(token.revoked_at, first);
    }
}
