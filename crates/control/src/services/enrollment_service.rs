//! Enrollment: installation key → agent JWT. Spec §4.5's seven-step
//! protocol implemented as one method per request.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use meridian_core::jwt::{Claims, JwtCodec};
use meridian_core::models::{Agent, AgentToken};
use meridian_core::ports::{AgentRepository, AgentTokenRepository, InstallationKeyRepository};
use meridian_core::{Clock, Error, Result};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::tenant_service::TenantService;

pub struct EnrollRequest {
    pub installation_key: String,
    pub agent_id: Option<String>,
    pub hostname: String,
    pub os: String,
    pub arch: String,
    pub version: String,
    pub tags: HashMap<String, String>,
}

pub struct EnrollResponse {
    pub token: String,
    pub agent_id: String,
    pub tenant_id: Uuid,
    pub endpoint: String,
}

pub struct EnrollmentService {
    keys: Arc<dyn InstallationKeyRepository>,
    agents: Arc<dyn AgentRepository>,
    tokens: Arc<dyn AgentTokenRepository>,
    tenants: Arc<TenantService>,
    jwt: Arc<JwtCodec>,
    clock: Arc<dyn Clock>,
    agent_token_ttl: Duration,
}

impl EnrollmentService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        keys: Arc<dyn InstallationKeyRepository>,
        agents: Arc<dyn AgentRepository>,
        tokens: Arc<dyn AgentTokenRepository>,
        tenants: Arc<TenantService>,
        jwt: Arc<JwtCodec>,
        clock: Arc<dyn Clock>,
        agent_token_ttl: Duration,
    ) -> Self {
        Self { keys, agents, tokens, tenants, jwt, clock, agent_token_ttl }
    }

    pub async fn enroll(&self, req: EnrollRequest) -> Result<EnrollResponse> {
        let now = self.clock.now();

        // Step 2: look up the key by hash, never plaintext.
        let key_hash = hash_key(&req.installation_key);
        let mut key = self.keys.get_by_hash(&key_hash).await?.ok_or_else(|| Error::unauthorized("installation key not recognized"))?;
        if !key.is_valid(now) {
            return Err(Error::unauthorized("installation key is expired or exhausted"));
        }

        // Step 3: quota check.
        self.tenants.check_agent_quota(key.tenant_id).await?;

        let agent_id = req.agent_id.unwrap_or_else(|| Uuid::new_v4().to_string());

        // Step 4/5: re-registration revokes prior tokens; otherwise insert.
        let existing = self.agents.get(key.tenant_id, &agent_id).await?;
        let agent = Agent {
            id: agent_id.clone(),
            tenant_id: key.tenant_id,
            hostname: req.hostname,
            os: req.os,
            arch: req.arch,
            version: req.version,
            tags: req.tags,
            last_seen_at: now,
            registered_at: existing.as_ref().map_or(now, |a| a.registered_at),
        };
        self.agents.upsert(&agent).await?;
        if existing.is_some() {
            self.tokens.revoke_all_for_agent(&agent_id, now).await?;
        }

        let claims = Claims::for_agent(key.tenant_id, agent_id.clone(), now, self.agent_token_ttl);
        let signed = self.jwt.sign(&claims)?;
        let token = AgentToken::new(agent_id.clone(), key.tenant_id, hash_key(&signed), now + self.agent_token_ttl);
        self.tokens.create(&token).await?;

        // Step 6: increment usage atomically; the in-memory `consume` call
        // below only validates the invariant holds, the repository does
        // the actual atomic increment.
        key.consume()?;
        if !self.keys.try_consume(key.id).await? {
            return Err(Error::conflict("installation key usage exhausted by a concurrent registration"));
        }

        Ok(EnrollResponse { token: signed, agent_id: agent.id.clone(), tenant_id: agent.tenant_id, endpoint: agent.endpoint() })
    }
}

fn hash_key(plaintext: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(plaintext.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashing_is_deterministic_and_never_returns_plaintext() {
        let h1 = hash_key("super-secret-key");
        let h2 = hash_key("super-secret-key");
        assert_eq!(h1, h2);
        assert_ne!(h1, "super-secret-key");
    }
}
