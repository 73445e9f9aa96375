//! Enrolment bootstrap (spec §4.5): trades an installation key for a
//! tenant-scoped agent token, the agent-side counterpart of the control
//! plane's `EnrollmentService`. Identity is persisted to `agent.state_path`
//! so a restart reconnects under the same agent id without re-enrolling.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AgentIdentityConfig;

/// Identity persisted locally after a successful enrolment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub agent_id: String,
    pub tenant_id: Uuid,
    pub token: String,
}

impl AgentIdentity {
    /// Loads persisted identity from `state_path`, or completes enrolment
    /// against the control plane and persists the result if none exists yet.
    pub async fn load_or_enroll(config: &AgentIdentityConfig, installation_key: &str, tags: HashMap<String, String>) -> Result<Self> {
        if let Some(token) = config.token.clone() {
            let agent_id = config.agent_id.clone().context("agent.token is set but agent.agent_id is missing")?;
            let tenant_id = config.tenant_id.as_deref().context("agent.token is set but agent.tenant_id is missing")?.parse().context("agent.tenant_id is not a valid uuid")?;
            return Ok(Self { agent_id, tenant_id, token });
        }

        if let Some(identity) = Self::read(&config.state_path)? {
            return Ok(identity);
        }

        let identity = Self::enroll(config, installation_key, tags).await?;
        identity.persist(&config.state_path)?;
        Ok(identity)
    }

    fn read(state_path: &str) -> Result<Option<Self>> {
        let path = Path::new(state_path);
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path).with_context(|| format!("failed to read agent state at {state_path}"))?;
        let identity = serde_json::from_str(&contents).with_context(|| format!("agent state at {state_path} is corrupt"))?;
        Ok(Some(identity))
    }

    fn persist(&self, state_path: &str) -> Result<()> {
        let path = Path::new(state_path);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents).with_context(|| format!("failed to write agent state to {state_path}"))?;
        Ok(())
    }

    async fn enroll(config: &AgentIdentityConfig, installation_key: &str, tags: HashMap<String, String>) -> Result<Self> {
        #[derive(Serialize)]
        struct RegisterRequest<'a> {
            installation_key: &'a str,
            agent_id: Option<&'a str>,
            hostname: String,
            os: &'static str,
            arch: &'static str,
            version: &'static str,
            tags: HashMap<String, String>,
        }

        #[derive(Deserialize)]
        struct RegisterResponse {
            token: String,
            agent_id: String,
            tenant_id: Uuid,
        }

        let hostname = hostname_or_unknown();
        let request = RegisterRequest {
            installation_key,
            agent_id: config.agent_id.as_deref(),
            hostname,
            os: std::env::consts::OS,
            arch: std::env::consts::ARCH,
            version: env!("CARGO_PKG_VERSION"),
            tags,
        };

        let url = format!("{}/api/v1/agents/register", config.control_base_url.trim_end_matches('/'));
        let response = Client::new().post(&url).json(&request).send().await.context("enrolment request failed")?;
        if !response.status().is_success() {
            anyhow::bail!("enrolment rejected with status {}", response.status());
        }
        let body: RegisterResponse = response.json().await.context("enrolment response was not valid json")?;
        Ok(Self { agent_id: body.agent_id, tenant_id: body.tenant_id, token: body.token })
    }
}

fn hostname_or_unknown() -> String {
    std::env::var("HOSTNAME").ok().filter(|value| !value.is_empty()).unwrap_or_else(|| "unknown".to_string())
}
