use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::Result;
use crate::models::{Agent, Selector};

#[async_trait]
pub trait AgentRepository: Send + Sync {
    async fn upsert(&self, agent: &Agent) -> Result<()>;
    async fn get(&self, tenant_id: Uuid, id: &str) -> Result<Option<Agent>>;
    async fn delete(&self, tenant_id: Uuid, id: &str) -> Result<()>;
    async fn list(&self, tenant_id: Uuid) -> Result<Vec<Agent>>;

    /// Candidate materialisation for cohort selection (spec §4.1 step 2).
    /// The selector's `tags`/`status` predicates are applied by the
    /// implementation, or by the caller against the returned list — either
    /// is acceptable as long as the semantics in [`Selector::matches`]
    /// hold.
    async fn list_matching(&self, tenant_id: Uuid, selector: &Selector) -> Result<Vec<Agent>>;

    async fn update_last_seen(&self, tenant_id: Uuid, id: &str, now: DateTime<Utc>) -> Result<()>;

    /// Agents whose `last_seen_at` is older than `threshold` — feeds the
    /// offline sweeper (spec §2).
    async fn list_stale(&self, threshold: DateTime<Utc>) -> Result<Vec<Agent>>;
}
