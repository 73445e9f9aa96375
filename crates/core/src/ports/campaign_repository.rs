use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::Result;
use crate::models::{Campaign, CampaignPhase, CampaignStatus, PhaseStatus};

#[async_trait]
pub trait CampaignRepository: Send + Sync {
    async fn create(&self, campaign: &Campaign) -> Result<()>;
    async fn get(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<Campaign>>;
    async fn update_status(&self, id: Uuid, status: CampaignStatus, started_at: Option<chrono::DateTime<chrono::Utc>>) -> Result<()>;

    /// All campaigns currently `Running` — polled by the engine's tick
    /// loop (spec §5, "campaign engine tick").
    async fn list_running(&self) -> Result<Vec<Campaign>>;
}

#[async_trait]
pub trait CampaignPhaseRepository: Send + Sync {
    async fn create_many(&self, phases: &[CampaignPhase]) -> Result<()>;
    async fn list_by_campaign(&self, campaign_id: Uuid) -> Result<Vec<CampaignPhase>>;
    async fn get(&self, id: Uuid) -> Result<Option<CampaignPhase>>;

    async fn mark_status(&self, id: Uuid, status: PhaseStatus, started_at: Option<chrono::DateTime<chrono::Utc>>, completed_at: Option<chrono::DateTime<chrono::Utc>>) -> Result<()>;

    async fn set_target_count(&self, id: Uuid, target_count: u32) -> Result<()>;

    /// Applies `success_count += success_delta; failure_count +=
    /// failure_delta` as a single conditional `UPDATE` with an arithmetic
    /// expression — never a read-modify-write from memory (spec §5).
    async fn increment_counts(&self, id: Uuid, success_delta: u32, failure_delta: u32) -> Result<()>;
}
