//! SQLite implementation of `CampaignRepository` and `CampaignPhaseRepository`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use meridian_core::models::{Campaign, CampaignPhase, CampaignStatus, PhaseDefinition, PhaseStatus, Selector};
use meridian_core::ports::{CampaignPhaseRepository, CampaignRepository};
use meridian_core::{Error, Result};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{map_sqlx_err, parse_datetime, parse_json, parse_optional_datetime, parse_uuid};

#[derive(Clone)]
pub struct SqliteCampaignRepository {
    pool: SqlitePool,
}

impl SqliteCampaignRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CampaignRepository for SqliteCampaignRepository {
    async fn create(&self, campaign: &Campaign) -> Result<()> {
        let selector_json = serde_json::to_string(&campaign.target_selector)?;
        sqlx::query(
            r#"INSERT INTO campaigns (id, tenant_id, workflow_id, name, status, target_selector, created_at, started_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(campaign.id.to_string())
        .bind(campaign.tenant_id.to_string())
        .bind(campaign.workflow_id.to_string())
        .bind(&campaign.name)
        .bind(status_str(campaign.status))
        .bind(&selector_json)
        .bind(campaign.created_at.to_rfc3339())
        .bind(campaign.started_at.map(|t| t.to_rfc3339()))
        .bind(campaign.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn get(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<Campaign>> {
        let row: Option<CampaignRow> = sqlx::query_as("SELECT * FROM campaigns WHERE tenant_id = ? AND id = ?")
            .bind(tenant_id.to_string())
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        row.map(TryInto::try_into).transpose()
    }

    async fn update_status(&self, id: Uuid, status: CampaignStatus, started_at: Option<DateTime<Utc>>) -> Result<()> {
        let result = sqlx::query("UPDATE campaigns SET status = ?, started_at = COALESCE(started_at, ?), updated_at = ? WHERE id = ?")
            .bind(status_str(status))
            .bind(started_at.map(|t| t.to_rfc3339()))
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("campaign {id} not found")));
        }
        Ok(())
    }

    async fn list_running(&self) -> Result<Vec<Campaign>> {
        let rows: Vec<CampaignRow> = sqlx::query_as("SELECT * FROM campaigns WHERE status = 'running'").fetch_all(&self.pool).await.map_err(map_sqlx_err)?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

fn status_str(status: CampaignStatus) -> &'static str {
    match status {
        CampaignStatus::Draft => "draft",
        CampaignStatus::Running => "running",
        CampaignStatus::Paused => "paused",
        CampaignStatus::Completed => "completed",
        CampaignStatus::Failed => "failed",
        CampaignStatus::Cancelled => "cancelled",
        CampaignStatus::RollingBack => "rolling_back",
    }
}

fn parse_status(s: &str) -> Result<CampaignStatus> {
    match s {
        "draft" => Ok(CampaignStatus::Draft),
        "running" => Ok(CampaignStatus::Running),
        "paused" => Ok(CampaignStatus::Paused),
        "completed" => Ok(CampaignStatus::Completed),
        "failed" => Ok(CampaignStatus::Failed),
        "cancelled" => Ok(CampaignStatus::Cancelled),
        "rolling_back" => Ok(CampaignStatus::RollingBack),
        other => Err(Error::internal(format!("invalid campaign status in row: {other}"))),
    }
}

#[derive(sqlx::FromRow)]
struct CampaignRow {
    id: String,
    tenant_id: String,
    workflow_id: String,
    name: String,
    status: String,
    target_selector: String,
    created_at: String,
    started_at: Option<String>,
    updated_at: String,
}

impl TryFrom<CampaignRow> for Campaign {
    type Error = Error;

    fn try_from(row: CampaignRow) -> Result<Self> {
        let target_selector: Selector = parse_json(&row.target_selector)?;
        Ok(Campaign {
            id: parse_uuid(&row.id)?,
            tenant_id: parse_uuid(&row.tenant_id)?,
            workflow_id: parse_uuid(&row.workflow_id)?,
            name: row.name,
            status: parse_status(&row.status)?,
            target_selector,
            created_at: parse_datetime(&row.created_at)?,
            started_at: parse_optional_datetime(row.started_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}

#[derive(Clone)]
pub struct SqliteCampaignPhaseRepository {
    pool: SqlitePool,
}

impl SqliteCampaignPhaseRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CampaignPhaseRepository for SqliteCampaignPhaseRepository {
    async fn create_many(&self, phases: &[CampaignPhase]) -> Result<()> {
        for phase in phases {
            let definition_json = serde_json::to_string(&phase.definition)?;
            sqlx::query(
                r#"INSERT INTO campaign_phases
                   (id, campaign_id, phase_order, definition, target_count, success_count, failure_count, status, started_at, completed_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(phase.id.to_string())
            .bind(phase.campaign_id.to_string())
            .bind(i64::from(phase.order))
            .bind(&definition_json)
            .bind(i64::from(phase.target_count))
            .bind(i64::from(phase.success_count))
            .bind(i64::from(phase.failure_count))
            .bind(phase_status_str(phase.status))
            .bind(phase.started_at.map(|t| t.to_rfc3339()))
            .bind(phase.completed_at.map(|t| t.to_rfc3339()))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        }
        Ok(())
    }

    async fn list_by_campaign(&self, campaign_id: Uuid) -> Result<Vec<CampaignPhase>> {
        let rows: Vec<CampaignPhaseRow> = sqlx::query_as("SELECT * FROM campaign_phases WHERE campaign_id = ? ORDER BY phase_order")
            .bind(campaign_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn get(&self, id: Uuid) -> Result<Option<CampaignPhase>> {
        let row: Option<CampaignPhaseRow> = sqlx::query_as("SELECT * FROM campaign_phases WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        row.map(TryInto::try_into).transpose()
    }

    async fn mark_status(&self, id: Uuid, status: PhaseStatus, started_at: Option<DateTime<Utc>>, completed_at: Option<DateTime<Utc>>) -> Result<()> {
        let result = sqlx::query("UPDATE campaign_phases SET status = ?, started_at = COALESCE(started_at, ?), completed_at = ? WHERE id = ?")
            .bind(phase_status_str(status))
            .bind(started_at.map(|t| t.to_rfc3339()))
            .bind(completed_at.map(|t| t.to_rfc3339()))
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("campaign phase {id} not found")));
        }
        Ok(())
    }

    async fn set_target_count(&self, id: Uuid, target_count: u32) -> Result<()> {
        sqlx::query("UPDATE campaign_phases SET target_count = ? WHERE id = ?")
            .bind(i64::from(target_count))
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(())
    }

    /// A single conditional `UPDATE` with an arithmetic expression, per
    /// spec §5 — two concurrent dispatch completions never clobber each
    /// other's count.
    async fn increment_counts(&self, id: Uuid, success_delta: u32, failure_delta: u32) -> Result<()> {
        sqlx::query("UPDATE campaign_phases SET success_count = success_count + ?, failure_count = failure_count + ? WHERE id = ?")
            .bind(i64::from(success_delta))
            .bind(i64::from(failure_delta))
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(())
    }
}

fn phase_status_str(status: PhaseStatus) -> &'static str {
    match status {
        PhaseStatus::Pending => "pending",
        PhaseStatus::Running => "running",
        PhaseStatus::Success => "success",
        PhaseStatus::Failed => "failed",
        PhaseStatus::Cancelled => "cancelled",
    }
}

fn parse_phase_status(s: &str) -> Result<PhaseStatus> {
    match s {
        "pending" => Ok(PhaseStatus::Pending),
        "running" => Ok(PhaseStatus::Running),
        "success" => Ok(PhaseStatus::Success),
        "failed" => Ok(PhaseStatus::Failed),
        "cancelled" => Ok(PhaseStatus::Cancelled),
        other => Err(Error::internal(format!("invalid phase status in row: {other}"))),
    }
}

#[derive(sqlx::FromRow)]
struct CampaignPhaseRow {
    id: String,
    campaign_id: String,
    phase_order: i64,
    definition: String,
    target_count: i64,
    success_count: i64,
    failure_count: i64,
    status: String,
    started_at: Option<String>,
    completed_at: Option<String>,
}

impl TryFrom<CampaignPhaseRow> for CampaignPhase {
    type Error = Error;

    fn try_from(row: CampaignPhaseRow) -> Result<Self> {
        let definition: PhaseDefinition = parse_json(&row.definition)?;
        Ok(CampaignPhase {
            id: parse_uuid(&row.id)?,
            campaign_id: parse_uuid(&row.campaign_id)?,
            order: row.phase_order as u32,
            definition,
            target_count: row.target_count as u32,
            success_count: row.success_count as u32,
            failure_count: row.failure_count as u32,
            status: parse_phase_status(&row.status)?,
            started_at: parse_optional_datetime(row.started_at)?,
            completed_at: parse_optional_datetime(row.completed_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_migrated_test_pool;

    #[tokio::test]
    async fn increment_counts_accumulates_concurrently() {
        let pool = create_migrated_test_pool().await.expect("pool");
        let campaign_repo = SqliteCampaignRepository::new(pool.clone());
        let phase_repo = SqliteCampaignPhaseRepository::new(pool);

        let campaign = Campaign::new(Uuid::new_v4(), Uuid::new_v4(), "c", Selector::default(), Utc::now());
        campaign_repo.create(&campaign).await.expect("create campaign");

        let phase = CampaignPhase::new(
            campaign.id,
            0,
            PhaseDefinition { name: "p1".into(), percentage: 10.0, success_threshold: 80.0, wait_minutes: 0, rollback_threshold: None },
        );
        phase_repo.create_many(std::slice::from_ref(&phase)).await.expect("create phase");

        phase_repo.increment_counts(phase.id, 1, 0).await.expect("inc 1");
        phase_repo.increment_counts(phase.id, 0, 1).await.expect("inc 2");

        let fetched = phase_repo.get(phase.id).await.expect("get").expect("present");
        assert_eq!(fetched.success_count, 1);
        assert_eq!(fetched.failure_count, 1);
    }
}
