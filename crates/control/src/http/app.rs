//! Router skeleton (spec §6). Handlers are intentionally thin: they
//! deserialize, call one service method, and serialize the result —
//! request routing is a Non-goal, the services above hold the logic.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::middleware;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use meridian_core::jwt::{Claims, JwtCodec};
use meridian_core::models::{PhaseDefinition, Selector, WorkflowDefinition};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use meridian_core::models::{ExecutionResult, ExecutionStatus};

use super::auth::require_bearer_auth;
use super::ApiError;
use crate::services::campaign_engine::CampaignProgress;
use crate::services::{CampaignEngine, DispatchClient, EnrollmentService, RegistryService, TenantService, WorkflowService};
use crate::services::enrollment_service::EnrollRequest;

pub struct AppState {
    pub jwt: Arc<JwtCodec>,
    pub tenants: Arc<TenantService>,
    pub registry: Arc<RegistryService>,
    pub workflows: Arc<WorkflowService>,
    pub campaigns: Arc<CampaignEngine>,
    pub enrollment: Arc<EnrollmentService>,
    pub dispatch: Arc<DispatchClient>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let authenticated = Router::new()
        .route("/api/v1/agent/heartbeat", post(heartbeat))
        .route("/api/v1/agent/health", post(agent_health))
        .route("/api/v1/tenants", get(list_tenants).post(create_tenant))
        .route("/api/v1/agents", get(list_agents))
        .route("/api/v1/agents/:id", get(get_agent).delete(deregister_agent))
        .route("/api/v1/workflows", get(list_workflows).post(create_workflow))
        .route("/api/v1/workflows/:id", get(get_workflow))
        .route("/api/v1/workflows/:id/activate", post(activate_workflow))
        .route("/api/v1/campaigns", post(create_campaign))
        .route("/api/v1/campaigns/:id", get(get_campaign))
        .route("/api/v1/campaigns/:id/start", post(start_campaign))
        .route("/api/v1/campaigns/:id/pause", post(pause_campaign))
        .route("/api/v1/campaigns/:id/cancel", post(cancel_campaign))
        .route("/api/v1/campaigns/:id/progress", get(campaign_progress))
        .route("/api/v1/executions/:id/terminal", post(report_execution_terminal))
        .route_layer(middleware::from_fn_with_state(Arc::clone(&state), require_bearer_auth));

    Router::new()
        .route("/health", get(health))
        .route("/ready", get(health))
        .route("/api/v1/agents/register", post(register_agent))
        .merge(authenticated)
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Deserialize)]
struct RegisterAgentRequest {
    installation_key: String,
    agent_id: Option<String>,
    hostname: String,
    os: String,
    arch: String,
    version: String,
    #[serde(default)]
    tags: HashMap<String, String>,
}

#[derive(Serialize)]
struct RegisterAgentResponse {
    token: String,
    agent_id: String,
    tenant_id: Uuid,
    endpoint: String,
}

async fn register_agent(State(state): State<Arc<AppState>>, Json(req): Json<RegisterAgentRequest>) -> Result<Json<RegisterAgentResponse>, ApiError> {
    let response = state
        .enrollment
        .enroll(EnrollRequest {
            installation_key: req.installation_key,
            agent_id: req.agent_id,
            hostname: req.hostname,
            os: req.os,
            arch: req.arch,
            version: req.version,
            tags: req.tags,
        })
        .await?;
    Ok(Json(RegisterAgentResponse { token: response.token, agent_id: response.agent_id, tenant_id: response.tenant_id, endpoint: response.endpoint }))
}

async fn heartbeat(State(state): State<Arc<AppState>>, Extension(claims): Extension<Claims>) -> Result<(), ApiError> {
    let agent_id = claims.agent_id.ok_or_else(|| meridian_core::Error::unauthorized("heartbeat requires an agent token"))?;
    state.registry.heartbeat(claims.tenant_id, &agent_id).await?;
    Ok(())
}

/// Health reports are audited, not stored structurally — the health
/// monitor's own composed-check detail lives entirely agent-side
/// (spec §4.3's "Health monitor"); the control plane just records receipt.
async fn agent_health(Extension(_claims): Extension<Claims>) -> &'static str {
    "ok"
}

#[derive(Deserialize)]
struct CreateTenantRequest {
    name: String,
    agent_quota: u32,
    workflow_quota: u32,
}

async fn create_tenant(State(state): State<Arc<AppState>>, Json(req): Json<CreateTenantRequest>) -> Result<Json<meridian_core::models::Tenant>, ApiError> {
    Ok(Json(state.tenants.create(req.name, req.agent_quota, req.workflow_quota).await?))
}

async fn list_tenants(Extension(claims): Extension<Claims>, State(state): State<Arc<AppState>>) -> Result<Json<meridian_core::models::Tenant>, ApiError> {
    Ok(Json(state.tenants.get(claims.tenant_id).await?))
}

async fn list_agents(Extension(claims): Extension<Claims>, State(state): State<Arc<AppState>>) -> Result<Json<Vec<AgentView>>, ApiError> {
    let agents = state.registry.list(claims.tenant_id).await?;
    Ok(Json(agents.into_iter().map(AgentView::from).collect()))
}

async fn get_agent(Extension(claims): Extension<Claims>, State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Result<Json<AgentView>, ApiError> {
    let found = state.registry.get(claims.tenant_id, &id).await?.ok_or_else(|| meridian_core::Error::not_found(format!("agent {id} not found")))?;
    Ok(Json(AgentView::from(found)))
}

/// Deregistration (spec §4.1 edge case): cancels in-flight executions
/// targeting this agent before deleting it, so it can never again
/// become a cohort candidate.
async fn deregister_agent(Extension(claims): Extension<Claims>, State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Result<(), ApiError> {
    state.registry.deregister(claims.tenant_id, &id).await?;
    Ok(())
}

#[derive(Serialize)]
struct AgentView {
    id: String,
    status: meridian_core::models::AgentStatus,
    hostname: String,
    tags: HashMap<String, String>,
}

impl From<(meridian_core::models::Agent, meridian_core::models::AgentStatus)> for AgentView {
    fn from((agent, status): (meridian_core::models::Agent, meridian_core::models::AgentStatus)) -> Self {
        Self { id: agent.id, status, hostname: agent.hostname, tags: agent.tags }
    }
}

#[derive(Deserialize)]
struct CreateWorkflowRequest {
    name: String,
    definition: WorkflowDefinition,
}

async fn create_workflow(Extension(claims): Extension<Claims>, State(state): State<Arc<AppState>>, Json(req): Json<CreateWorkflowRequest>) -> Result<Json<meridian_core::models::Workflow>, ApiError> {
    Ok(Json(state.workflows.create(claims.tenant_id, req.name, req.definition).await?))
}

async fn list_workflows(Extension(claims): Extension<Claims>, State(state): State<Arc<AppState>>) -> Result<Json<Vec<meridian_core::models::Workflow>>, ApiError> {
    Ok(Json(state.workflows.list(claims.tenant_id).await?))
}

async fn get_workflow(Extension(claims): Extension<Claims>, State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Result<Json<meridian_core::models::Workflow>, ApiError> {
    Ok(Json(state.workflows.get(claims.tenant_id, id).await?))
}

async fn activate_workflow(Extension(claims): Extension<Claims>, State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Result<Json<meridian_core::models::Workflow>, ApiError> {
    Ok(Json(state.workflows.activate(claims.tenant_id, id).await?))
}

#[derive(Deserialize)]
struct CreateCampaignRequest {
    workflow_id: Uuid,
    name: String,
    target_selector: Selector,
    phases: Vec<PhaseDefinition>,
}

async fn create_campaign(Extension(claims): Extension<Claims>, State(state): State<Arc<AppState>>, Json(req): Json<CreateCampaignRequest>) -> Result<Json<meridian_core::models::Campaign>, ApiError> {
    Ok(Json(state.campaigns.create(claims.tenant_id, req.workflow_id, req.name, req.target_selector, req.phases).await?))
}

async fn get_campaign(Extension(claims): Extension<Claims>, State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Result<Json<CampaignProgress>, ApiError> {
    Ok(Json(state.campaigns.progress(claims.tenant_id, id).await?))
}

async fn start_campaign(Extension(claims): Extension<Claims>, State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Result<(), ApiError> {
    state.campaigns.start(claims.tenant_id, id).await?;
    Ok(())
}

async fn pause_campaign(Extension(claims): Extension<Claims>, State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Result<(), ApiError> {
    state.campaigns.pause(claims.tenant_id, id).await?;
    Ok(())
}

async fn cancel_campaign(Extension(claims): Extension<Claims>, State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Result<(), ApiError> {
    state.campaigns.cancel(claims.tenant_id, id).await?;
    Ok(())
}

async fn campaign_progress(Extension(claims): Extension<Claims>, State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Result<Json<CampaignProgress>, ApiError> {
    Ok(Json(state.campaigns.progress(claims.tenant_id, id).await?))
}

#[derive(Deserialize)]
struct ReportTerminalRequest {
    status: ExecutionStatus,
    #[serde(default)]
    result: Option<ExecutionResult>,
}

/// Agent-reported terminal status for a dispatched execution (spec §4.2
/// "Reconciliation"). The reporting tenant is taken from the agent JWT,
/// never from the request body, so a compromised agent can only settle
/// executions belonging to its own tenant.
async fn report_execution_terminal(Extension(claims): Extension<Claims>, State(state): State<Arc<AppState>>, Path(id): Path<Uuid>, Json(req): Json<ReportTerminalRequest>) -> Result<(), ApiError> {
    state.dispatch.reconcile_terminal(id, claims.tenant_id, req.status, req.result).await?;
    Ok(())
}
