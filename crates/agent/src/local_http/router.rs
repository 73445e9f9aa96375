//! Local request router (spec §6 "Agent local HTTP surface"), served
//! over the tunnel rather than a bound TCP listener. Handler bodies are
//! thin: deserialize, call into the executor or health monitor, and
//! serialize the result, the same division of responsibility as the
//! control plane's HTTP handlers.

use std::collections::HashMap;
use std::sync::Arc;

use http::StatusCode;
use meridian_core::models::WorkflowDefinition;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use crate::executor::WorkflowExecutor;
use crate::health::HealthMonitor;

use super::wire::{WireRequest, WireResponse};

/// Mutable agent-local settings exposed through `GET|PUT /agent/config`.
/// Only the fields safe to change at runtime are exposed here; identity
/// and tunnel credentials are fixed at enrolment.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentConfigSnapshot {
    pub log_level: Option<String>,
}

pub struct LocalRouter {
    executor: Arc<WorkflowExecutor>,
    health: Arc<HealthMonitor>,
    config: RwLock<AgentConfigSnapshot>,
}

impl LocalRouter {
    pub fn new(executor: Arc<WorkflowExecutor>, health: Arc<HealthMonitor>) -> Arc<Self> {
        Arc::new(Self { executor, health, config: RwLock::new(AgentConfigSnapshot::default()) })
    }

    /// Decodes one tunnel frame, dispatches it, and re-encodes the
    /// response. Never panics: malformed frames produce a 400 response
    /// rather than dropping the connection.
    pub async fn dispatch_frame(&self, bytes: &[u8]) -> Vec<u8> {
        let request: WireRequest = match serde_json::from_slice(bytes) {
            Ok(request) => request,
            Err(err) => {
                let response = WireResponse::error(0, StatusCode::BAD_REQUEST, format!("malformed frame: {err}"));
                return serde_json::to_vec(&response).unwrap_or_default();
            }
        };
        let response = self.dispatch(request).await;
        serde_json::to_vec(&response).unwrap_or_default()
    }

    async fn dispatch(&self, request: WireRequest) -> WireResponse {
        let id = request.id;
        let query = request.query.clone();
        let method_str = request.method.clone();
        let path_str = request.path.clone();

        let http_request = match request.into_request() {
            Ok(request) => request,
            Err(err) => return WireResponse::error(id, StatusCode::BAD_REQUEST, format!("malformed request: {err}")),
        };
        let method = http_request.method().clone();
        let path = http_request.uri().path().to_string();
        let body = http_request.into_body();

        match (method.as_str(), path.as_str()) {
            ("GET", "/healthz") => WireResponse::empty(id, if self.health.is_live() { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE }),
            ("GET", "/readyz") => WireResponse::empty(id, if self.health.is_ready() { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE }),
            ("GET", "/status") => WireResponse::json(id, StatusCode::OK, &self.health.report().await),
            ("POST", "/workflow/execute") => self.execute_workflow(id, &body).await,
            ("GET", "/workflow/status") => self.workflow_status(id, &query).await,
            ("POST", "/workflow/cancel") => self.cancel_workflow(id, &query).await,
            ("GET", "/agent/config") => WireResponse::json(id, StatusCode::OK, &*self.config.read().await),
            ("PUT", "/agent/config") => self.update_config(id, &body).await,
            ("GET", "/agent/upgrade") => WireResponse::json(id, StatusCode::OK, &serde_json::json!({ "pending": false })),
            ("POST", "/agent/upgrade") => {
                warn!("upgrade requested but no upgrade mechanism is wired up");
                WireResponse::empty(id, StatusCode::ACCEPTED)
            }
            _ => WireResponse::error(id, StatusCode::NOT_FOUND, format!("no route for {method_str} {path_str}")),
        }
    }

    async fn execute_workflow(&self, id: u64, body: &str) -> WireResponse {
        #[derive(Deserialize)]
        struct ExecuteRequest {
            execution_id: Uuid,
            workflow_id: Uuid,
            definition: WorkflowDefinition,
            #[serde(default)]
            parameters: HashMap<String, String>,
        }

        let body: ExecuteRequest = match serde_json::from_str(body) {
            Ok(body) => body,
            Err(err) => return WireResponse::error(id, StatusCode::BAD_REQUEST, format!("invalid body: {err}")),
        };

        match self.executor.submit(body.execution_id, body.workflow_id, body.definition, body.parameters).await {
            Ok(()) => WireResponse::empty(id, StatusCode::ACCEPTED),
            Err(err) => WireResponse::error(id, status_for(&err), err.to_string()),
        }
    }

    async fn workflow_status(&self, id: u64, query: &HashMap<String, String>) -> WireResponse {
        let Some(execution_id) = query.get("id").and_then(|value| value.parse::<Uuid>().ok()) else {
            return WireResponse::error(id, StatusCode::BAD_REQUEST, "missing or invalid ?id=");
        };
        match self.executor.status(execution_id).await {
            Some(snapshot) => WireResponse::json(id, StatusCode::OK, &snapshot),
            None => WireResponse::error(id, StatusCode::NOT_FOUND, format!("execution {execution_id} not found")),
        }
    }

    async fn cancel_workflow(&self, id: u64, query: &HashMap<String, String>) -> WireResponse {
        let Some(execution_id) = query.get("id").and_then(|value| value.parse::<Uuid>().ok()) else {
            return WireResponse::error(id, StatusCode::BAD_REQUEST, "missing or invalid ?id=");
        };
        match self.executor.cancel(execution_id).await {
            Ok(()) => WireResponse::empty(id, StatusCode::OK),
            Err(err) => WireResponse::error(id, status_for(&err), err.to_string()),
        }
    }

    async fn update_config(&self, id: u64, body: &str) -> WireResponse {
        let update: AgentConfigSnapshot = match serde_json::from_str(body) {
            Ok(update) => update,
            Err(err) => return WireResponse::error(id, StatusCode::BAD_REQUEST, format!("invalid body: {err}")),
        };
        *self.config.write().await = update.clone();
        WireResponse::json(id, StatusCode::OK, &update)
    }
}

fn status_for(err: &meridian_core::Error) -> StatusCode {
    match err.kind {
        meridian_core::ErrorKind::Validation => StatusCode::BAD_REQUEST,
        meridian_core::ErrorKind::NotFound => StatusCode::NOT_FOUND,
        meridian_core::ErrorKind::Conflict => StatusCode::CONFLICT,
        meridian_core::ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
        meridian_core::ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        meridian_core::ErrorKind::QuotaExceeded => StatusCode::TOO_MANY_REQUESTS,
        meridian_core::ErrorKind::UpstreamUnavailable => StatusCode::BAD_GATEWAY,
        meridian_core::ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        meridian_core::ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
