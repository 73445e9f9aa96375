//! Health monitor (spec §4.3 "Active-job count is atomic; health
//! exports it", spec §4.4 "State observables"): composes the tunnel
//! connection state and executor load into one status report.

use std::sync::Arc;

use serde::Serialize;

use crate::executor::WorkflowExecutor;
use crate::tunnel::TunnelState;

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub connected: bool,
    pub last_error: Option<String>,
    pub active_jobs: usize,
}

pub struct HealthMonitor {
    tunnel: Arc<TunnelState>,
    executor: Arc<WorkflowExecutor>,
}

impl HealthMonitor {
    pub fn new(tunnel: Arc<TunnelState>, executor: Arc<WorkflowExecutor>) -> Self {
        Self { tunnel, executor }
    }

    pub async fn report(&self) -> HealthReport {
        HealthReport { connected: self.tunnel.is_connected(), last_error: self.tunnel.last_error().await, active_jobs: self.executor.active_count() }
    }

    /// Liveness never depends on tunnel state — a disconnected agent is
    /// still a live process that should not be restarted.
    pub fn is_live(&self) -> bool {
        true
    }

    pub fn is_ready(&self) -> bool {
        self.tunnel.is_connected()
    }
}
