//! Result reporter (spec §4.2 "Reconciliation", spec §5 "reporter
//! queue"): delivers terminal execution status back to the control
//! plane. Terminal reports must not be lost (spec §7), so delivery
//! retries indefinitely with capped exponential backoff rather than
//! bounding attempts.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use meridian_core::models::{ExecutionResult, ExecutionStatus};
use reqwest::Client;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use uuid::Uuid;

use crate::config::ReporterConfig;
use crate::executor::ReportSink;

struct TerminalReport {
    execution_id: Uuid,
    status: ExecutionStatus,
    result: ExecutionResult,
}

/// Bounded mpsc queue feeding a single background flusher task, the
/// same shape as the control plane's batched audit sink.
pub struct Reporter {
    tx: mpsc::Sender<TerminalReport>,
}

impl Reporter {
    pub fn new(http: Client, control_base_url: String, token: String, config: ReporterConfig, cancel: CancellationToken) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        tokio::spawn(drain(rx, http, control_base_url, token, config, cancel));
        Arc::new(Self { tx })
    }
}

#[async_trait]
impl ReportSink for Reporter {
    async fn report(&self, execution_id: Uuid, status: ExecutionStatus, result: ExecutionResult) {
        if self.tx.send(TerminalReport { execution_id, status, result }).await.is_err() {
            error!(%execution_id, "reporter queue closed, terminal report dropped");
        }
    }
}

async fn drain(mut rx: mpsc::Receiver<TerminalReport>, http: Client, control_base_url: String, token: String, config: ReporterConfig, cancel: CancellationToken) {
    loop {
        let report = tokio::select! {
            report = rx.recv() => match report {
                Some(report) => report,
                None => return,
            },
            () = cancel.cancelled() => return,
        };
        deliver(&http, &control_base_url, &token, &config, &cancel, report).await;
    }
}

async fn deliver(http: &Client, control_base_url: &str, token: &str, config: &ReporterConfig, cancel: &CancellationToken, report: TerminalReport) {
    let url = format!("{}/api/v1/executions/{}/terminal", control_base_url.trim_end_matches('/'), report.execution_id);
    let body = serde_json::json!({ "status": report.status, "result": report.result });

    let mut delay = Duration::from_millis(config.backoff_initial_ms);
    let max_delay = Duration::from_millis(config.backoff_max_ms);

    loop {
        if cancel.is_cancelled() {
            return;
        }
        match http.post(&url).bearer_auth(token).json(&body).send().await {
            Ok(response) if response.status().is_success() => return,
            Ok(response) => warn!(execution_id = %report.execution_id, status = %response.status(), "terminal report rejected, retrying"),
            Err(err) => warn!(execution_id = %report.execution_id, error = %err, "terminal report transport error, retrying"),
        }

        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = cancel.cancelled() => return,
        }
        delay = std::cmp::min(max_delay, Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier));
    }
}
