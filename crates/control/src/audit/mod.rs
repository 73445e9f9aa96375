//! Batched audit sink: `record` buffers in memory and returns
//! immediately; a background task periodically flushes the buffer to
//! Quickwit's bulk ingest endpoint (spec §5 "audit batch", §6 config).
//! Adapted from the teacher's `services/audit_log.rs` in-memory buffer
//! pattern, with network flushing grafted on.

use async_trait::async_trait;
use meridian_core::models::AuditEvent;
use meridian_core::ports::AuditSink;
use meridian_core::Result;
use reqwest::Client;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::QuickwitConfig;

/// Hard cap on the in-memory buffer; beyond this, oldest events are
/// dropped rather than risking unbounded memory growth under sustained
/// ingest outages.
const MAX_BUFFERED_EVENTS: usize = 50_000;

pub struct BatchedAuditSink {
    buffer: Arc<Mutex<VecDeque<AuditEvent>>>,
    client: Client,
    config: QuickwitConfig,
}

impl BatchedAuditSink {
    pub fn new(config: QuickwitConfig) -> Self {
        Self { buffer: Arc::new(Mutex::new(VecDeque::new())), client: Client::new(), config }
    }

    /// Spawns the periodic flusher. Callers keep the returned handle and
    /// `cancel` to stop it cleanly during shutdown.
    pub fn spawn_flusher(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let sink = Arc::clone(self);
        let interval = Duration::from_secs(sink.config.flush_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = sink.flush().await {
                            warn!(error = %err, "audit flush failed");
                        }
                    }
                    () = cancel.cancelled() => break,
                }
            }
        })
    }

    async fn drain(&self) -> Vec<AuditEvent> {
        let mut buffer = self.buffer.lock().await;
        buffer.drain(..).collect()
    }

    /// Puts events back at the front of the queue, preserving order, so a
    /// failed flush doesn't lose them.
    async fn requeue(&self, events: Vec<AuditEvent>) {
        let mut buffer = self.buffer.lock().await;
        for event in events.into_iter().rev() {
            buffer.push_front(event);
        }
        while buffer.len() > MAX_BUFFERED_EVENTS {
            buffer.pop_front();
        }
    }
}

#[async_trait]
impl AuditSink for BatchedAuditSink {
    async fn record(&self, event: AuditEvent) {
        let mut buffer = self.buffer.lock().await;
        if buffer.len() >= MAX_BUFFERED_EVENTS {
            buffer.pop_front();
        }
        buffer.push_back(event);
    }

    async fn flush(&self) -> Result<()> {
        let events = self.drain().await;
        if events.is_empty() {
            return Ok(());
        }

        let Some(endpoint) = self.config.endpoint.as_ref() else {
            debug!(count = events.len(), "no quickwit endpoint configured, dropping audit batch");
            return Ok(());
        };

        let url = format!("{endpoint}/api/v1/{}/ingest", self.config.index_id);
        let body: String = events.iter().filter_map(|e| serde_json::to_string(e).ok()).map(|line| line + "\n").collect();

        let result = self.client.post(&url).header("content-type", "application/x-ndjson").body(body).send().await;

        match result {
            Ok(resp) if resp.status().is_success() => Ok(()),
            Ok(resp) => {
                warn!(status = %resp.status(), "quickwit ingest rejected audit batch, requeuing");
                self.requeue(events).await;
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "quickwit ingest unreachable, requeuing");
                self.requeue(events).await;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use meridian_core::models::AuditOutcome;
    use uuid::Uuid;

    #[tokio::test]
    async fn flush_with_no_endpoint_drains_without_error() {
        let sink = BatchedAuditSink::new(QuickwitConfig { endpoint: None, index_id: "x".into(), flush_interval_secs: 5 });
        sink.record(AuditEvent::new(Uuid::new_v4(), "tenant", "create", AuditOutcome::Success, "user:1", "tenant:1", Utc::now())).await;
        sink.flush().await.expect("flush");
        assert!(sink.buffer.lock().await.is_empty());
    }

    #[tokio::test]
    async fn buffer_drops_oldest_past_cap() {
        let sink = BatchedAuditSink::new(QuickwitConfig { endpoint: None, index_id: "x".into(), flush_interval_secs: 5 });
        for _ in 0..(MAX_BUFFERED_EVENTS + 10) {
            sink.record(AuditEvent::new(Uuid::new_v4(), "tenant", "create", AuditOutcome::Success, "user:1", "tenant:1", Utc::now())).await;
        }
        assert_eq!(sink.buffer.lock().await.len(), MAX_BUFFERED_EVENTS);
    }
}
