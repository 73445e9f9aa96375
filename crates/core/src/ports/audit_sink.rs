use async_trait::async_trait;

use crate::errors::Result;
use crate::models::AuditEvent;

/// Fire-and-forget batched event writer (spec §1 out-of-scope interface,
/// §5 "audit batch"). `record` never blocks the caller on I/O; `flush`
/// drains the buffer and is what actually performs it.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent);
    async fn flush(&self) -> Result<()>;
}
