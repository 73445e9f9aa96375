//! Reverse tunnel client (spec §4.4): maintains a single persistent
//! outbound connection to the tunnel fabric and serves inbound
//! HTTP-framed requests over it via the local request router.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::TunnelConfig;
use crate::local_http::LocalRouter;

use super::backoff::BackoffPolicy;

/// Connection state observables for health export (spec §4.4 "State
/// observables"). The tunnel I/O loop exclusively owns the connection;
/// readers only ever see this flag and the last error (spec §5).
#[derive(Default)]
pub struct TunnelState {
    connected: AtomicBool,
    last_error: RwLock<Option<String>>,
}

impl TunnelState {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub async fn last_error(&self) -> Option<String> {
        self.last_error.read().await.clone()
    }

    fn set_connected(&self, value: bool) {
        self.connected.store(value, Ordering::Relaxed);
    }

    async fn set_error(&self, error: Option<String>) {
        *self.last_error.write().await = error;
    }
}

pub struct TunnelClient {
    config: TunnelConfig,
    tenant_id: String,
    agent_id: String,
    token: String,
    router: Arc<LocalRouter>,
    state: Arc<TunnelState>,
}

impl TunnelClient {
    /// `state` is shared with the caller (typically the health monitor),
    /// since the router serving this connection is itself built from a
    /// health monitor that must observe the same connection.
    pub fn new(config: TunnelConfig, tenant_id: String, agent_id: String, token: String, router: Arc<LocalRouter>, state: Arc<TunnelState>) -> Self {
        Self { config, tenant_id, agent_id, token, router, state }
    }

    pub fn state(&self) -> Arc<TunnelState> {
        Arc::clone(&self.state)
    }

    /// Runs the reconnect loop until `cancel` fires. Connection failures
    /// never propagate out — they are logged, reflected in `state`, and
    /// retried per the backoff policy (indefinite reconnect per spec
    /// §4.4).
    pub async fn run(&self, cancel: CancellationToken) {
        let mut backoff = BackoffPolicy::new(
            Duration::from_millis(self.config.backoff_initial_ms),
            Duration::from_millis(self.config.backoff_max_ms),
            self.config.backoff_multiplier,
        );

        while !cancel.is_cancelled() {
            match self.connect_and_serve(&cancel).await {
                Ok(()) => {
                    info!("tunnel connection closed cleanly");
                    backoff.reset();
                }
                Err(err) => {
                    warn!(error = %err, "tunnel connection failed, backing off");
                    self.state.set_error(Some(err.to_string())).await;
                }
            }
            self.state.set_connected(false);

            if cancel.is_cancelled() {
                return;
            }
            let delay = backoff.next_delay();
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = cancel.cancelled() => return,
            }
        }
    }

    async fn connect_and_serve(&self, cancel: &CancellationToken) -> anyhow::Result<()> {
        let endpoint = format!("tenant-{}/{}", self.tenant_id, self.agent_id);
        let url = format!("{}/upstream/{}", self.config.fabric_url.trim_end_matches('/'), endpoint);

        let mut request = url.into_client_request()?;
        request.headers_mut().insert("Authorization", format!("Bearer {}", self.token).parse()?);
        request.headers_mut().insert("X-Tenant-Id", self.tenant_id.parse()?);

        let (ws_stream, _response) =
            tokio::time::timeout(Duration::from_secs(self.config.handshake_timeout_secs), tokio_tungstenite::connect_async(request)).await??;

        info!(%endpoint, "tunnel connected");
        self.state.set_connected(true);
        self.state.set_error(None).await;

        let (mut write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                frame = read.next() => {
                    match frame {
                        Some(Ok(Message::Binary(bytes))) => {
                            let response = self.router.dispatch_frame(&bytes).await;
                            write.send(Message::Binary(response)).await?;
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            write.send(Message::Pong(payload)).await?;
                        }
                        Some(Ok(Message::Close(_))) | None => return Ok(()),
                        Some(Ok(_)) => {}
                        Some(Err(err)) => return Err(err.into()),
                    }
                }
                () = cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
            }
        }
    }
}
