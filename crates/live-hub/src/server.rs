//! Viewer WebSocket server.
//!
//! Listens on a TCP port, upgrades every connection to WebSocket and
//! registers it with the [`LiveHub`]. Any number of viewers may be
//! connected at once.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_tungstenite::accept_async_with_config;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_util::sync::CancellationToken;

use hvacvibe_protocol::constants::WS_MAX_MESSAGE_SIZE;

use crate::ServerError;
use crate::connection::{self, CLOSE_TIMEOUT};
use crate::handler::Handler;
use crate::hub::LiveHub;

/// Time allowed for viewer sessions to finish after shutdown.
const SHUTDOWN_GRACE: Duration = CLOSE_TIMEOUT.saturating_add(Duration::from_secs(1));

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: IpAddr,
    /// TCP port to listen on (0 = OS-assigned).
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8765,
        }
    }
}

/// The viewer WebSocket server.
pub struct HubServer<H: Handler> {
    config: ServerConfig,
    hub: Arc<LiveHub>,
    handler: Arc<H>,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl<H: Handler> HubServer<H> {
    /// Creates a server. Viewer sessions are children of `cancel`.
    pub fn new(
        config: ServerConfig,
        hub: Arc<LiveHub>,
        handler: Arc<H>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            hub,
            handler,
            cancel,
            local_addr: Mutex::new(None),
        })
    }

    pub fn hub(&self) -> &Arc<LiveHub> {
        &self.hub
    }

    /// Returns the local address once [`run`](Self::run) has bound.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Returns the listening port (0 if not yet bound).
    pub async fn port(&self) -> u16 {
        self.local_addr.lock().await.map(|a| a.port()).unwrap_or(0)
    }

    /// Stops accepting and closes every viewer.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Binds the listener and accepts viewers until cancelled.
    ///
    /// On shutdown every viewer is closed and its session awaited, so the
    /// close frames are on the wire when this returns.
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        let addr = SocketAddr::new(self.config.bind, self.config.port);
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        tracing::info!("viewer server listening on {local_addr}");

        let mut sessions = JoinSet::new();
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("viewer server shutting down");
                    self.hub.close_all();
                    break;
                }

                Some(done) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = done {
                        tracing::warn!("viewer session ended abnormally: {e}");
                    }
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let server = Arc::clone(self);
                            sessions.spawn(async move {
                                if let Err(e) = server.handle_connection(stream, peer_addr).await {
                                    tracing::warn!(%peer_addr, "viewer connection failed: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("accept error: {e}");
                        }
                    }
                }
            }
        }

        drop(listener);
        let drain = async { while sessions.join_next().await.is_some() {} };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            tracing::warn!(remaining = sessions.len(), "viewer sessions did not finish, aborting");
            sessions.shutdown().await;
        }
        Ok(())
    }

    async fn handle_connection(
        self: &Arc<Self>,
        stream: TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<(), ServerError> {
        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
        let ws_stream = accept_async_with_config(stream, Some(ws_config)).await?;

        if self.cancel.is_cancelled() {
            return Ok(());
        }

        let (viewer, rx) = self.hub.attach(&self.cancel);
        tracing::info!(viewer = viewer.id(), %peer_addr, "viewer connected");
        connection::serve_viewer(
            ws_stream,
            viewer,
            rx,
            Arc::clone(&self.handler),
            Arc::clone(&self.hub),
            peer_addr,
        )
        .await;
        Ok(())
    }
}
