//! Live fan-out of sensor state to dashboard viewers.
//!
//! Viewers connect over WebSocket. Each one gets a bounded outbound queue
//! drained by its own write pump; a viewer that lets its queue overflow is
//! dropped and has to reconnect. Inbound commands are decoded and handed to
//! a [`Handler`].

mod connection;
mod fanout;
mod handler;
mod hub;
mod server;

pub use connection::{SendError, ViewerId, ViewerSender};
pub use fanout::{run_fanout, sensor_events};
pub use handler::{Handler, HandlerFuture};
pub use hub::LiveHub;
pub use server::{HubServer, ServerConfig};

/// Default per-viewer outbound queue capacity, in messages.
pub const DEFAULT_VIEWER_QUEUE: usize = 64;

/// Errors produced by the viewer server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}
