//! Handler trait for viewer sessions.
//!
//! The server owns sockets, pumps and the viewer registry; implementors own
//! what a command means.

use std::future::Future;
use std::pin::Pin;

use hvacvibe_protocol::{ProtocolError, ServerEvent, ViewerCommand};

use crate::connection::{ViewerId, ViewerSender};

/// A boxed future returned by handler methods.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Reacts to viewer lifecycle and inbound commands.
///
/// Methods run on the viewer's read pump, so a slow backing operation must
/// be spawned rather than awaited or it stalls that viewer's intake.
pub trait Handler: Send + Sync + 'static {
    /// Called for every decoded command.
    fn on_command(&self, viewer: ViewerSender, cmd: ViewerCommand) -> HandlerFuture<'_>;

    /// Called once the viewer is registered for broadcasts.
    fn on_viewer_connected(&self, viewer: ViewerSender) -> HandlerFuture<'_> {
        let _ = viewer;
        Box::pin(async {})
    }

    /// Called for frames that are not valid commands. Replies with a failed
    /// `cmd_result`; the connection stays open.
    fn on_invalid(&self, viewer: ViewerSender, err: ProtocolError) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = viewer.send_event(&ServerEvent::result(err.cmd(), false, err.to_string()));
        })
    }

    /// Called after the viewer left the registry.
    fn on_viewer_disconnected(&self, id: ViewerId) -> HandlerFuture<'_> {
        let _ = id;
        Box::pin(async {})
    }
}
