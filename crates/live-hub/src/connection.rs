//! Viewer connection: bounded send queue, read/write pumps, ping/pong.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use hvacvibe_protocol::ServerEvent;
use hvacvibe_protocol::ViewerCommand;
use hvacvibe_protocol::constants::{WS_MAX_MESSAGE_SIZE, WS_PING_PERIOD, WS_PONG_WAIT};

use crate::handler::Handler;
use crate::hub::LiveHub;

/// Upper bound on the closing handshake with a viewer that stopped reading.
pub(crate) const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Identifier assigned to a viewer for the lifetime of its connection.
pub type ViewerId = u64;

/// Handle for queueing messages to one viewer.
///
/// Cloneable and cheap. Sends never wait: a full queue drops the viewer.
#[derive(Clone)]
pub struct ViewerSender {
    id: ViewerId,
    tx: mpsc::Sender<WsMessage>,
    cancel: CancellationToken,
}

/// Error returned when a message could not be queued.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("viewer queue overflow, viewer dropped")]
    Overflow,

    #[error("viewer disconnected")]
    Closed,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ViewerSender {
    pub(crate) fn new(id: ViewerId, tx: mpsc::Sender<WsMessage>, cancel: CancellationToken) -> Self {
        Self { id, tx, cancel }
    }

    pub fn id(&self) -> ViewerId {
        self.id
    }

    /// Serializes and queues one event.
    pub fn send_event(&self, event: &ServerEvent) -> Result<(), SendError> {
        let json = event.to_json()?;
        self.send_message(WsMessage::text(json))
    }

    /// Queues a prepared frame. On overflow the viewer's session is cancelled.
    pub(crate) fn send_message(&self, msg: WsMessage) -> Result<(), SendError> {
        if self.cancel.is_cancelled() {
            return Err(SendError::Closed);
        }
        match self.tx.try_send(msg) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(viewer = self.id, "viewer queue full, dropping viewer");
                self.cancel.cancel();
                Err(SendError::Overflow)
            }
            Err(TrySendError::Closed(_)) => Err(SendError::Closed),
        }
    }

    /// Returns `true` while the session is alive.
    pub fn is_connected(&self) -> bool {
        !self.cancel.is_cancelled() && !self.tx.is_closed()
    }

    /// Ends the session; the pumps send a close frame and exit.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Serves an upgraded viewer socket until both pumps have finished.
///
/// The viewer must already be attached to `hub`. When the read side ends,
/// the viewer is detached and the handler notified; the write side then
/// sends its close frame before this returns.
pub(crate) async fn serve_viewer<S, H>(
    ws_stream: S,
    viewer: ViewerSender,
    rx: mpsc::Receiver<WsMessage>,
    handler: Arc<H>,
    hub: Arc<LiveHub>,
    peer: SocketAddr,
) where
    S: futures_util::Stream<Item = Result<WsMessage, tungstenite::Error>>
        + futures_util::Sink<WsMessage, Error = tungstenite::Error>
        + Send
        + 'static,
    H: Handler,
{
    let (ws_sink, ws_stream) = ws_stream.split();
    let writer = write_pump(ws_sink, rx, viewer.cancel_token().clone());

    let reader = async {
        handler.on_viewer_connected(viewer.clone()).await;
        read_pump(ws_stream, &viewer, handler.as_ref()).await;

        viewer.close();
        hub.detach(viewer.id());
        handler.on_viewer_disconnected(viewer.id()).await;
    };

    tokio::join!(writer, reader);
    info!(viewer = viewer.id(), %peer, "viewer disconnected");
}

/// Drains the viewer queue into the socket and pings periodically.
async fn write_pump<S>(mut sink: S, mut rx: mpsc::Receiver<WsMessage>, cancel: CancellationToken)
where
    S: futures_util::Sink<WsMessage, Error = tungstenite::Error> + Send + Unpin,
{
    let mut ping_interval = tokio::time::interval(WS_PING_PERIOD);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,

            msg = rx.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },

            _ = ping_interval.tick() => WsMessage::Ping(Vec::new().into()),
        };

        // A viewer that stopped reading can stall the socket; cancellation
        // must still get through.
        tokio::select! {
            _ = cancel.cancelled() => break,
            res = sink.send(frame) => {
                if let Err(e) = res {
                    debug!("viewer write error: {e}");
                    break;
                }
            }
        }
    }

    let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await;
}

/// Reads viewer frames and dispatches decoded commands.
///
/// Any inbound frame resets the pong deadline; after [`WS_PONG_WAIT`] of
/// silence the viewer is considered dead.
async fn read_pump<S, H>(mut stream: S, viewer: &ViewerSender, handler: &H)
where
    S: futures_util::Stream<Item = Result<WsMessage, tungstenite::Error>> + Unpin,
    H: Handler + ?Sized,
{
    let cancel = viewer.cancel_token().clone();
    let pong_deadline = tokio::time::sleep(WS_PONG_WAIT);
    tokio::pin!(pong_deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            () = &mut pong_deadline => {
                warn!(viewer = viewer.id(), "pong timeout, closing viewer");
                break;
            }

            frame = stream.next() => {
                let msg = match frame {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        debug!(viewer = viewer.id(), "viewer read error: {e}");
                        break;
                    }
                    None => break,
                };
                pong_deadline.as_mut().reset(tokio::time::Instant::now() + WS_PONG_WAIT);

                match msg {
                    WsMessage::Text(text) => {
                        if text.len() > WS_MAX_MESSAGE_SIZE {
                            warn!(viewer = viewer.id(), len = text.len(), "oversized message dropped");
                            continue;
                        }
                        match ViewerCommand::parse(&text) {
                            Ok(cmd) => {
                                debug!(viewer = viewer.id(), cmd = cmd.name(), "command received");
                                handler.on_command(viewer.clone(), cmd).await;
                            }
                            Err(e) => {
                                debug!(viewer = viewer.id(), "invalid viewer message: {e}");
                                handler.on_invalid(viewer.clone(), e).await;
                            }
                        }
                    }
                    WsMessage::Ping(data) => {
                        let _ = viewer.send_message(WsMessage::Pong(data));
                    }
                    WsMessage::Pong(_) => trace!(viewer = viewer.id(), "pong"),
                    WsMessage::Close(_) => {
                        debug!(viewer = viewer.id(), "received close frame");
                        break;
                    }
                    WsMessage::Binary(_) | WsMessage::Frame(_) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use futures_util::stream;
    use hvacvibe_protocol::ProtocolError;

    use super::*;
    use crate::handler::HandlerFuture;

    #[derive(Default)]
    struct Recorder {
        commands: Mutex<Vec<ViewerCommand>>,
        invalid: Mutex<Vec<String>>,
    }

    impl Handler for Recorder {
        fn on_command(&self, _viewer: ViewerSender, cmd: ViewerCommand) -> HandlerFuture<'_> {
            self.commands.lock().unwrap().push(cmd);
            Box::pin(async {})
        }

        fn on_invalid(&self, _viewer: ViewerSender, err: ProtocolError) -> HandlerFuture<'_> {
            self.invalid.lock().unwrap().push(err.cmd().to_string());
            Box::pin(async {})
        }
    }

    fn viewer(capacity: usize) -> (ViewerSender, mpsc::Receiver<WsMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (ViewerSender::new(7, tx, CancellationToken::new()), rx)
    }

    fn text(s: &str) -> Result<WsMessage, tungstenite::Error> {
        Ok(WsMessage::text(s.to_string()))
    }

    #[test]
    fn overflow_cancels_viewer() {
        let (v, _rx) = viewer(2);
        v.send_event(&ServerEvent::ToggleView).unwrap();
        v.send_event(&ServerEvent::ToggleView).unwrap();
        assert!(v.is_connected());

        assert!(matches!(
            v.send_event(&ServerEvent::ToggleView),
            Err(SendError::Overflow)
        ));
        assert!(!v.is_connected());
        assert!(matches!(
            v.send_event(&ServerEvent::ToggleView),
            Err(SendError::Closed)
        ));
    }

    #[test]
    fn dropped_receiver_is_closed() {
        let (v, rx) = viewer(4);
        drop(rx);
        assert!(matches!(
            v.send_event(&ServerEvent::ToggleView),
            Err(SendError::Closed)
        ));
    }

    #[tokio::test]
    async fn read_pump_dispatches_commands_and_invalid_frames() {
        let (v, mut rx) = viewer(8);
        let handler = Recorder::default();
        let frames = stream::iter(vec![
            text(r#"{"cmd":"wifi_scan"}"#),
            text("not json"),
            text(r#"{"type":"toggle_view"}"#),
            text(r#"{"cmd":"reboot"}"#),
            Ok(WsMessage::Ping(vec![1u8, 2].into())),
            text(r#"{"cmd":"ble_unpair","address":"AA"}"#),
        ]);

        read_pump(frames, &v, &handler).await;

        let cmds = handler.commands.lock().unwrap().clone();
        assert_eq!(
            cmds,
            vec![
                ViewerCommand::WifiScan,
                ViewerCommand::ToggleView,
                ViewerCommand::BleUnpair {
                    address: "AA".into()
                },
            ]
        );
        assert_eq!(*handler.invalid.lock().unwrap(), vec!["unknown", "reboot"]);
        assert!(matches!(rx.try_recv(), Ok(WsMessage::Pong(_))));
    }

    #[tokio::test]
    async fn read_pump_stops_at_close_frame() {
        let (v, _rx) = viewer(8);
        let handler = Recorder::default();
        let frames = stream::iter(vec![
            Ok(WsMessage::Close(None)),
            text(r#"{"cmd":"get_status"}"#),
        ]);

        read_pump(frames, &v, &handler).await;
        assert!(handler.commands.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn read_pump_times_out_on_silence() {
        let (v, _rx) = viewer(8);
        let handler = Recorder::default();
        let started = tokio::time::Instant::now();

        read_pump(stream::pending(), &v, &handler).await;
        assert!(started.elapsed() >= WS_PONG_WAIT);
    }

    #[tokio::test(start_paused = true)]
    async fn read_pump_deadline_resets_on_any_frame() {
        let (v, _rx) = viewer(8);
        let handler = Recorder::default();
        let wait = WS_PONG_WAIT - Duration::from_secs(1);
        let delayed = stream::once(async move {
            tokio::time::sleep(wait).await;
            Ok(WsMessage::Pong(Vec::new().into()))
        });
        let frames = Box::pin(delayed.chain(stream::pending()));
        let started = tokio::time::Instant::now();

        read_pump(frames, &v, &handler).await;
        assert!(started.elapsed() >= wait + WS_PONG_WAIT);
    }

    #[tokio::test]
    async fn read_pump_exits_when_viewer_is_dropped() {
        let (v, _rx) = viewer(8);
        let handler = Recorder::default();
        v.close();
        read_pump(stream::pending(), &v, &handler).await;
    }
}
