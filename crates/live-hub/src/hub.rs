//! Registry of connected viewers.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use hvacvibe_protocol::ServerEvent;

use crate::connection::{SendError, ViewerId, ViewerSender};

/// The set of live viewers.
///
/// Broadcasts serialize an event once and queue the same frame on every
/// viewer without waiting. Viewers whose queue overflows are removed here
/// and cancelled; the others never notice.
pub struct LiveHub {
    viewers: DashMap<ViewerId, ViewerSender>,
    next_id: AtomicU64,
    queue_capacity: usize,
}

impl LiveHub {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            viewers: DashMap::new(),
            next_id: AtomicU64::new(1),
            queue_capacity: queue_capacity.max(1),
        }
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Registers a new viewer whose session ends with `parent`.
    ///
    /// Returns the sender and the receiving end of its outbound queue.
    pub fn attach(&self, parent: &CancellationToken) -> (ViewerSender, mpsc::Receiver<WsMessage>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let viewer = ViewerSender::new(id, tx, parent.child_token());
        self.viewers.insert(id, viewer.clone());
        info!(viewer = id, viewers = self.viewers.len(), "viewer attached");
        (viewer, rx)
    }

    /// Removes a viewer. Returns `false` if it was already gone.
    pub fn detach(&self, id: ViewerId) -> bool {
        let removed = self.viewers.remove(&id).is_some();
        if removed {
            debug!(viewer = id, viewers = self.viewers.len(), "viewer detached");
        }
        removed
    }

    pub fn viewer_count(&self) -> usize {
        self.viewers.len()
    }

    pub fn contains(&self, id: ViewerId) -> bool {
        self.viewers.contains_key(&id)
    }

    /// Queues `event` on every viewer. Returns how many accepted it.
    pub fn broadcast(&self, event: &ServerEvent) -> usize {
        let json = match event.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!("failed to serialize broadcast: {e}");
                return 0;
            }
        };
        let frame = WsMessage::text(json);

        let mut delivered = 0;
        let mut dead = Vec::new();
        for entry in self.viewers.iter() {
            match entry.value().send_message(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => dead.push(*entry.key()),
            }
        }
        // Removal after iteration: the shard read guards are released by now.
        for id in dead {
            self.detach(id);
        }
        delivered
    }

    /// Queues `event` on a single viewer.
    pub fn send_to(&self, id: ViewerId, event: &ServerEvent) -> Result<(), SendError> {
        let viewer = self
            .viewers
            .get(&id)
            .map(|v| v.value().clone())
            .ok_or(SendError::Closed)?;
        let res = viewer.send_event(event);
        if res.is_err() {
            self.detach(id);
        }
        res
    }

    /// Closes every viewer session and empties the registry.
    pub fn close_all(&self) {
        let ids: Vec<ViewerId> = self.viewers.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, viewer)) = self.viewers.remove(&id) {
                viewer.close();
            }
        }
    }
}

impl Default for LiveHub {
    fn default() -> Self {
        Self::new(crate::DEFAULT_VIEWER_QUEUE)
    }
}
