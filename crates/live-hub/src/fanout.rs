//! Store change → `sensor_update` broadcast.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use hvacvibe_protocol::ServerEvent;
use hvacvibe_store::{ChangeKind, SensorSnapshot, SensorStore};

use crate::hub::LiveHub;

fn update_event(snap: &SensorSnapshot) -> ServerEvent {
    ServerEvent::SensorUpdate {
        data: snap.to_update(),
    }
}

/// One `sensor_update` per known sensor, ordered by id.
pub fn sensor_events(store: &SensorStore) -> Vec<ServerEvent> {
    store.snapshot_all().iter().map(update_event).collect()
}

/// Broadcasts the full state of every sensor the store reports as changed.
///
/// Updates are pushed as soon as the store emits them. If this task falls
/// behind the store's event channel, every sensor is re-sent once.
pub async fn run_fanout(store: SensorStore, hub: Arc<LiveHub>, cancel: CancellationToken) {
    let mut events = store.subscribe();
    info!("live fan-out started");

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            ev = events.recv() => ev,
        };

        match event {
            Ok(ev) if ev.kind == ChangeKind::Removed => {
                debug!(sensor = %ev.sensor_id, "sensor removed");
            }
            Ok(ev) => {
                if let Some(snap) = store.snapshot(&ev.sensor_id) {
                    hub.broadcast(&update_event(&snap));
                }
            }
            Err(RecvError::Lagged(missed)) => {
                warn!(missed, "fan-out lagged, resending all sensors");
                for event in sensor_events(&store) {
                    hub.broadcast(&event);
                }
            }
            Err(RecvError::Closed) => break,
        }
    }
    info!("live fan-out stopped");
}
