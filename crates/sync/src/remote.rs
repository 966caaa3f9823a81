//! Scheduled replication of store readings to a [`Publisher`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use hvacvibe_protocol::Backoff;
use hvacvibe_store::SensorStore;

use crate::pending::PendingQueue;
use crate::publisher::{PublishRecord, Publisher};

/// RemoteSync tuning.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub enabled: bool,
    pub interval: Duration,
    /// Maximum records per publish call.
    pub batch_size: usize,
    /// Pending records kept while the remote is unreachable.
    pub max_pending: usize,
    pub retry: Backoff,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(60),
            batch_size: 500,
            max_pending: 10_000,
            retry: Backoff::new(Duration::from_secs(5), Duration::from_secs(300)),
        }
    }
}

/// Point-in-time sync health.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncStatus {
    pub enabled: bool,
    pub publisher: String,
    pub last_sync: Option<NaiveDateTime>,
    pub last_error: Option<String>,
    pub records_sent_today: u64,
    pub pending: usize,
    /// Records evicted from the pending queue since start.
    pub dropped: u64,
    pub consecutive_failures: u32,
}

/// Drains store snapshots into the publisher on its own schedule.
///
/// Each cycle enqueues every sensor's latest reading newer than what was
/// already enqueued, then publishes the queue in batches. A failed batch
/// stays queued and the next attempt waits for the retry backoff. Only
/// snapshots are read; producers and viewers are never blocked.
pub struct RemoteSync {
    store: SensorStore,
    publisher: Arc<dyn Publisher>,
    config: SyncConfig,
    pending: PendingQueue<PublishRecord>,
    enqueued: HashMap<String, NaiveDateTime>,
    synced: HashMap<String, NaiveDateTime>,
    retry_at: Option<Instant>,
    today: Option<NaiveDate>,
    status: SyncStatus,
    status_tx: watch::Sender<SyncStatus>,
}

impl RemoteSync {
    pub fn new(store: SensorStore, publisher: Arc<dyn Publisher>, config: SyncConfig) -> Self {
        let status = SyncStatus {
            enabled: config.enabled,
            publisher: publisher.name().to_string(),
            ..SyncStatus::default()
        };
        let (status_tx, _) = watch::channel(status.clone());
        Self {
            store,
            publisher,
            pending: PendingQueue::new(config.max_pending),
            config,
            enqueued: HashMap::new(),
            synced: HashMap::new(),
            retry_at: None,
            today: None,
            status,
            status_tx,
        }
    }

    /// Subscribes to status updates, published after every cycle.
    pub fn status(&self) -> watch::Receiver<SyncStatus> {
        self.status_tx.subscribe()
    }

    /// Timestamp of the newest reading successfully published for a sensor.
    pub fn last_synced(&self, sensor_id: &str) -> Option<NaiveDateTime> {
        self.synced.get(sensor_id).copied()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Runs cycles every `interval` until `cancel` fires.
    ///
    /// Cancellation is observed only between cycles, so at most the cycle
    /// already in flight completes after shutdown is requested.
    pub async fn run(mut self, cancel: CancellationToken) {
        if !self.config.enabled {
            info!("remote sync disabled");
            return;
        }
        info!(
            publisher = self.publisher.name(),
            interval_secs = self.config.interval.as_secs(),
            "remote sync started"
        );

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.run_cycle().await;
        }
        info!(pending = self.pending.len(), "remote sync stopped");
    }

    /// One collect + publish pass.
    pub async fn run_cycle(&mut self) {
        let now = chrono::Local::now().naive_local();
        if self.today != Some(now.date()) {
            if self.today.is_some() {
                debug!("new day, resetting sent counter");
            }
            self.today = Some(now.date());
            self.status.records_sent_today = 0;
        }

        self.collect();
        self.flush(now).await;

        self.status.pending = self.pending.len();
        self.status_tx.send_replace(self.status.clone());
    }

    fn collect(&mut self) {
        let mut dropped = 0u64;
        for snap in self.store.snapshot_all() {
            let Some(latest) = snap.latest.as_ref() else {
                continue;
            };
            if self
                .enqueued
                .get(&snap.sensor_id)
                .is_some_and(|ts| *ts >= latest.timestamp)
            {
                continue;
            }
            self.enqueued.insert(snap.sensor_id.clone(), latest.timestamp);
            if self
                .pending
                .push(PublishRecord::from_reading(&snap.name, latest))
                .is_some()
            {
                dropped += 1;
            }
        }
        if dropped > 0 {
            self.status.dropped += dropped;
            warn!(
                dropped,
                capacity = self.pending.capacity(),
                "pending queue full, oldest records dropped"
            );
        }
    }

    async fn flush(&mut self, now: NaiveDateTime) {
        if self.pending.is_empty() {
            return;
        }
        if self.retry_at.is_some_and(|at| Instant::now() < at) {
            debug!(pending = self.pending.len(), "publish deferred by backoff");
            return;
        }

        // Bounded by the queue length at cycle start.
        let mut remaining = self.pending.len();
        while remaining > 0 {
            let batch = self.pending.peek_front(self.config.batch_size.max(1));
            match self.publisher.send(&batch).await {
                Ok(sent) => {
                    self.pending.pop_front(batch.len());
                    remaining = remaining.saturating_sub(batch.len());
                    for rec in &batch {
                        let entry = self.synced.entry(rec.sensor_id.clone()).or_insert(rec.ts);
                        if rec.ts > *entry {
                            *entry = rec.ts;
                        }
                    }
                    self.status.last_sync = Some(now);
                    self.status.last_error = None;
                    self.status.records_sent_today += sent as u64;
                    self.status.consecutive_failures = 0;
                    self.retry_at = None;
                    info!(records = sent, publisher = self.publisher.name(), "sync ok");
                }
                Err(e) => {
                    self.status.consecutive_failures =
                        self.status.consecutive_failures.saturating_add(1);
                    let delay = self
                        .config
                        .retry
                        .delay_for_attempt(self.status.consecutive_failures);
                    self.retry_at = Some(Instant::now() + delay);
                    self.status.last_error = Some(e.to_string());
                    warn!(
                        attempt = self.status.consecutive_failures,
                        retry_in_secs = delay.as_secs(),
                        pending = self.pending.len(),
                        "sync failed: {e}"
                    );
                    break;
                }
            }
        }
    }
}
