use std::sync::atomic::{AtomicU64, Ordering};

use super::{PublishFuture, PublishRecord, Publisher};

/// Accepts every batch and discards it. Used when no remote is configured.
#[derive(Debug, Default)]
pub struct NoopPublisher {
    accepted: AtomicU64,
}

impl NoopPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total records accepted since creation.
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }
}

impl Publisher for NoopPublisher {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn send<'a>(&'a self, batch: &'a [PublishRecord]) -> PublishFuture<'a> {
        self.accepted
            .fetch_add(batch.len() as u64, Ordering::Relaxed);
        let n = batch.len();
        Box::pin(async move { Ok(n) })
    }
}
