use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use crate::metrics::Metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchTask {
    pub item_id: Uuid,
}

/// Producer side of the matching queue.
///
/// Enqueueing never waits. When the queue is full the task is dropped; the
/// item keeps its `match_pending` flag and the periodic sweep picks it up.
#[derive(Clone)]
pub struct MatchQueue {
    tx: mpsc::Sender<MatchTask>,
    metrics: Metrics,
}

impl MatchQueue {
    pub fn bounded(capacity: usize, metrics: Metrics) -> (Self, mpsc::Receiver<MatchTask>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, metrics }, rx)
    }

    /// Returns `false` if the task could not be queued.
    pub fn enqueue(&self, item_id: Uuid) -> bool {
        match self.tx.try_send(MatchTask { item_id }) {
            Ok(()) => {
                self.metrics.task_queued();
                true
            }
            Err(TrySendError::Full(_)) => {
                self.metrics.task_dropped();
                tracing::warn!(%item_id, "match queue full; item stays pending for the sweep");
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.metrics.task_dropped();
                tracing::warn!(%item_id, "match worker is gone; item stays pending");
                false
            }
        }
    }

    /// True when no task is waiting.
    pub fn is_idle(&self) -> bool {
        self.tx.capacity() == self.tx.max_capacity()
    }

    pub fn max_capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}
