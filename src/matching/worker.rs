use std::time::Duration;

use chrono::Utc;
use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::queue::{MatchQueue, MatchTask};
use super::scoring::Scorer;
use crate::config::MatchingConfig;
use crate::error::AppResult;
use crate::metrics::Metrics;
use crate::store::{items, matches, matches::UpsertOutcome};
use crate::types::{Item, ItemKind, MatchCandidate};

/// What a single matching pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassOutcome {
    /// Item was deleted or is no longer matchable.
    pub skipped_item: bool,
    pub considered: usize,
    pub written: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub retired: u64,
}

/// Consumes matching tasks off the request path.
#[derive(Clone)]
pub struct MatchWorker {
    db: SqlitePool,
    scorer: Scorer,
    window_ms: i64,
    sweep_interval: Duration,
    queue: MatchQueue,
    metrics: Metrics,
}

fn pair(item: &Item, other: &Item) -> (Uuid, Uuid) {
    match item.kind {
        ItemKind::Lost => (item.id, other.id),
        ItemKind::Found => (other.id, item.id),
    }
}

impl MatchWorker {
    pub fn new(db: SqlitePool, cfg: &MatchingConfig, queue: MatchQueue, metrics: Metrics) -> Self {
        Self {
            db,
            scorer: Scorer::from_config(cfg),
            window_ms: i64::from(cfg.time_window_hours) * 3_600_000,
            sweep_interval: Duration::from_secs(cfg.sweep_interval_secs.max(1)),
            queue,
            metrics,
        }
    }

    /// Runs until `cancel` fires or every queue handle is dropped.
    pub async fn run(self, mut rx: mpsc::Receiver<MatchTask>, cancel: CancellationToken) {
        tracing::info!(sweep_secs = self.sweep_interval.as_secs(), "match worker started");
        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                task = rx.recv() => match task {
                    Some(task) => {
                        self.metrics.task_dequeued();
                        self.handle(task).await;
                    }
                    None => break,
                },
                _ = sweep.tick() => {
                    if let Err(e) = self.sweep().await {
                        tracing::warn!("match sweep failed: {}", e);
                    }
                }
            }
        }
        tracing::info!("match worker stopped");
    }

    async fn handle(&self, task: MatchTask) {
        match self.run_pass(task.item_id).await {
            Ok(outcome) => {
                self.metrics.task_processed();
                tracing::debug!(item_id = %task.item_id, ?outcome, "matching pass done");
            }
            Err(e) => {
                self.metrics.task_failed();
                tracing::warn!(item_id = %task.item_id, error = %e, "matching pass failed; item stays pending");
            }
        }
    }

    /// Re-enqueues items still flagged pending. Runs only while the queue is
    /// idle so tasks already waiting are not duplicated.
    pub async fn sweep(&self) -> AppResult<usize> {
        if !self.queue.is_idle() {
            return Ok(0);
        }
        let mut conn = self.db.acquire().await?;
        let ids = items::pending_match_ids(&mut conn, self.queue.max_capacity() as i64).await?;
        drop(conn);
        let mut queued = 0;
        for id in ids {
            if !self.queue.enqueue(id) {
                break;
            }
            queued += 1;
        }
        if queued > 0 {
            tracing::info!(queued, "re-enqueued pending items for matching");
        }
        Ok(queued)
    }

    /// Scores `item_id` against its counterparts and persists qualifying pairs.
    ///
    /// Reads and writes share one transaction. If the item changes while the
    /// pass runs, its pending flag survives and the next pass recomputes.
    pub async fn run_pass(&self, item_id: Uuid) -> AppResult<PassOutcome> {
        let mut outcome = PassOutcome::default();
        let mut tx = self.db.begin().await?;

        let item = match items::fetch_item(&mut tx, item_id).await? {
            Some(item) if item.status.is_matchable() => item,
            Some(item) => {
                items::clear_match_pending(&mut tx, item.id, item.version).await?;
                tx.commit().await?;
                outcome.skipped_item = true;
                return Ok(outcome);
            }
            None => {
                outcome.skipped_item = true;
                return Ok(outcome);
            }
        };

        let counterparts = items::matching_counterparts(&mut tx, &item, self.window_ms).await?;
        outcome.considered = counterparts.len();
        let now = Utc::now();
        let mut keep = Vec::new();

        for other in &counterparts {
            let breakdown = match self.scorer.score(&item, other) {
                Ok(Some(b)) if self.scorer.qualifies(b.total) => b,
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(item_id = %item.id, other_id = %other.id, "skipping candidate: {}", e);
                    outcome.skipped += 1;
                    continue;
                }
            };
            let (lost_id, found_id) = pair(&item, other);
            let candidate = MatchCandidate { lost_id, found_id, score: breakdown.total, generated_at: now, stale: false };
            match matches::upsert_candidate(&mut tx, &candidate).await? {
                UpsertOutcome::Inserted | UpsertOutcome::Superseded => outcome.written += 1,
                UpsertOutcome::Unchanged => outcome.unchanged += 1,
            }
            keep.push((lost_id, found_id));
        }

        outcome.retired = matches::retire_unlisted(&mut tx, item.id, &keep).await?;
        items::clear_match_pending(&mut tx, item.id, item.version).await?;
        tx.commit().await?;

        self.metrics.add_candidates_written(outcome.written as u64);
        self.metrics.add_candidates_unchanged(outcome.unchanged as u64);
        self.metrics.add_candidates_skipped(outcome.skipped as u64);
        Ok(outcome)
    }
}
