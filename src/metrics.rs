use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Operational counters for monitoring
#[derive(Clone)]
pub struct Metrics {
    pub items_created: Arc<AtomicU64>,
    pub items_updated: Arc<AtomicU64>,
    pub items_deleted: Arc<AtomicU64>,
    pub status_transitions: Arc<AtomicU64>,
    pub searches: Arc<AtomicU64>,
    pub images_uploaded: Arc<AtomicU64>,
    pub match_tasks_queued: Arc<AtomicU64>,
    pub match_tasks_dropped: Arc<AtomicU64>,
    pub match_tasks_processed: Arc<AtomicU64>,
    pub match_tasks_failed: Arc<AtomicU64>,
    /// Tasks enqueued but not yet picked up by the worker.
    pub match_backlog: Arc<AtomicI64>,
    pub candidates_written: Arc<AtomicU64>,
    pub candidates_unchanged: Arc<AtomicU64>,
    pub candidates_skipped: Arc<AtomicU64>,
    pub start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            items_created: Arc::new(AtomicU64::new(0)),
            items_updated: Arc::new(AtomicU64::new(0)),
            items_deleted: Arc::new(AtomicU64::new(0)),
            status_transitions: Arc::new(AtomicU64::new(0)),
            searches: Arc::new(AtomicU64::new(0)),
            images_uploaded: Arc::new(AtomicU64::new(0)),
            match_tasks_queued: Arc::new(AtomicU64::new(0)),
            match_tasks_dropped: Arc::new(AtomicU64::new(0)),
            match_tasks_processed: Arc::new(AtomicU64::new(0)),
            match_tasks_failed: Arc::new(AtomicU64::new(0)),
            match_backlog: Arc::new(AtomicI64::new(0)),
            candidates_written: Arc::new(AtomicU64::new(0)),
            candidates_unchanged: Arc::new(AtomicU64::new(0)),
            candidates_skipped: Arc::new(AtomicU64::new(0)),
            start_time: Instant::now(),
        }
    }

    pub fn inc_items_created(&self) {
        self.items_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_items_updated(&self) {
        self.items_updated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_items_deleted(&self) {
        self.items_deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_status_transitions(&self) {
        self.status_transitions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_searches(&self) {
        self.searches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_images_uploaded(&self) {
        self.images_uploaded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_queued(&self) {
        self.match_tasks_queued.fetch_add(1, Ordering::Relaxed);
        self.match_backlog.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_dropped(&self) {
        self.match_tasks_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Called when the worker takes a task off the queue.
    pub fn task_dequeued(&self) {
        self.match_backlog.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn task_processed(&self) {
        self.match_tasks_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_failed(&self) {
        self.match_tasks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_candidates_written(&self, count: u64) {
        self.candidates_written.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_candidates_unchanged(&self, count: u64) {
        self.candidates_unchanged.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_candidates_skipped(&self, count: u64) {
        self.candidates_skipped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn get_snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            items_created: self.items_created.load(Ordering::Relaxed),
            items_updated: self.items_updated.load(Ordering::Relaxed),
            items_deleted: self.items_deleted.load(Ordering::Relaxed),
            status_transitions: self.status_transitions.load(Ordering::Relaxed),
            searches: self.searches.load(Ordering::Relaxed),
            images_uploaded: self.images_uploaded.load(Ordering::Relaxed),
            match_tasks_queued: self.match_tasks_queued.load(Ordering::Relaxed),
            match_tasks_dropped: self.match_tasks_dropped.load(Ordering::Relaxed),
            match_tasks_processed: self.match_tasks_processed.load(Ordering::Relaxed),
            match_tasks_failed: self.match_tasks_failed.load(Ordering::Relaxed),
            match_backlog: self.match_backlog.load(Ordering::Relaxed).max(0) as u64,
            candidates_written: self.candidates_written.load(Ordering::Relaxed),
            candidates_unchanged: self.candidates_unchanged.load(Ordering::Relaxed),
            candidates_skipped: self.candidates_skipped.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub items_created: u64,
    pub items_updated: u64,
    pub items_deleted: u64,
    pub status_transitions: u64,
    pub searches: u64,
    pub images_uploaded: u64,
    pub match_tasks_queued: u64,
    pub match_tasks_dropped: u64,
    pub match_tasks_processed: u64,
    pub match_tasks_failed: u64,
    pub match_backlog: u64,
    pub candidates_written: u64,
    pub candidates_unchanged: u64,
    pub candidates_skipped: u64,
    pub uptime_seconds: u64,
}
