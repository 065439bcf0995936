//! Metrics collection for the live scoring scheduler

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Point-in-time view of the poll metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollMetricsSnapshot {
    /// Poll passes started
    pub polls_run: u64,

    /// Ticks skipped because a poll was still running or rate limited
    pub polls_skipped: u64,

    /// League cycles that ran to completion (including quiet exits)
    pub cycles_completed: u64,

    /// League cycles that ended in an error or panic
    pub cycles_failed: u64,

    /// League cycles skipped because the stats source was down
    pub cycles_unavailable: u64,

    /// Score snapshots committed across all leagues
    pub updates_committed: u64,

    /// Notification batches flushed
    pub batches_flushed: u64,

    /// Duration of the last poll pass in milliseconds
    pub last_poll_duration_ms: u64,

    /// Longest poll pass in milliseconds
    pub max_poll_duration_ms: u64,

    /// Scheduler uptime in seconds
    pub uptime_seconds: u64,
}

/// Atomic counters updated by the scheduler loops
#[derive(Debug)]
pub struct PollMetrics {
    polls_run: AtomicU64,
    polls_skipped: AtomicU64,
    cycles_completed: AtomicU64,
    cycles_failed: AtomicU64,
    cycles_unavailable: AtomicU64,
    updates_committed: AtomicU64,
    batches_flushed: AtomicU64,
    last_poll_duration_ms: AtomicU64,
    max_poll_duration_ms: AtomicU64,
    start_time: Instant,
}

impl Default for PollMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PollMetrics {
    pub fn new() -> Self {
        Self {
            polls_run: AtomicU64::new(0),
            polls_skipped: AtomicU64::new(0),
            cycles_completed: AtomicU64::new(0),
            cycles_failed: AtomicU64::new(0),
            cycles_unavailable: AtomicU64::new(0),
            updates_committed: AtomicU64::new(0),
            batches_flushed: AtomicU64::new(0),
            last_poll_duration_ms: AtomicU64::new(0),
            max_poll_duration_ms: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a finished poll pass
    pub fn record_poll(&self, duration: Duration) {
        let duration_ms = duration.as_millis() as u64;
        self.polls_run.fetch_add(1, Ordering::Relaxed);
        self.last_poll_duration_ms.store(duration_ms, Ordering::Relaxed);
        self.max_poll_duration_ms.fetch_max(duration_ms, Ordering::Relaxed);
    }

    pub fn record_skip(&self) {
        self.polls_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cycle_completed(&self, updates: usize) {
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
        self.updates_committed.fetch_add(updates as u64, Ordering::Relaxed);
    }

    pub fn record_cycle_failed(&self) {
        self.cycles_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cycle_unavailable(&self) {
        self.cycles_unavailable.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush(&self, batches: usize) {
        self.batches_flushed.fetch_add(batches as u64, Ordering::Relaxed);
    }

    /// Get current metrics
    pub fn snapshot(&self) -> PollMetricsSnapshot {
        PollMetricsSnapshot {
            polls_run: self.polls_run.load(Ordering::Relaxed),
            polls_skipped: self.polls_skipped.load(Ordering::Relaxed),
            cycles_completed: self.cycles_completed.load(Ordering::Relaxed),
            cycles_failed: self.cycles_failed.load(Ordering::Relaxed),
            cycles_unavailable: self.cycles_unavailable.load(Ordering::Relaxed),
            updates_committed: self.updates_committed.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            last_poll_duration_ms: self.last_poll_duration_ms.load(Ordering::Relaxed),
            max_poll_duration_ms: self.max_poll_duration_ms.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }
}
