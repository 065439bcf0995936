//! Scheduler for live scoring
//!
//! Three loops share one shutdown signal: the poll loop runs a cycle for every
//! active league on a fixed interval, the flush loop delivers pending
//! notification batches, and the status loop logs polling metrics.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::LiveScoringConfig;
use crate::metrics::PollMetrics;
use crate::notifications::NotificationEngine;
use crate::orchestrator::{CycleOutcome, CycleStatus, PollOrchestrator};

/// Summary of one poll pass over every active league
#[derive(Debug, Clone, Default)]
pub struct PollPassSummary {
    pub skipped: bool,
    pub outcomes: Vec<CycleOutcome>,
    pub panicked: usize,
    pub duration: Duration,
}

/// Marks a poll pass as running until dropped, including when the pass
/// future is cancelled part way through
struct PassGuard<'a>(&'a AtomicBool);

impl<'a> PassGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        if flag.swap(true, Ordering::AcqRel) {
            None
        } else {
            Some(Self(flag))
        }
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct LiveScoringScheduler {
    orchestrator: Arc<PollOrchestrator>,
    notifications: Arc<NotificationEngine>,
    config: LiveScoringConfig,
    week: AtomicU32,
    season: AtomicU32,
    polling: AtomicBool,
    rate_limited_until: Mutex<Option<Instant>>,
    metrics: Arc<PollMetrics>,
}

impl LiveScoringScheduler {
    pub fn new(
        orchestrator: Arc<PollOrchestrator>,
        notifications: Arc<NotificationEngine>,
        config: LiveScoringConfig,
        week: u32,
        season: u32,
    ) -> Self {
        Self {
            orchestrator,
            notifications,
            config,
            week: AtomicU32::new(week),
            season: AtomicU32::new(season),
            polling: AtomicBool::new(false),
            rate_limited_until: Mutex::new(None),
            metrics: Arc::new(PollMetrics::new()),
        }
    }

    pub fn metrics(&self) -> Arc<PollMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Move polling to a new scoring week
    pub fn set_week(&self, week: u32, season: u32) {
        self.week.store(week, Ordering::Relaxed);
        self.season.store(season, Ordering::Relaxed);
        info!(week, season, "Live scoring week changed");
    }

    pub fn week(&self) -> (u32, u32) {
        (self.week.load(Ordering::Relaxed), self.season.load(Ordering::Relaxed))
    }

    /// Spawn the poll, flush and status loops. They stop when `shutdown` flips to `true`.
    pub fn start(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        info!(
            poll_interval_ms = self.config.polling.poll_interval_ms,
            flush_interval_ms = self.config.notifications.flush_interval_ms,
            "Starting live scoring scheduler"
        );

        let poller = Arc::clone(self);
        let poll_shutdown = shutdown.clone();
        let poll_loop = tokio::spawn(async move { poller.run_poll_loop(poll_shutdown).await });

        let flusher = Arc::clone(self);
        let flush_shutdown = shutdown.clone();
        let flush_loop = tokio::spawn(async move { flusher.run_flush_loop(flush_shutdown).await });

        let reporter = Arc::clone(self);
        let status_loop = tokio::spawn(async move { reporter.run_status_loop(shutdown).await });

        vec![poll_loop, flush_loop, status_loop]
    }

    /// Run one poll pass now, outside the interval
    pub async fn trigger_poll(&self) -> PollPassSummary {
        info!("Manual live scoring poll triggered");
        self.run_poll_pass().await
    }

    async fn run_poll_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.polling.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_poll_pass().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Poll loop stopping");
                        break;
                    }
                }
            }
        }
    }

    async fn run_flush_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.notifications.flush_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let flushed = self.notifications.flush_all().await;
                    self.metrics.record_flush(flushed);
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        let flushed = self.notifications.flush_all().await;
                        info!(flushed, "Flush loop stopping");
                        break;
                    }
                }
            }
        }
    }

    async fn run_status_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.polling.status_interval());
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = self.metrics.snapshot();
                    let (week, season) = self.week();
                    info!(
                        week,
                        season,
                        polls = snapshot.polls_run,
                        skipped = snapshot.polls_skipped,
                        failed = snapshot.cycles_failed,
                        updates = snapshot.updates_committed,
                        last_poll_ms = snapshot.last_poll_duration_ms,
                        "Live scoring status"
                    );
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// Poll every active league once. Skipped while a previous pass is still
    /// running or a rate-limit window is open.
    pub async fn run_poll_pass(&self) -> PollPassSummary {
        let Some(_pass) = PassGuard::acquire(&self.polling) else {
            debug!("Previous poll still running, skipping tick");
            self.metrics.record_skip();
            return PollPassSummary { skipped: true, ..Default::default() };
        };

        let summary = if self.rate_limit_open().await {
            debug!("Rate limit window open, skipping tick");
            self.metrics.record_skip();
            PollPassSummary { skipped: true, ..Default::default() }
        } else {
            self.poll_all_leagues().await
        };

        summary
    }

    async fn rate_limit_open(&self) -> bool {
        let mut until = self.rate_limited_until.lock().await;
        match *until {
            Some(deadline) if Instant::now() < deadline => true,
            Some(_) => {
                *until = None;
                false
            }
            None => false,
        }
    }

    async fn poll_all_leagues(&self) -> PollPassSummary {
        let started = Instant::now();
        let (week, season) = self.week();

        let leagues = match self.orchestrator.ports().rosters.active_leagues().await {
            Ok(leagues) => leagues,
            Err(e) => {
                error!(error = %e, "Failed to load active leagues");
                self.metrics.record_cycle_failed();
                return PollPassSummary { duration: started.elapsed(), ..Default::default() };
            }
        };

        let mut cycles = JoinSet::new();
        for league_id in leagues {
            let orchestrator = Arc::clone(&self.orchestrator);
            cycles.spawn(async move { orchestrator.poll_and_update(&league_id, week, season).await });
        }

        let mut summary = PollPassSummary::default();
        while let Some(joined) = cycles.join_next().await {
            match joined {
                Ok(outcome) => {
                    self.record_outcome(&outcome).await;
                    summary.outcomes.push(outcome);
                }
                Err(e) => {
                    error!(error = %e, "League scoring cycle panicked");
                    self.metrics.record_cycle_failed();
                    summary.panicked += 1;
                }
            }
        }

        summary.duration = started.elapsed();
        self.metrics.record_poll(summary.duration);
        if summary.duration > self.config.polling.backpressure_threshold() {
            warn!(
                duration_ms = summary.duration.as_millis() as u64,
                threshold_ms = self.config.polling.backpressure_threshold_ms,
                leagues = summary.outcomes.len(),
                "Live scoring poll is falling behind"
            );
        }
        summary
    }

    async fn record_outcome(&self, outcome: &CycleOutcome) {
        match &outcome.status {
            CycleStatus::Completed | CycleStatus::NoLiveGames | CycleStatus::NoStats => {
                self.metrics.record_cycle_completed(outcome.updates_committed);
            }
            CycleStatus::Unavailable { .. } => self.metrics.record_cycle_unavailable(),
            CycleStatus::RateLimited { retry_after_secs } => {
                self.metrics.record_cycle_failed();
                let deadline = Instant::now() + Duration::from_secs(u64::from(*retry_after_secs));
                let mut until = self.rate_limited_until.lock().await;
                if until.map_or(true, |current| current < deadline) {
                    *until = Some(deadline);
                }
            }
            CycleStatus::Failed { .. } => self.metrics.record_cycle_failed(),
        }
    }
}
