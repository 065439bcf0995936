//! Service state management and component initialization

use anyhow::{Context, Result};
use live_scoring::memory::{ChannelBroadcaster, InMemoryPreferenceStore, InMemoryScoreStore, LiveEvent};
use live_scoring::{
    EnginePorts, LeaderboardService, LiveScoringScheduler, LiveScoringState, NotificationEngine, NotificationSink,
    PollOrchestrator, StatsSource, SystemClock,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ServiceConfig;
use crate::rosters::load_rosters;
use crate::sportsdataio::SportsDataIoStatsSource;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Notification sink that writes deliveries to the log
#[derive(Debug, Default)]
pub struct TracingNotificationSink;

#[async_trait::async_trait]
impl NotificationSink for TracingNotificationSink {
    async fn send(&self, user_id: &str, title: &str, body: &str, payload: &Value) -> live_scoring::Result<()> {
        info!(user_id, title, body, %payload, "Push notification");
        Ok(())
    }

    async fn schedule(
        &self,
        user_id: &str,
        title: &str,
        body: &str,
        payload: &Value,
        deliver_at_epoch_ms: i64,
    ) -> live_scoring::Result<()> {
        info!(user_id, title, body, %payload, deliver_at_epoch_ms, "Scheduled push notification");
        Ok(())
    }

    async fn register_device(&self, user_id: &str, device_token: &str, platform: &str) -> live_scoring::Result<()> {
        info!(user_id, device_token, platform, "Device registered");
        Ok(())
    }
}

/// Service state containing all initialized components
pub struct LiveScoringService {
    pub config: ServiceConfig,
    pub scheduler: Arc<LiveScoringScheduler>,
    pub orchestrator: Arc<PollOrchestrator>,
    pub leaderboard: Arc<LeaderboardService>,
    pub notifications: Arc<NotificationEngine>,
    pub broadcaster: Arc<ChannelBroadcaster>,
}

impl LiveScoringService {
    /// Wire the engine against SportsDataIO and the configured roster file
    pub fn new(config: ServiceConfig) -> Result<Self> {
        info!("Initializing live scoring components...");

        let api_key = config.sportsdataio.api_key()?;
        let stats: Arc<dyn StatsSource> = Arc::new(
            SportsDataIoStatsSource::new(&config.sportsdataio, api_key)
                .context("Failed to create SportsDataIO client")?,
        );

        Self::with_stats_source(config, stats)
    }

    /// Wire the engine against an arbitrary stats source
    pub fn with_stats_source(config: ServiceConfig, stats: Arc<dyn StatsSource>) -> Result<Self> {
        let rosters = Arc::new(
            load_rosters(&config.rosters.path, &config.rosters.leagues).context("Failed to load league rosters")?,
        );
        let broadcaster = Arc::new(ChannelBroadcaster::new(EVENT_CHANNEL_CAPACITY));
        let store = Arc::new(InMemoryScoreStore::new());
        let clock = Arc::new(SystemClock);

        let notifications = Arc::new(NotificationEngine::new(
            Arc::new(TracingNotificationSink),
            Arc::new(InMemoryPreferenceStore::new()),
            rosters.clone(),
            clock.clone(),
            config.engine.notifications.clone(),
        ));

        let state = Arc::new(LiveScoringState::new());
        let ports = EnginePorts {
            stats: stats.clone(),
            rosters: rosters.clone(),
            store: store.clone(),
            broadcaster: broadcaster.clone(),
            clock: clock.clone(),
        };

        let orchestrator =
            Arc::new(PollOrchestrator::new(Arc::clone(&state), ports, Arc::clone(&notifications), &config.engine));

        let scheduler = Arc::new(LiveScoringScheduler::new(
            Arc::clone(&orchestrator),
            Arc::clone(&notifications),
            config.engine.clone(),
            config.season.week,
            config.season.season,
        ));

        let leaderboard = Arc::new(LeaderboardService::new(
            state,
            store,
            stats,
            rosters,
            clock,
            config.engine.leaderboard.clone(),
        ));

        info!(week = config.season.week, season = config.season.season, "Live scoring components initialized");

        Ok(Self { config, scheduler, orchestrator, leaderboard, notifications, broadcaster })
    }

    /// Start the scheduler loops, plus the event log when enabled
    pub fn start(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        if self.config.service.log_events {
            handles.push(self.spawn_event_logger(shutdown.clone()));
        }
        handles.extend(self.scheduler.start(shutdown));
        handles
    }

    fn spawn_event_logger(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let mut events = self.broadcaster.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(event) => log_event(&event),
                        Err(RecvError::Lagged(missed)) => warn!(missed, "Event logger lagged behind"),
                        Err(RecvError::Closed) => break,
                    },
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Event logger stopped");
        })
    }
}

fn log_event(event: &LiveEvent) {
    match event {
        LiveEvent::ScoreUpdate(snapshot) => debug!(
            entrant_id = %snapshot.entrant_id,
            league_id = %snapshot.league_id,
            new_score = %snapshot.new_score,
            delta = %snapshot.delta,
            "score_update"
        ),
        LiveEvent::RankChanges { league_id, changes } => {
            debug!(league_id = %league_id, changes = changes.len(), "rank_changes")
        }
        LiveEvent::Leaderboard { league_id, ranked } => {
            debug!(league_id = %league_id, entrants = ranked.len(), "leaderboard")
        }
        LiveEvent::GameCompleted(completed) => debug!(
            league_id = %completed.league_id,
            game_id = %completed.game_id,
            affected = completed.affected_entrants.len(),
            "game_completed"
        ),
        LiveEvent::DelayWarning { league_id, message, retry_after_secs } => {
            debug!(league_id = %league_id, retry_after_secs, "delay_warning: {}", message)
        }
    }
}
