//! End-to-end tests of the poll cycle and scheduler over the in-memory adapters

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};

use crate::config::LiveScoringConfig;
use crate::leaderboard::LeaderboardService;
use crate::memory::{
    ChannelBroadcaster, InMemoryPreferenceStore, InMemoryRosterSource, InMemoryScoreStore, InMemoryStatsSource,
    LiveEvent, ManualClock, RecordingNotificationSink,
};
use crate::models::{GameStatus, PlayerId, PlayerStatLine, Position, Roster, RosterSlot, ScoreStatus};
use crate::notifications::NotificationEngine;
use crate::orchestrator::{CycleStatus, EnginePorts, PollOrchestrator};
use crate::ports::{RosterSource, ScoreStore};
use crate::scheduler::LiveScoringScheduler;
use crate::state::LiveScoringState;

const WEEK: u32 = 7;
const SEASON: u32 = 2026;

fn game_day() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 18, 17, 0, 0).unwrap()
}

fn runner(player_id: PlayerId, game_id: &str, rushing_yards: i32, touchdowns: i32) -> PlayerStatLine {
    PlayerStatLine {
        position: Some(Position::RB),
        game_id: Some(game_id.to_string()),
        rushing_yards,
        rushing_touchdowns: touchdowns,
        ..PlayerStatLine::new(player_id, format!("Runner {}", player_id))
    }
}

fn single_player_roster(entrant_id: &str, league_id: &str, player_id: PlayerId) -> Roster {
    Roster::new(entrant_id, league_id, vec![RosterSlot::filled("RB", player_id), RosterSlot::empty("FLEX")])
}

fn drain(events: &mut broadcast::Receiver<LiveEvent>) -> Vec<LiveEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

struct Harness {
    stats: Arc<InMemoryStatsSource>,
    rosters: Arc<InMemoryRosterSource>,
    store: Arc<InMemoryScoreStore>,
    sink: Arc<RecordingNotificationSink>,
    state: Arc<LiveScoringState>,
    notifications: Arc<NotificationEngine>,
    orchestrator: Arc<PollOrchestrator>,
    leaderboard: LeaderboardService,
    events: broadcast::Receiver<LiveEvent>,
    config: LiveScoringConfig,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(LiveScoringConfig::default())
    }

    fn with_config(config: LiveScoringConfig) -> Self {
        let stats = Arc::new(InMemoryStatsSource::new());
        let rosters = Arc::new(InMemoryRosterSource::new());
        let store = Arc::new(InMemoryScoreStore::new());
        let broadcaster = Arc::new(ChannelBroadcaster::new(256));
        let events = broadcaster.subscribe();
        let sink = Arc::new(RecordingNotificationSink::new());
        let clock = Arc::new(ManualClock::at(game_day()));
        let state = Arc::new(LiveScoringState::new());

        let notifications = Arc::new(NotificationEngine::new(
            sink.clone(),
            Arc::new(InMemoryPreferenceStore::new()),
            rosters.clone(),
            clock.clone(),
            config.notifications.clone(),
        ));
        let ports = EnginePorts {
            stats: stats.clone(),
            rosters: rosters.clone(),
            store: store.clone(),
            broadcaster,
            clock: clock.clone(),
        };
        let orchestrator = Arc::new(PollOrchestrator::new(state.clone(), ports, notifications.clone(), &config));
        let leaderboard = LeaderboardService::new(
            state.clone(),
            store.clone(),
            stats.clone(),
            rosters.clone(),
            clock,
            config.leaderboard.clone(),
        );

        Self { stats, rosters, store, sink, state, notifications, orchestrator, leaderboard, events, config }
    }

    /// One live game, three entrants each starting one running back
    async fn with_live_game(self) -> Self {
        self.stats.set_game("G1", GameStatus::InProgress).await;
        self.stats.set_line(runner(1, "G1", 50, 0)).await;
        self.stats.set_line(runner(2, "G1", 30, 0)).await;
        self.stats.set_line(runner(3, "G1", 80, 0)).await;
        self.rosters.set_rosters(
            "league-1",
            vec![
                single_player_roster("entrant-1", "league-1", 1),
                single_player_roster("entrant-2", "league-1", 2),
                single_player_roster("entrant-3", "league-1", 3),
            ],
        );
        self
    }

    async fn poll(&self) -> crate::orchestrator::CycleOutcome {
        self.orchestrator.poll_and_update("league-1", WEEK, SEASON).await
    }

    fn scheduler(&self) -> Arc<LiveScoringScheduler> {
        Arc::new(LiveScoringScheduler::new(
            self.orchestrator.clone(),
            self.notifications.clone(),
            self.config.clone(),
            WEEK,
            SEASON,
        ))
    }
}

#[cfg(test)]
#[allow(clippy::module_inception)]
mod integration_tests {
    use super::*;

    #[tokio::test]
    async fn test_repeated_poll_applies_update_once() {
        let mut harness = Harness::new().with_live_game().await;

        let first = harness.poll().await;
        assert_eq!(first.status, CycleStatus::Completed);
        assert_eq!(first.updates_committed, 3);

        let second = harness.poll().await;
        assert_eq!(second.status, CycleStatus::Completed);
        assert_eq!(second.updates_committed, 0);

        assert_eq!(harness.store.snapshot_count(), 3);
        assert_eq!(harness.store.save_calls(), 1);

        let score_updates = drain(&mut harness.events)
            .into_iter()
            .filter(|event| matches!(event, LiveEvent::ScoreUpdate(_)))
            .count();
        assert_eq!(score_updates, 3);
    }

    #[tokio::test]
    async fn test_overlapping_polls_apply_update_once() {
        let harness = Harness::new().with_live_game().await;

        let (first, second) = tokio::join!(harness.poll(), harness.poll());
        assert_eq!(first.status, CycleStatus::Completed);
        assert_eq!(second.status, CycleStatus::Completed);
        assert_eq!(first.updates_committed + second.updates_committed, 3);

        assert_eq!(harness.store.snapshot_count(), 3);
        assert_eq!(harness.store.save_calls(), 1);
    }

    #[tokio::test]
    async fn test_reverted_correction_keeps_store_and_leaderboard_in_step() {
        let harness = Harness::new().with_live_game().await;
        harness.poll().await;

        for yards in [55, 50, 55] {
            harness.stats.set_line(runner(1, "G1", yards, 0)).await;
            let outcome = harness.poll().await;
            assert_eq!(outcome.updates_committed, 1, "correction to {} yards", yards);
        }

        assert_eq!(harness.store.snapshot_count(), 6);
        let stored = harness.store.current_scores("league-1").await.unwrap();
        assert_eq!(stored["entrant-1"], dec!(5.50));
        assert_eq!(harness.state.league("league-1").previous_score("entrant-1"), dec!(5.50));

        let page = harness.leaderboard.leaderboard("league-1", 0, None).await.unwrap();
        let entry = page.entries.iter().find(|entry| entry.entrant_id == "entrant-1").unwrap();
        assert_eq!(entry.total_score, dec!(5.50));
    }

    #[tokio::test]
    async fn test_unchanged_cycle_still_broadcasts_leaderboard() {
        let mut harness = Harness::new().with_live_game().await;
        harness.poll().await;
        drain(&mut harness.events);

        let outcome = harness.poll().await;
        assert_eq!(outcome.updates_committed, 0);
        assert_eq!(outcome.rank_changes, 0);

        let events = drain(&mut harness.events);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], LiveEvent::Leaderboard { ranked, .. } if ranked.len() == 3));
    }

    #[tokio::test]
    async fn test_leaderboard_matches_cycle_ranking_for_scoreless_entrant() {
        let mut harness = Harness::new().with_live_game().await;
        let mut rosters = harness.rosters.rosters("league-1").await.unwrap();
        rosters.push(single_player_roster("entrant-4", "league-1", 4));
        harness.rosters.set_rosters("league-1", rosters);

        harness.poll().await;
        let broadcast = drain(&mut harness.events)
            .into_iter()
            .find_map(|event| match event {
                LiveEvent::Leaderboard { ranked, .. } => Some(ranked),
                _ => None,
            })
            .unwrap();
        assert_eq!(broadcast.len(), 4);

        let page = harness.leaderboard.leaderboard("league-1", 0, None).await.unwrap();
        assert_eq!(page.total_entrants, 4);
        let served: Vec<(String, u32)> = page.entries.iter().map(|entry| (entry.entrant_id.clone(), entry.rank)).collect();
        let cycle: Vec<(String, u32)> = broadcast.iter().map(|entry| (entry.entrant_id.clone(), entry.rank)).collect();
        assert_eq!(served, cycle);
        assert_eq!(served[3], ("entrant-4".to_string(), 4));
    }

    #[tokio::test]
    async fn test_restart_reloads_scores_instead_of_reapplying() {
        let harness = Harness::new().with_live_game().await;
        harness.poll().await;

        // Simulates a process restart: engine state gone, store intact
        harness.state.remove("league-1");
        let outcome = harness.poll().await;
        assert_eq!(outcome.updates_committed, 0);
        assert_eq!(harness.store.snapshot_count(), 3);
        assert_eq!(harness.state.league("league-1").previous_score("entrant-3"), dec!(8.00));
    }

    #[tokio::test]
    async fn test_unavailable_upstream_warns_once_and_keeps_caches() {
        let mut harness = Harness::new().with_live_game().await;
        harness.poll().await;
        drain(&mut harness.events);

        let league = harness.state.league("league-1");
        let scores_before = league.scores();
        let ranks_before = league.rank_history().await.current.clone();

        harness.stats.set_available(false);
        harness.stats.set_line(runner(1, "G1", 90, 1)).await;
        let outcome = harness.poll().await;
        assert_eq!(outcome.status, CycleStatus::Unavailable { retry_after_secs: 60 });

        let events = drain(&mut harness.events);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            LiveEvent::DelayWarning { league_id, retry_after_secs: 60, .. } if league_id == "league-1"
        ));

        assert_eq!(league.scores(), scores_before);
        assert_eq!(league.rank_history().await.current, ranks_before);
        assert_eq!(harness.store.snapshot_count(), 3);
    }

    #[tokio::test]
    async fn test_rate_limit_carries_upstream_hint() {
        let mut harness = Harness::new().with_live_game().await;
        harness.stats.rate_limit_next(90).await;

        let outcome = harness.poll().await;
        assert_eq!(outcome.status, CycleStatus::RateLimited { retry_after_secs: 90 });
        assert_eq!(outcome.retry_after_secs(), Some(90));

        let warnings: Vec<LiveEvent> = drain(&mut harness.events)
            .into_iter()
            .filter(|event| matches!(event, LiveEvent::DelayWarning { .. }))
            .collect();
        assert_eq!(warnings.len(), 1);
        assert!(matches!(warnings[0], LiveEvent::DelayWarning { retry_after_secs: 90, .. }));
        assert_eq!(harness.store.snapshot_count(), 0);
    }

    #[tokio::test]
    async fn test_quiet_exits_do_not_mutate() {
        let harness = Harness::new();
        harness.rosters.set_rosters("league-1", vec![single_player_roster("entrant-1", "league-1", 1)]);

        let outcome = harness.poll().await;
        assert_eq!(outcome.status, CycleStatus::NoLiveGames);

        harness.stats.set_game("G1", GameStatus::InProgress).await;
        let outcome = harness.poll().await;
        assert_eq!(outcome.status, CycleStatus::NoStats);

        assert_eq!(harness.store.save_calls(), 0);
        assert!(harness.state.league("league-1").scores().is_empty());
    }

    #[tokio::test]
    async fn test_rank_changes_broadcast_and_notify() {
        let mut config = LiveScoringConfig::default();
        config.notifications.max_batch_size = 1;
        let mut harness = Harness::with_config(config).with_live_game().await;
        harness.rosters.assign_owner("entrant-2", "user-2");

        harness.poll().await;
        drain(&mut harness.events);

        // Runner 2 breaks two long touchdowns
        harness.stats.set_line(runner(2, "G1", 95, 2)).await;
        let outcome = harness.poll().await;
        assert_eq!(outcome.updates_committed, 1);
        assert_eq!(outcome.rank_changes, 3);

        let events = drain(&mut harness.events);
        let changes = events
            .iter()
            .find_map(|event| match event {
                LiveEvent::RankChanges { changes, .. } => Some(changes.clone()),
                _ => None,
            })
            .unwrap();
        let leader = changes.iter().find(|change| change.entrant_id == "entrant-2").unwrap();
        assert_eq!((leader.previous_rank, leader.new_rank), (3, 1));
        assert!(events.iter().any(|event| matches!(event, LiveEvent::Leaderboard { .. })));

        let sent = harness.sink.sent().await;
        assert!(sent.iter().any(|n| n.user_id == "user-2" && n.title == "You're in the Lead!"));
        assert!(sent.iter().any(|n| n.user_id == "user-2" && n.title == "Runner 2 Touchdown!"));

        let page = harness.leaderboard.leaderboard("league-1", 0, None).await.unwrap();
        assert_eq!(page.entries[0].entrant_id, "entrant-2");
        assert_eq!(page.entries[0].previous_rank, 3);
        assert_eq!(page.entries[0].rank_delta, 2);
        assert_eq!(page.entries[0].score_delta, dec!(21.50));
    }

    #[tokio::test]
    async fn test_game_end_finalizes_and_blocks_corrections() {
        let mut harness = Harness::new().with_live_game().await;
        harness.poll().await;
        drain(&mut harness.events);

        harness.stats.set_game("G1", GameStatus::Final).await;
        let outcome = harness.poll().await;
        assert_eq!(outcome.status, CycleStatus::NoLiveGames);
        assert_eq!(outcome.games_completed, 1);
        assert_eq!(outcome.entrants_finalized, 3);

        let completed = drain(&mut harness.events)
            .into_iter()
            .filter(|event| matches!(event, LiveEvent::GameCompleted(_)))
            .count();
        assert_eq!(completed, 1);

        let finals = harness.sink.sent().await.into_iter().filter(|n| n.title == "Game Final").count();
        assert_eq!(finals, 3);

        // Handled once
        assert_eq!(harness.poll().await.games_completed, 0);

        // A late correction while another game is live does not touch final scores
        harness.stats.set_game("G2", GameStatus::InProgress).await;
        harness.stats.set_line(runner(1, "G1", 120, 1)).await;
        let outcome = harness.poll().await;
        assert_eq!(outcome.status, CycleStatus::Completed);
        assert_eq!(outcome.updates_committed, 0);
        assert_eq!(harness.store.score_status("entrant-1").await.unwrap(), Some(ScoreStatus::Final));
        assert_eq!(harness.store.snapshot_count(), 3);
    }

    #[tokio::test]
    async fn test_clear_caches_drops_league_state() {
        let harness = Harness::new().with_live_game().await;
        harness.poll().await;
        assert!(harness.state.get("league-1").is_some());

        tokio_test::assert_ok!(harness.orchestrator.clear_caches("league-1").await);
        assert!(harness.state.get("league-1").is_none());
    }

    #[tokio::test]
    async fn test_scheduler_polls_every_active_league() {
        let harness = Harness::new().with_live_game().await;
        harness.rosters.set_rosters("league-2", vec![single_player_roster("entrant-9", "league-2", 3)]);

        let scheduler = harness.scheduler();
        let summary = scheduler.trigger_poll().await;
        assert!(!summary.skipped);
        assert_eq!(summary.outcomes.len(), 2);
        assert!(summary.outcomes.iter().all(|outcome| outcome.status == CycleStatus::Completed));

        let metrics = scheduler.metrics().snapshot();
        assert_eq!(metrics.polls_run, 1);
        assert_eq!(metrics.cycles_completed, 2);
        assert_eq!(metrics.updates_committed, 4);
    }

    #[tokio::test]
    async fn test_scheduler_respects_rate_limit_window() {
        let harness = Harness::new().with_live_game().await;
        harness.stats.rate_limit_next(120).await;

        let scheduler = harness.scheduler();
        let first = scheduler.run_poll_pass().await;
        assert!(first.outcomes.iter().any(|outcome| outcome.status == CycleStatus::RateLimited { retry_after_secs: 120 }));

        let second = scheduler.run_poll_pass().await;
        assert!(second.skipped);
        assert_eq!(scheduler.metrics().snapshot().polls_skipped, 1);
    }

    #[tokio::test]
    async fn test_cancelled_pass_does_not_block_later_passes() {
        let harness = Harness::new().with_live_game().await;
        let scheduler = harness.scheduler();

        // Hold the league's cycle so the manual pass stalls, then abandon it
        let league = harness.state.league("league-1");
        let held = league.lock_cycle().await;
        let abandoned = tokio::time::timeout(Duration::from_millis(50), scheduler.trigger_poll()).await;
        assert!(abandoned.is_err());
        drop(held);

        let next = scheduler.run_poll_pass().await;
        assert!(!next.skipped);
        assert_eq!(next.outcomes.len(), 1);
        assert_eq!(next.outcomes[0].updates_committed, 3);
        assert_eq!(scheduler.metrics().snapshot().polls_skipped, 0);
    }

    #[tokio::test]
    async fn test_scheduler_stops_on_shutdown() {
        let harness = Harness::new().with_live_game().await;
        let scheduler = harness.scheduler();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handles = scheduler.start(shutdown_rx);
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();

        for handle in handles {
            let joined = tokio::time::timeout(Duration::from_secs(5), handle).await;
            assert!(matches!(joined, Ok(Ok(()))));
        }
        assert!(harness.store.snapshot_count() > 0);
        assert_eq!(harness.state.league("league-1").previous_score("entrant-1"), Decimal::from(5));
    }
}
