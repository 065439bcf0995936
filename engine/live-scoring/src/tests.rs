//! Component tests for the notification engine, leaderboard views and finalizer

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::{LeaderboardConfig, NotificationConfig};
use crate::ledger::TouchdownPlay;
use crate::memory::{
    ChannelBroadcaster, InMemoryPreferenceStore, InMemoryRosterSource, InMemoryScoreStore, InMemoryStatsSource,
    ManualClock, RecordingNotificationSink,
};
use crate::models::{
    GameCompletedEvent, GameStatus, PlayerId, PlayerStatLine, Position, RankChange, Roster, RosterSlot, ScoreSnapshot,
    ScoreStatus, StatRef,
};
use crate::notifications::{DeliveryResult, NotificationEngine, NotificationPreferences};
use crate::ports::{PreferenceStore, ScoreStore};
use crate::state::LiveScoringState;

fn game_day() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 18, 17, 0, 0).unwrap()
}

fn snapshot(entrant_id: &str, previous: Decimal, new: Decimal) -> ScoreSnapshot {
    ScoreSnapshot {
        id: Uuid::new_v4(),
        entrant_id: entrant_id.to_string(),
        league_id: "league-1".to_string(),
        previous_score: previous,
        new_score: new,
        delta: new - previous,
        status: ScoreStatus::Live,
        idempotency_key: format!("league-1:{}:{}", entrant_id, new),
        source: StatRef::roster(),
        timestamp: game_day(),
    }
}

fn touchdown(entrant_id: &str, points: Decimal) -> TouchdownPlay {
    TouchdownPlay {
        league_id: "league-1".to_string(),
        entrant_id: entrant_id.to_string(),
        player_id: 11,
        player_name: "Test Receiver".to_string(),
        points_gained: points,
    }
}

fn rank_change(entrant_id: &str, previous_rank: u32, new_rank: u32) -> RankChange {
    RankChange {
        entrant_id: entrant_id.to_string(),
        league_id: "league-1".to_string(),
        previous_rank,
        new_rank,
        leader_name: "entrant-0".to_string(),
        points_behind_leader: dec!(4.5),
        current_score: dec!(88.2),
    }
}

fn stat_line(player_id: PlayerId, game_id: &str, rushing_yards: i32) -> PlayerStatLine {
    PlayerStatLine {
        position: Some(Position::RB),
        game_id: Some(game_id.to_string()),
        rushing_yards,
        ..PlayerStatLine::new(player_id, format!("Player {}", player_id))
    }
}

struct NotificationFixture {
    engine: NotificationEngine,
    sink: Arc<RecordingNotificationSink>,
    directory: Arc<InMemoryRosterSource>,
    preferences: Arc<InMemoryPreferenceStore>,
    clock: Arc<ManualClock>,
}

fn notification_fixture() -> NotificationFixture {
    let sink = Arc::new(RecordingNotificationSink::new());
    let directory = Arc::new(InMemoryRosterSource::new());
    let preferences = Arc::new(InMemoryPreferenceStore::new());
    let clock = Arc::new(ManualClock::at(game_day()));
    let engine = NotificationEngine::new(
        sink.clone(),
        preferences.clone(),
        directory.clone(),
        clock.clone(),
        NotificationConfig::default(),
    );
    NotificationFixture { engine, sink, directory, preferences, clock }
}

#[cfg(test)]
mod notification_tests {
    use super::*;

    #[tokio::test]
    async fn test_milestone_crossing_notifies_highest_only() {
        let fixture = notification_fixture();

        let result = fixture.engine.on_score_update(&snapshot("entrant-1", dec!(145), dec!(152))).await;
        assert_eq!(result, DeliveryResult::Batched);
        assert_eq!(fixture.engine.pending_count("entrant-1"), 1);

        assert_eq!(fixture.engine.flush_user("entrant-1").await, DeliveryResult::Delivered);
        let sent = fixture.sink.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].title, "Milestone Reached!");
        assert!(sent[0].body.contains("150 points"));
        assert!(!sent[0].body.contains("100 points"));
    }

    #[tokio::test]
    async fn test_no_milestone_no_notification() {
        let fixture = notification_fixture();
        let result = fixture.engine.on_score_update(&snapshot("entrant-1", dec!(150), dec!(160))).await;
        assert_eq!(result, DeliveryResult::Suppressed);
        assert_eq!(fixture.engine.pending_count("entrant-1"), 0);
    }

    #[tokio::test]
    async fn test_quiet_hours_schedule_for_window_end() {
        let fixture = notification_fixture();
        fixture.clock.set(Utc.with_ymd_and_hms(2026, 10, 18, 23, 30, 0).unwrap());

        let result = fixture.engine.on_score_update(&snapshot("entrant-1", dec!(145), dec!(152))).await;
        let expected = Utc.with_ymd_and_hms(2026, 10, 19, 8, 0, 0).unwrap().timestamp_millis();
        assert_eq!(result, DeliveryResult::Scheduled { deliver_at_ms: expected });

        let sent = fixture.sink.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].deliver_at_epoch_ms, Some(expected));
        assert_eq!(fixture.engine.pending_count("entrant-1"), 0);
    }

    #[tokio::test]
    async fn test_full_batch_flushes_as_summary() {
        let fixture = notification_fixture();

        for _ in 0..4 {
            let result = fixture.engine.on_player_touchdown(&touchdown("entrant-1", dec!(7.5))).await;
            assert_eq!(result, DeliveryResult::Batched);
        }
        assert!(fixture.sink.sent().await.is_empty());

        let result = fixture.engine.on_player_touchdown(&touchdown("entrant-1", dec!(7.5))).await;
        assert_eq!(result, DeliveryResult::Delivered);
        assert_eq!(fixture.engine.pending_count("entrant-1"), 0);

        let sent = fixture.sink.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].title, "Scoring Update");
        assert_eq!(sent[0].body, "5 scoring updates! +37.5 total pts");
    }

    #[tokio::test]
    async fn test_single_pending_notification_flushes_unchanged() {
        let fixture = notification_fixture();
        fixture.engine.on_player_touchdown(&touchdown("entrant-1", dec!(6))).await;

        assert_eq!(fixture.engine.flush_all().await, 1);
        let sent = fixture.sink.sent().await;
        assert_eq!(sent[0].title, "Test Receiver Touchdown!");

        // Nothing left to flush
        assert_eq!(fixture.engine.flush_all().await, 0);
    }

    #[tokio::test]
    async fn test_game_completion_bypasses_batch() {
        let fixture = notification_fixture();
        let event = GameCompletedEvent {
            league_id: "league-1".to_string(),
            game_id: "G1".to_string(),
            overtime: true,
            affected_entrants: vec!["entrant-1".to_string()],
            completed_at: game_day(),
        };

        let result = fixture.engine.on_game_completed("entrant-1", &event, dec!(101.4)).await;
        assert_eq!(result, DeliveryResult::Delivered);
        assert_eq!(fixture.engine.pending_count("entrant-1"), 0);

        let sent = fixture.sink.sent().await;
        assert_eq!(sent[0].title, "Game Final");
        assert!(sent[0].body.contains("after overtime"));
    }

    #[tokio::test]
    async fn test_matchup_lead_change_sends_immediately() {
        let fixture = notification_fixture();
        let result = fixture.engine.on_matchup_lead_change("entrant-1", "Rival", true, dec!(2.3)).await;
        assert_eq!(result, DeliveryResult::Delivered);
        assert_eq!(fixture.sink.sent().await[0].title, "You Took the Lead!");
    }

    #[tokio::test]
    async fn test_rank_change_classification() {
        let fixture = notification_fixture();
        fixture.directory.assign_owner("entrant-1", "user-1");

        assert_eq!(fixture.engine.on_rank_change(&rank_change("entrant-1", 2, 3)).await, DeliveryResult::Suppressed);
        assert_eq!(fixture.engine.on_rank_change(&rank_change("entrant-1", 4, 3)).await, DeliveryResult::Batched);
        assert_eq!(fixture.engine.pending_count("user-1"), 1);

        fixture.engine.flush_user("user-1").await;
        let sent = fixture.sink.sent().await;
        assert_eq!(sent[0].user_id, "user-1");
        assert_eq!(sent[0].title, "You're in the Top 3!");
        assert!(sent[0].body.contains("from 4th to 3rd"));
    }

    #[tokio::test]
    async fn test_preferences_created_on_first_access() {
        let fixture = notification_fixture();
        assert!(fixture.preferences.find("user-1").await.unwrap().is_none());

        let prefs = fixture.engine.preferences("user-1").await.unwrap();
        assert_eq!(prefs, NotificationPreferences::defaults("user-1"));
        assert!(fixture.preferences.find("user-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_disabled_kind_is_suppressed() {
        let fixture = notification_fixture();
        let prefs = NotificationPreferences {
            milestone_notifications: false,
            ..NotificationPreferences::defaults("entrant-1")
        };
        tokio_test::assert_ok!(fixture.engine.update_preferences(prefs).await);

        let result = fixture.engine.on_score_update(&snapshot("entrant-1", dec!(45), dec!(55))).await;
        assert_eq!(result, DeliveryResult::Suppressed);
    }

    #[tokio::test]
    async fn test_invalid_quiet_hours_rejected() {
        let fixture = notification_fixture();
        let prefs = NotificationPreferences { quiet_hours_end: 24, ..NotificationPreferences::defaults("user-1") };
        tokio_test::assert_err!(fixture.engine.update_preferences(prefs).await);
    }

    #[tokio::test]
    async fn test_sink_failure_reported_not_retried() {
        let fixture = notification_fixture();
        fixture.sink.set_failing(true);
        let event = GameCompletedEvent {
            league_id: "league-1".to_string(),
            game_id: "G1".to_string(),
            overtime: false,
            affected_entrants: vec!["entrant-1".to_string()],
            completed_at: game_day(),
        };

        let result = fixture.engine.on_game_completed("entrant-1", &event, dec!(80)).await;
        assert!(matches!(result, DeliveryResult::Failed(_)));

        fixture.sink.set_failing(false);
        assert!(fixture.sink.sent().await.is_empty());
    }

    #[tokio::test]
    async fn test_negative_batch_summary_keeps_sign() {
        let fixture = notification_fixture();
        fixture.engine.on_player_touchdown(&touchdown("entrant-1", dec!(6))).await;
        fixture.engine.on_player_touchdown(&touchdown("entrant-1", dec!(-9))).await;

        assert_eq!(fixture.engine.flush_user("entrant-1").await, DeliveryResult::Delivered);
        let sent = fixture.sink.sent().await;
        assert_eq!(sent[0].body, "2 scoring updates! -3.0 total pts");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_flush_racing_enqueues_loses_nothing() {
        let sink = Arc::new(RecordingNotificationSink::new());
        let engine = Arc::new(NotificationEngine::new(
            sink.clone(),
            Arc::new(InMemoryPreferenceStore::new()),
            Arc::new(InMemoryRosterSource::new()),
            Arc::new(ManualClock::at(game_day())),
            NotificationConfig { max_batch_size: 7, ..NotificationConfig::default() },
        ));

        const ENQUEUED: usize = 200;
        let mut tasks = Vec::new();
        for _ in 0..ENQUEUED {
            let engine = Arc::clone(&engine);
            tasks.push(tokio::spawn(async move {
                engine.on_player_touchdown(&touchdown("entrant-1", dec!(6))).await;
            }));
        }

        let flusher = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                for _ in 0..50 {
                    engine.flush_all().await;
                    tokio::task::yield_now().await;
                }
            })
        };

        for task in tasks {
            task.await.unwrap();
        }
        flusher.await.unwrap();

        let delivered: usize = sink
            .sent()
            .await
            .iter()
            .map(|sent| sent.payload.get("count").and_then(|count| count.as_u64()).unwrap_or(1) as usize)
            .sum();
        assert_eq!(delivered + engine.pending_count("entrant-1"), ENQUEUED);
    }

    #[tokio::test]
    async fn test_device_registration() {
        let fixture = notification_fixture();
        tokio_test::assert_ok!(fixture.engine.register_device("user-1", "token-abc", "ios").await);
        assert_eq!(fixture.sink.devices("user-1"), vec![("token-abc".to_string(), "ios".to_string())]);
    }
}

#[cfg(test)]
mod leaderboard_tests {
    use super::*;
    use crate::leaderboard::LeaderboardService;

    struct LeaderboardFixture {
        service: LeaderboardService,
        state: Arc<LiveScoringState>,
        store: Arc<InMemoryScoreStore>,
        stats: Arc<InMemoryStatsSource>,
        rosters: Arc<InMemoryRosterSource>,
    }

    fn leaderboard_fixture() -> LeaderboardFixture {
        let state = Arc::new(LiveScoringState::new());
        let store = Arc::new(InMemoryScoreStore::new());
        let stats = Arc::new(InMemoryStatsSource::new());
        let rosters = Arc::new(InMemoryRosterSource::new());
        let service = LeaderboardService::new(
            state.clone(),
            store.clone(),
            stats.clone(),
            rosters.clone(),
            Arc::new(ManualClock::at(game_day())),
            LeaderboardConfig::default(),
        );
        LeaderboardFixture { service, state, store, stats, rosters }
    }

    #[tokio::test]
    async fn test_pagination_never_wraps() {
        let fixture = leaderboard_fixture();
        for i in 0..37 {
            fixture.store.set_score("league-1", &format!("entrant-{:02}", i), Decimal::from(200 - i));
        }

        let first = fixture.service.leaderboard("league-1", 0, None).await.unwrap();
        assert_eq!(first.entries.len(), 25);
        assert_eq!(first.total_entrants, 37);
        assert_eq!(first.total_pages, 2);
        assert_eq!(first.entries[0].rank, 1);
        assert!(first.has_next());

        let second = fixture.service.leaderboard("league-1", 1, Some(0)).await.unwrap();
        assert_eq!(second.page_size, 25);
        assert_eq!(second.entries.len(), 12);
        assert_eq!(second.entries[0].rank, 26);
        assert_eq!(second.entries[11].rank, 37);
        assert!(!second.has_next());

        let past_end = fixture.service.leaderboard("league-1", 2, None).await.unwrap();
        assert!(past_end.entries.is_empty());
        assert_eq!(past_end.total_entrants, 37);

        let small = fixture.service.leaderboard("league-1", 3, Some(10)).await.unwrap();
        assert_eq!(small.entries.len(), 7);
    }

    #[tokio::test]
    async fn test_entries_show_ties_and_gap_to_leader() {
        let fixture = leaderboard_fixture();
        fixture.store.set_score("league-1", "a", dec!(120.5));
        fixture.store.set_score("league-1", "b", dec!(120.5));
        fixture.store.set_score("league-1", "c", dec!(99.0));

        let page = fixture.service.leaderboard("league-1", 0, None).await.unwrap();
        let ranks: Vec<u32> = page.entries.iter().map(|entry| entry.rank).collect();
        assert_eq!(ranks, vec![1, 1, 3]);
        assert_eq!(page.entries[2].points_behind_leader, dec!(21.5));
        assert_eq!(page.leader_score, dec!(120.5));
        assert!(page.entries.iter().all(|entry| entry.status == ScoreStatus::Live));
    }

    #[tokio::test]
    async fn test_view_delta_cleared_on_acknowledge() {
        let fixture = leaderboard_fixture();
        fixture.store.set_score("league-1", "a", dec!(30));
        fixture.state.league("league-1").record_view_delta("a", dec!(6));

        let page = fixture.service.leaderboard("league-1", 0, None).await.unwrap();
        assert_eq!(page.entries[0].score_delta, dec!(6));

        fixture.service.acknowledge_view("league-1", "a");
        let page = fixture.service.leaderboard("league-1", 0, None).await.unwrap();
        assert_eq!(page.entries[0].score_delta, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_matchup_ranks_pair_only() {
        let fixture = leaderboard_fixture();
        fixture.store.set_score("league-1", "a", dec!(90));
        fixture.store.set_score("league-1", "b", dec!(80));
        fixture.store.set_score("league-1", "c", dec!(70));

        let matchup = fixture.service.matchup("league-1", "c", "b").await.unwrap();
        assert_eq!(matchup.len(), 2);
        assert_eq!(matchup[0].entrant_id, "b");
        assert_eq!(matchup[0].rank, 1);
        assert_eq!(matchup[1].rank, 2);
        assert_eq!(matchup[1].points_behind_leader, dec!(10));
    }

    #[tokio::test]
    async fn test_rostered_entrant_without_score_is_ranked() {
        let fixture = leaderboard_fixture();
        fixture.rosters.set_rosters(
            "league-1",
            vec![
                Roster::new("a", "league-1", vec![RosterSlot::filled("RB", 1)]),
                Roster::new("b", "league-1", vec![RosterSlot::filled("RB", 2)]),
                Roster::new("benched", "league-1", vec![RosterSlot::empty("RB")]),
            ],
        );
        fixture.store.set_score("league-1", "a", dec!(12));
        fixture.store.set_score("league-1", "b", dec!(7.5));

        let page = fixture.service.leaderboard("league-1", 0, None).await.unwrap();
        assert_eq!(page.total_entrants, 3);
        let last = &page.entries[2];
        assert_eq!(last.entrant_id, "benched");
        assert_eq!(last.rank, 3);
        assert_eq!(last.total_score, Decimal::ZERO);
        assert_eq!(last.points_behind_leader, dec!(12));

        let view = fixture.service.live_score("league-1", "benched").await.unwrap();
        assert_eq!(view.rank, Some(3));
    }

    #[tokio::test]
    async fn test_read_views_do_not_create_league_state() {
        let fixture = leaderboard_fixture();
        fixture.store.set_score("league-9", "a", dec!(10));

        tokio_test::assert_ok!(fixture.service.leaderboard("league-9", 0, None).await);
        tokio_test::assert_ok!(fixture.service.matchup("league-9", "a", "b").await);
        let view = fixture.service.live_score("league-9", "a").await.unwrap();
        assert_eq!(view.rank, Some(1));
        fixture.service.acknowledge_view("league-9", "a");

        assert!(fixture.state.get("league-9").is_none());
        assert!(fixture.state.league_ids().is_empty());
    }

    #[tokio::test]
    async fn test_live_score_for_unknown_entrant_is_zeroed() {
        let fixture = leaderboard_fixture();
        let view = fixture.service.live_score("league-1", "ghost").await.unwrap();
        assert_eq!(view.current_score, Decimal::ZERO);
        assert_eq!(view.delta, Decimal::ZERO);
        assert_eq!(view.status, ScoreStatus::Live);
        assert_eq!(view.rank, None);
        assert_eq!(view.last_update, None);
    }

    #[tokio::test]
    async fn test_live_score_reports_latest_change() {
        let fixture = leaderboard_fixture();
        fixture.store.save_all(&[snapshot("a", dec!(10), dec!(16.5))]).await.unwrap();
        fixture.store.set_score("league-1", "b", dec!(20));

        let view = fixture.service.live_score("league-1", "a").await.unwrap();
        assert_eq!(view.current_score, dec!(16.5));
        assert_eq!(view.previous_score, dec!(10));
        assert_eq!(view.delta, dec!(6.5));
        assert_eq!(view.rank, Some(2));
        assert_eq!(view.last_update, Some(game_day()));
    }

    #[tokio::test]
    async fn test_entrants_with_live_games() {
        let fixture = leaderboard_fixture();
        fixture.stats.set_game("G1", GameStatus::InProgress).await;
        fixture.stats.set_game("G2", GameStatus::Final).await;
        fixture.stats.set_line(stat_line(1, "G1", 40)).await;
        fixture.stats.set_line(stat_line(2, "G2", 60)).await;
        fixture.rosters.set_rosters(
            "league-1",
            vec![
                Roster::new("live", "league-1", vec![RosterSlot::filled("RB", 1), RosterSlot::filled("FLEX", 2)]),
                Roster::new("done", "league-1", vec![RosterSlot::filled("RB", 2)]),
                Roster::new("empty", "league-1", vec![RosterSlot::empty("RB")]),
            ],
        );

        let live = fixture.service.entrants_with_live_games("league-1", 7, 2026).await.unwrap();
        assert_eq!(live.len(), 1);
        assert!(live.contains("live"));
    }
}

#[cfg(test)]
mod finalizer_tests {
    use super::*;
    use crate::finalizer::GameFinalizer;

    struct FinalizerFixture {
        finalizer: GameFinalizer,
        stats: Arc<InMemoryStatsSource>,
        store: Arc<InMemoryScoreStore>,
        state: Arc<LiveScoringState>,
        rosters: Vec<Roster>,
    }

    async fn finalizer_fixture() -> FinalizerFixture {
        let stats = Arc::new(InMemoryStatsSource::new());
        let store = Arc::new(InMemoryScoreStore::new());
        let finalizer = GameFinalizer::new(
            stats.clone(),
            store.clone(),
            Arc::new(ChannelBroadcaster::new(16)),
            Arc::new(ManualClock::at(game_day())),
        );

        stats.set_game("G1", GameStatus::InProgress).await;
        stats.set_game("G2", GameStatus::InProgress).await;
        stats.set_line(stat_line(1, "G1", 40)).await;
        stats.set_line(stat_line(2, "G2", 25)).await;
        stats.set_line(stat_line(3, "G1", 70)).await;

        let rosters = vec![
            Roster::new("split", "league-1", vec![RosterSlot::filled("RB1", 1), RosterSlot::filled("RB2", 2)]),
            Roster::new("single", "league-1", vec![RosterSlot::filled("RB1", 3)]),
            // Player 4 has no game this week
            Roster::new("idle", "league-1", vec![RosterSlot::filled("RB1", 3), RosterSlot::filled("RB2", 4)]),
        ];

        FinalizerFixture { finalizer, stats, store, state: Arc::new(LiveScoringState::new()), rosters }
    }

    #[tokio::test]
    async fn test_entrant_final_only_when_every_game_terminal() {
        let fixture = finalizer_fixture().await;
        let league = fixture.state.league("league-1");

        fixture.stats.set_game("G1", GameStatus::Final).await;
        let outcome = fixture.finalizer.finalize(&league, &fixture.rosters, 7, 2026).await.unwrap();

        assert_eq!(outcome.completed_games.len(), 1);
        assert_eq!(outcome.completed_games[0].game_id, "G1");
        assert_eq!(outcome.completed_games[0].affected_entrants, vec!["split", "single", "idle"]);
        assert_eq!(outcome.finalized_entrants, vec!["single"]);
        assert_eq!(fixture.store.score_status("single").await.unwrap(), Some(ScoreStatus::Final));
        assert!(!league.is_finalized("split"));
        assert!(!league.is_finalized("idle"));

        // Same game is not reported twice
        let again = fixture.finalizer.finalize(&league, &fixture.rosters, 7, 2026).await.unwrap();
        assert!(again.completed_games.is_empty());

        fixture.stats.set_game("G2", GameStatus::FinalOvertime).await;
        let outcome = fixture.finalizer.finalize(&league, &fixture.rosters, 7, 2026).await.unwrap();
        assert_eq!(outcome.finalized_entrants, vec!["split"]);
        assert!(outcome.completed_games[0].overtime);
        assert!(!league.is_finalized("idle"));
    }

    #[tokio::test]
    async fn test_final_never_reverts() {
        let fixture = finalizer_fixture().await;
        let league = fixture.state.league("league-1");

        fixture.stats.set_game("G1", GameStatus::Final).await;
        fixture.finalizer.finalize(&league, &fixture.rosters, 7, 2026).await.unwrap();
        assert!(league.is_finalized("single"));

        // Upstream flips the game back
        fixture.stats.set_game("G1", GameStatus::InProgress).await;
        let outcome = fixture.finalizer.finalize(&league, &fixture.rosters, 7, 2026).await.unwrap();
        assert!(outcome.finalized_entrants.is_empty());
        assert!(league.is_finalized("single"));
        assert_eq!(fixture.store.score_status("single").await.unwrap(), Some(ScoreStatus::Final));
        assert!(fixture.store.transition_status("single", ScoreStatus::Live).await.is_err());
    }
}
