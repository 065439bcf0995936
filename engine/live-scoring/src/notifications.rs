//! Preference-aware, batched push notifications
//!
//! Events from the scoring cycle are classified, filtered through the owning
//! user's preferences and then either scheduled (quiet hours), sent at once
//! (game completion and matchup lead changes) or appended to the user's
//! pending batch. A batch flushes as one summary when it fills up or when the
//! scheduler's periodic flush runs.

use chrono::{DateTime, Duration, NaiveTime, Timelike, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::NotificationConfig;
use crate::error::{LiveScoringError, Result};
use crate::ledger::TouchdownPlay;
use crate::models::{GameCompletedEvent, RankChange, ScoreSnapshot, UserId};
use crate::ports::{Clock, EntrantDirectory, NotificationSink, PreferenceStore};

/// Classification of a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Milestone,
    RankChange,
    PlayerTouchdown,
    GameCompletion,
    MatchupLead,
    Summary,
}

impl NotificationKind {
    /// Kinds that are sent immediately instead of joining the batch
    pub fn bypasses_batch(&self) -> bool {
        matches!(self, NotificationKind::GameCompletion | NotificationKind::MatchupLead)
    }
}

/// A notification waiting in a user's batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingNotification {
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub payload: Value,
    pub points_delta: Decimal,
}

/// Per-user notification settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPreferences {
    pub user_id: UserId,
    pub milestone_notifications: bool,
    pub rank_change_notifications: bool,
    pub player_touchdown_notifications: bool,
    pub matchup_lead_notifications: bool,
    pub game_completion_notifications: bool,
    pub quiet_hours_enabled: bool,
    /// Local hour (0-23) the quiet window starts
    pub quiet_hours_start: u32,
    /// Local hour (0-23) the quiet window ends
    pub quiet_hours_end: u32,
    /// Offset of the user's local time from UTC
    pub utc_offset_minutes: i32,
}

impl NotificationPreferences {
    /// Everything on, quiet from 22:00 to 08:00 UTC
    pub fn defaults(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            milestone_notifications: true,
            rank_change_notifications: true,
            player_touchdown_notifications: true,
            matchup_lead_notifications: true,
            game_completion_notifications: true,
            quiet_hours_enabled: true,
            quiet_hours_start: 22,
            quiet_hours_end: 8,
            utc_offset_minutes: 0,
        }
    }

    pub fn allows(&self, kind: NotificationKind) -> bool {
        match kind {
            NotificationKind::Milestone => self.milestone_notifications,
            NotificationKind::RankChange => self.rank_change_notifications,
            NotificationKind::PlayerTouchdown => self.player_touchdown_notifications,
            NotificationKind::GameCompletion => self.game_completion_notifications,
            NotificationKind::MatchupLead => self.matchup_lead_notifications,
            NotificationKind::Summary => true,
        }
    }

    fn local_time(&self, now: DateTime<Utc>) -> chrono::NaiveDateTime {
        now.naive_utc() + Duration::minutes(i64::from(self.utc_offset_minutes))
    }

    /// Whether `now` falls in the user's quiet window. The window may wrap midnight.
    pub fn is_quiet_at(&self, now: DateTime<Utc>) -> bool {
        if !self.quiet_hours_enabled {
            return false;
        }
        let hour = self.local_time(now).hour();
        let (start, end) = (self.quiet_hours_start, self.quiet_hours_end);
        if start < end {
            hour >= start && hour < end
        } else if start > end {
            hour >= start || hour < end
        } else {
            false
        }
    }

    /// The next end of the quiet window after `now`
    pub fn quiet_hours_end_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let Some(end) = NaiveTime::from_hms_opt(self.quiet_hours_end, 0, 0) else {
            return now;
        };
        let local = self.local_time(now);
        let mut target = local.date().and_time(end);
        if target <= local {
            target += Duration::days(1);
        }
        (target - Duration::minutes(i64::from(self.utc_offset_minutes))).and_utc()
    }

    fn validate(&self) -> Result<()> {
        if self.quiet_hours_start > 23 || self.quiet_hours_end > 23 {
            return Err(LiveScoringError::Configuration(format!(
                "quiet hours must be within 0-23, got {}-{}",
                self.quiet_hours_start, self.quiet_hours_end
            )));
        }
        Ok(())
    }
}

/// What happened to a notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryResult {
    /// Sent to the sink
    Delivered,
    /// Appended to the user's pending batch
    Batched,
    /// Handed to the sink for delivery at the end of quiet hours
    Scheduled { deliver_at_ms: i64 },
    /// Disabled by preference, or the event did not warrant a notification
    Suppressed,
    /// The sink or a lookup failed; not retried
    Failed(String),
}

/// English ordinal: 1st, 2nd, 3rd, 4th, 11th, 22nd
pub fn ordinal(n: u32) -> String {
    let suffix = match (n % 10, n % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{}{}", n, suffix)
}

/// Highest milestone `m` with `previous < m <= new`
pub fn highest_milestone_crossed(milestones: &[Decimal], previous: Decimal, new: Decimal) -> Option<Decimal> {
    milestones.iter().copied().filter(|m| previous < *m && *m <= new).max()
}

/// Entering the top three, or gaining at least `significant_jump` places
pub fn is_notable_rank_change(change: &RankChange, significant_jump: u32) -> bool {
    (change.new_rank <= 3 && change.moved_up()) || change.rank_delta() >= i64::from(significant_jump)
}

/// One decimal place with an explicit sign: +12.5, -3.0, +0.0
pub fn signed_points(points: Decimal) -> String {
    if points.is_sign_negative() && !points.is_zero() {
        format!("{:.1}", points)
    } else {
        format!("+{:.1}", points)
    }
}

fn summarize(batch: &[PendingNotification]) -> PendingNotification {
    let total: Decimal = batch.iter().map(|n| n.points_delta).sum();
    PendingNotification {
        kind: NotificationKind::Summary,
        title: "Scoring Update".to_string(),
        body: format!("{} scoring updates! {} total pts", batch.len(), signed_points(total)),
        payload: json!({
            "type": "summary",
            "count": batch.len(),
            "total_points": total,
            "kinds": batch.iter().map(|n| n.kind).collect::<Vec<_>>(),
        }),
        points_delta: total,
    }
}

pub struct NotificationEngine {
    sink: Arc<dyn NotificationSink>,
    preferences: Arc<dyn PreferenceStore>,
    directory: Arc<dyn EntrantDirectory>,
    clock: Arc<dyn Clock>,
    config: NotificationConfig,
    batches: DashMap<UserId, Vec<PendingNotification>>,
}

impl NotificationEngine {
    pub fn new(
        sink: Arc<dyn NotificationSink>,
        preferences: Arc<dyn PreferenceStore>,
        directory: Arc<dyn EntrantDirectory>,
        clock: Arc<dyn Clock>,
        config: NotificationConfig,
    ) -> Self {
        Self { sink, preferences, directory, clock, config, batches: DashMap::new() }
    }

    /// Milestone check for a committed score change
    pub async fn on_score_update(&self, snapshot: &ScoreSnapshot) -> DeliveryResult {
        let Some(milestone) =
            highest_milestone_crossed(&self.config.milestones, snapshot.previous_score, snapshot.new_score)
        else {
            return DeliveryResult::Suppressed;
        };

        let notification = PendingNotification {
            kind: NotificationKind::Milestone,
            title: "Milestone Reached!".to_string(),
            body: format!("You've passed {} points with {} total!", milestone.normalize(), snapshot.new_score),
            payload: json!({
                "type": "milestone",
                "league_id": snapshot.league_id,
                "entrant_id": snapshot.entrant_id,
                "milestone": milestone,
                "score": snapshot.new_score,
            }),
            points_delta: snapshot.delta,
        };
        self.notify_entrant(&snapshot.entrant_id, notification).await
    }

    pub async fn on_rank_change(&self, change: &RankChange) -> DeliveryResult {
        if !is_notable_rank_change(change, self.config.significant_rank_jump) {
            return DeliveryResult::Suppressed;
        }

        let title = if change.new_rank == 1 && change.moved_up() {
            "You're in the Lead!".to_string()
        } else if change.new_rank <= 3 && change.moved_up() {
            "You're in the Top 3!".to_string()
        } else {
            "Rank Improvement!".to_string()
        };
        let body = if change.new_rank == 1 {
            format!("You moved from {} to 1st with {} points", ordinal(change.previous_rank), change.current_score)
        } else {
            format!(
                "You moved from {} to {}, {} points behind {}",
                ordinal(change.previous_rank),
                ordinal(change.new_rank),
                change.points_behind_leader,
                change.leader_name
            )
        };

        let notification = PendingNotification {
            kind: NotificationKind::RankChange,
            title,
            body,
            payload: json!({
                "type": "rank_change",
                "league_id": change.league_id,
                "entrant_id": change.entrant_id,
                "previous_rank": change.previous_rank,
                "new_rank": change.new_rank,
            }),
            points_delta: Decimal::ZERO,
        };
        self.notify_entrant(&change.entrant_id, notification).await
    }

    pub async fn on_player_touchdown(&self, play: &TouchdownPlay) -> DeliveryResult {
        let name = if play.player_name.is_empty() { "Your player" } else { play.player_name.as_str() };
        let notification = PendingNotification {
            kind: NotificationKind::PlayerTouchdown,
            title: format!("{} Touchdown!", name),
            body: format!("+{} points for your lineup", play.points_gained),
            payload: json!({
                "type": "player_touchdown",
                "league_id": play.league_id,
                "entrant_id": play.entrant_id,
                "player_id": play.player_id,
                "points": play.points_gained,
            }),
            points_delta: play.points_gained,
        };
        self.notify_entrant(&play.entrant_id, notification).await
    }

    pub async fn on_game_completed(
        &self,
        entrant_id: &str,
        event: &GameCompletedEvent,
        final_score: Decimal,
    ) -> DeliveryResult {
        let notification = PendingNotification {
            kind: NotificationKind::GameCompletion,
            title: "Game Final".to_string(),
            body: format!("{}. Your score: {} points", event.summary(), final_score),
            payload: json!({
                "type": "game_completed",
                "league_id": event.league_id,
                "entrant_id": entrant_id,
                "game_id": event.game_id,
                "overtime": event.overtime,
                "score": final_score,
            }),
            points_delta: Decimal::ZERO,
        };
        self.notify_entrant(entrant_id, notification).await
    }

    /// The entrant took (`took_lead = true`) or lost the lead in a head-to-head matchup
    pub async fn on_matchup_lead_change(
        &self,
        entrant_id: &str,
        opponent_name: &str,
        took_lead: bool,
        margin: Decimal,
    ) -> DeliveryResult {
        let (title, body) = if took_lead {
            ("You Took the Lead!".to_string(), format!("You lead {} by {} points", opponent_name, margin))
        } else {
            ("Lead Change".to_string(), format!("{} passed you by {} points", opponent_name, margin))
        };
        let notification = PendingNotification {
            kind: NotificationKind::MatchupLead,
            title,
            body,
            payload: json!({
                "type": "matchup_lead",
                "entrant_id": entrant_id,
                "opponent": opponent_name,
                "took_lead": took_lead,
                "margin": margin,
            }),
            points_delta: Decimal::ZERO,
        };
        self.notify_entrant(entrant_id, notification).await
    }

    /// Flush every pending batch. Returns the number of users flushed.
    pub async fn flush_all(&self) -> usize {
        let users: Vec<UserId> = self.batches.iter().map(|entry| entry.key().clone()).collect();
        let mut flushed = 0;
        for user_id in users {
            match self.flush_user(&user_id).await {
                DeliveryResult::Suppressed => {}
                _ => flushed += 1,
            }
        }
        if flushed > 0 {
            info!(users = flushed, "Flushed pending notification batches");
        }
        flushed
    }

    /// Take the user's batch and deliver it: a single notification as is,
    /// several as one summary
    pub async fn flush_user(&self, user_id: &str) -> DeliveryResult {
        let Some((_, mut batch)) = self.batches.remove(user_id) else {
            return DeliveryResult::Suppressed;
        };

        let notification = if batch.len() > 1 {
            summarize(&batch)
        } else {
            match batch.pop() {
                Some(single) => single,
                None => return DeliveryResult::Suppressed,
            }
        };

        match self.preferences(user_id).await {
            Ok(preferences) => self.dispatch(&preferences, &notification).await,
            Err(e) => DeliveryResult::Failed(e.to_string()),
        }
    }

    pub fn pending_count(&self, user_id: &str) -> usize {
        self.batches.get(user_id).map(|batch| batch.len()).unwrap_or(0)
    }

    /// Stored preferences, created with defaults on first access
    pub async fn preferences(&self, user_id: &str) -> Result<NotificationPreferences> {
        if let Some(existing) = self.preferences.find(user_id).await? {
            return Ok(existing);
        }
        let defaults = NotificationPreferences::defaults(user_id);
        self.preferences.save(&defaults).await?;
        Ok(defaults)
    }

    pub async fn update_preferences(&self, preferences: NotificationPreferences) -> Result<()> {
        preferences.validate()?;
        self.preferences.save(&preferences).await
    }

    pub async fn register_device(&self, user_id: &str, device_token: &str, platform: &str) -> Result<()> {
        self.sink.register_device(user_id, device_token, platform).await?;
        info!(user_id = %user_id, platform = %platform, "Registered notification device");
        Ok(())
    }

    async fn notify_entrant(&self, entrant_id: &str, notification: PendingNotification) -> DeliveryResult {
        let user_id = match self.directory.user_for_entrant(entrant_id).await {
            Ok(Some(user_id)) => user_id,
            Ok(None) => entrant_id.to_string(),
            Err(e) => {
                warn!(entrant_id = %entrant_id, error = %e, "Entrant lookup failed");
                return DeliveryResult::Failed(e.to_string());
            }
        };
        self.notify_user(&user_id, notification).await
    }

    async fn notify_user(&self, user_id: &str, notification: PendingNotification) -> DeliveryResult {
        let preferences = match self.preferences(user_id).await {
            Ok(preferences) => preferences,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Preference lookup failed");
                return DeliveryResult::Failed(e.to_string());
            }
        };

        if !preferences.allows(notification.kind) {
            debug!(user_id = %user_id, kind = ?notification.kind, "Notification disabled by preference");
            return DeliveryResult::Suppressed;
        }

        if notification.kind.bypasses_batch() || preferences.is_quiet_at(self.clock.now()) {
            return self.dispatch(&preferences, &notification).await;
        }

        let batch_len = {
            let mut batch = self.batches.entry(user_id.to_string()).or_insert_with(Vec::new);
            batch.push(notification);
            batch.len()
        };

        if batch_len >= self.config.max_batch_size {
            return self.flush_user(user_id).await;
        }
        DeliveryResult::Batched
    }

    /// Send now, or schedule for the end of quiet hours
    async fn dispatch(&self, preferences: &NotificationPreferences, notification: &PendingNotification) -> DeliveryResult {
        let user_id = preferences.user_id.as_str();
        let now = self.clock.now();

        if preferences.is_quiet_at(now) {
            let deliver_at_ms = preferences.quiet_hours_end_after(now).timestamp_millis();
            return match self
                .sink
                .schedule(user_id, &notification.title, &notification.body, &notification.payload, deliver_at_ms)
                .await
            {
                Ok(()) => {
                    debug!(user_id = %user_id, deliver_at_ms, "Notification scheduled after quiet hours");
                    DeliveryResult::Scheduled { deliver_at_ms }
                }
                Err(e) => {
                    warn!(user_id = %user_id, error = %e, "Failed to schedule notification");
                    DeliveryResult::Failed(e.to_string())
                }
            };
        }

        match self.sink.send(user_id, &notification.title, &notification.body, &notification.payload).await {
            Ok(()) => DeliveryResult::Delivered,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Failed to deliver notification");
                DeliveryResult::Failed(e.to_string())
            }
        }
    }
}
