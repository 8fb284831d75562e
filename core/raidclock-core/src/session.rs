//! Session time tracking.
//!
//! The tracker owns the current session kind, when it started, and the
//! milliseconds accumulated per kind over one game-process lifetime. At most
//! one kind is live at a time. Accumulated totals only grow until the game
//! terminates and the caller reloads the tracker for the next launch.
//!
//! ## Scene policy
//!
//! - `ingame` / `match_start` enter a raid, `lobby` / `match_end` enter the lobby.
//! - Re-entering the live kind is a no-op; the running timer is kept.
//! - `summary` right after `lobby` or `summary` continues the live lobby session.
//! - `summary` after anything else (a raid, or nothing at all) starts a fresh
//!   lobby session.
//! - `lobby` right after `summary` continues the same lobby session.

use crate::clock::Clock;
use crate::kv::KvStore;
use crate::scene::SceneSignal;
use raidclock_protocol::{GameTimeStats, SessionKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const ALL_TIME_KEY: &str = "game_time.all_time";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LiveSession {
    kind: SessionKind,
    started_at: i64,
}

/// A finished interval of one session kind, returned whenever a live timer is flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionSegment {
    pub kind: SessionKind,
    pub started_at: i64,
    pub ended_at: i64,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Accumulated {
    raid_ms: u64,
    lobby_ms: u64,
}

impl Accumulated {
    fn add(&mut self, kind: SessionKind, ms: u64) {
        match kind {
            SessionKind::Raid => self.raid_ms = self.raid_ms.saturating_add(ms),
            SessionKind::Lobby => self.lobby_ms = self.lobby_ms.saturating_add(ms),
        }
    }
}

/// Totals that outlive a single game launch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllTimeTotals {
    #[serde(default)]
    pub raid_ms: u64,
    #[serde(default)]
    pub lobby_ms: u64,
    #[serde(default)]
    pub raids: u64,
}

pub struct SessionTimeTracker {
    clock: Arc<dyn Clock>,
    store: Option<Arc<dyn KvStore>>,
    live: Option<LiveSession>,
    accumulated: Accumulated,
    session_raids: u32,
    last_scene: Option<SceneSignal>,
    all_time: AllTimeTotals,
}

impl SessionTimeTracker {
    /// A tracker with no durable totals.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            store: None,
            live: None,
            accumulated: Accumulated::default(),
            session_raids: 0,
            last_scene: None,
            all_time: AllTimeTotals::default(),
        }
    }

    /// A tracker that keeps all-time totals in `store` across process restarts.
    pub fn with_store(clock: Arc<dyn Clock>, store: Arc<dyn KvStore>) -> Self {
        let mut tracker = Self::new(clock);
        tracker.store = Some(store);
        tracker.load_all_time();
        tracker
    }

    pub fn current_kind(&self) -> Option<SessionKind> {
        self.live.map(|live| live.kind)
    }

    pub fn last_scene(&self) -> Option<SceneSignal> {
        self.last_scene
    }

    pub fn session_raids(&self) -> u32 {
        self.session_raids
    }

    /// Enters `kind`. Re-entering the live kind keeps the running timer.
    ///
    /// Returns the flushed outgoing interval when a different kind was live.
    pub fn start_session(&mut self, kind: SessionKind) -> Option<SessionSegment> {
        if self.current_kind() == Some(kind) {
            return None;
        }
        self.restart_session(kind)
    }

    /// Maps a recognized scene onto the session state machine.
    pub fn apply_scene(&mut self, signal: SceneSignal) -> Option<SessionSegment> {
        let previous = self.last_scene;
        let segment = match signal {
            SceneSignal::None => return None,
            SceneSignal::Ingame | SceneSignal::MatchStart => self.start_session(SessionKind::Raid),
            SceneSignal::Lobby | SceneSignal::MatchEnd => self.start_session(SessionKind::Lobby),
            SceneSignal::Summary => {
                let continues_lobby = matches!(
                    previous,
                    Some(SceneSignal::Lobby) | Some(SceneSignal::Summary)
                ) && self.current_kind() == Some(SessionKind::Lobby);
                if continues_lobby {
                    None
                } else {
                    self.restart_session(SessionKind::Lobby)
                }
            }
        };
        self.last_scene = Some(signal);
        segment
    }

    /// As-of-now totals, including the live timer. Never mutates state.
    pub fn get_game_time_stats(&self) -> GameTimeStats {
        let mut totals = self.accumulated;
        let mut all_time = self.all_time;
        if let Some(live) = self.live {
            let elapsed = self.elapsed_since(live.started_at);
            totals.add(live.kind, elapsed);
            match live.kind {
                SessionKind::Raid => all_time.raid_ms = all_time.raid_ms.saturating_add(elapsed),
                SessionKind::Lobby => {
                    all_time.lobby_ms = all_time.lobby_ms.saturating_add(elapsed)
                }
            }
        }

        GameTimeStats {
            raid_time_ms: totals.raid_ms,
            lobby_time_ms: totals.lobby_ms,
            total_time_ms: totals.raid_ms.saturating_add(totals.lobby_ms),
            current_scene: self.live.map(|live| live.kind),
            session_started_at: self.live.map(|live| live.started_at),
            session_raids: self.session_raids,
            all_time_raid_ms: all_time.raid_ms,
            all_time_lobby_ms: all_time.lobby_ms,
            all_time_raids: all_time.raids,
        }
    }

    /// Stops the live timer. Lifetime totals stay readable until `reload_data`.
    ///
    /// A second call flushes nothing.
    pub fn on_game_terminated(&mut self) -> Option<SessionSegment> {
        let segment = self.flush_live();
        self.last_scene = None;
        segment
    }

    pub fn reset_session_raids(&mut self) {
        self.session_raids = 0;
    }

    /// Re-reads durable totals and, when nothing is live, clears the lifetime totals.
    ///
    /// A live timer is left untouched so reloading mid-session never double-counts.
    pub fn reload_data(&mut self) {
        self.load_all_time();
        if self.live.is_none() {
            self.accumulated = Accumulated::default();
            self.last_scene = None;
        }
    }

    /// Zeroes lifetime and all-time totals. The live timer, if any, restarts from now.
    pub fn reset_totals(&mut self) {
        self.accumulated = Accumulated::default();
        self.session_raids = 0;
        self.all_time = AllTimeTotals::default();
        if let Some(live) = self.live.as_mut() {
            live.started_at = self.clock.now_ms();
        }
        self.persist_all_time();
    }

    fn restart_session(&mut self, kind: SessionKind) -> Option<SessionSegment> {
        let segment = self.flush_live();
        let now = self.clock.now_ms();
        self.live = Some(LiveSession {
            kind,
            started_at: now,
        });
        if kind == SessionKind::Raid {
            self.session_raids = self.session_raids.saturating_add(1);
            self.all_time.raids = self.all_time.raids.saturating_add(1);
            self.persist_all_time();
        }
        tracing::debug!(kind = kind.as_str(), started_at = now, "Session started");
        segment
    }

    fn flush_live(&mut self) -> Option<SessionSegment> {
        let live = self.live.take()?;
        let now = self.clock.now_ms();
        let duration_ms = self.elapsed_since(live.started_at);
        self.accumulated.add(live.kind, duration_ms);
        match live.kind {
            SessionKind::Raid => {
                self.all_time.raid_ms = self.all_time.raid_ms.saturating_add(duration_ms)
            }
            SessionKind::Lobby => {
                self.all_time.lobby_ms = self.all_time.lobby_ms.saturating_add(duration_ms)
            }
        }
        self.persist_all_time();
        tracing::debug!(
            kind = live.kind.as_str(),
            duration_ms,
            "Session flushed"
        );
        Some(SessionSegment {
            kind: live.kind,
            started_at: live.started_at,
            ended_at: now,
            duration_ms,
        })
    }

    fn elapsed_since(&self, started_at: i64) -> u64 {
        let elapsed = self.clock.now_ms().saturating_sub(started_at);
        u64::try_from(elapsed).unwrap_or(0)
    }

    fn load_all_time(&mut self) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        match store.get(ALL_TIME_KEY) {
            Ok(Some(value)) => match serde_json::from_value::<AllTimeTotals>(value) {
                Ok(totals) => self.all_time = totals,
                Err(err) => {
                    tracing::warn!(error = %err, "Discarding unreadable all-time totals");
                    self.all_time = AllTimeTotals::default();
                }
            },
            Ok(None) => self.all_time = AllTimeTotals::default(),
            Err(err) => {
                tracing::warn!(error = %err, "Failed to read all-time totals");
            }
        }
    }

    fn persist_all_time(&self) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        let value = match serde_json::to_value(self.all_time) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(error = %err, "Failed to serialize all-time totals");
                return;
            }
        };
        if let Err(err) = store.set(ALL_TIME_KEY, &value) {
            tracing::warn!(error = %err, "Failed to persist all-time totals");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::kv::MemoryKvStore;

    fn tracker() -> (Arc<ManualClock>, SessionTimeTracker) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let tracker = SessionTimeTracker::new(clock.clone());
        (clock, tracker)
    }

    #[test]
    fn repeated_start_keeps_running_timer() {
        let (clock, mut tracker) = tracker();
        tracker.start_session(SessionKind::Lobby);
        clock.advance(400);
        assert!(tracker.start_session(SessionKind::Lobby).is_none());
        clock.advance(600);
        assert!(tracker.start_session(SessionKind::Lobby).is_none());
        clock.advance(250);

        let stats = tracker.get_game_time_stats();
        assert_eq!(stats.lobby_time_ms, 1_250);
        assert_eq!(stats.raid_time_ms, 0);
        assert_eq!(stats.session_started_at, Some(1_000_000));
    }

    #[test]
    fn summary_after_lobby_does_not_reset_lobby_time() {
        let (clock, mut tracker) = tracker();
        tracker.apply_scene(SceneSignal::Lobby);
        clock.advance(1_000);
        assert!(tracker.apply_scene(SceneSignal::Summary).is_none());
        clock.advance(1_000);

        let stats = tracker.get_game_time_stats();
        assert_eq!(stats.lobby_time_ms, 2_000);
        assert_eq!(stats.session_started_at, Some(1_000_000));
    }

    #[test]
    fn lobby_after_summary_continues_session() {
        let (clock, mut tracker) = tracker();
        tracker.apply_scene(SceneSignal::Lobby);
        clock.advance(300);
        tracker.apply_scene(SceneSignal::Summary);
        clock.advance(300);
        assert!(tracker.apply_scene(SceneSignal::Lobby).is_none());
        clock.advance(300);

        let stats = tracker.get_game_time_stats();
        assert_eq!(stats.lobby_time_ms, 900);
        assert_eq!(stats.session_started_at, Some(1_000_000));
    }

    #[test]
    fn summary_after_raid_starts_fresh_lobby() {
        let (clock, mut tracker) = tracker();
        tracker.apply_scene(SceneSignal::Ingame);
        clock.advance(700);

        let segment = tracker.apply_scene(SceneSignal::Summary).expect("raid flushed");
        assert_eq!(segment.kind, SessionKind::Raid);
        assert_eq!(segment.duration_ms, 700);

        clock.advance(200);
        let stats = tracker.get_game_time_stats();
        assert_eq!(stats.current_scene, Some(SessionKind::Lobby));
        assert_eq!(stats.raid_time_ms, 700);
        assert_eq!(stats.lobby_time_ms, 200);
        assert_eq!(stats.session_started_at, Some(1_000_700));
    }

    #[test]
    fn bare_summary_starts_lobby() {
        let (clock, mut tracker) = tracker();
        assert!(tracker.apply_scene(SceneSignal::Summary).is_none());
        clock.advance(50);
        let stats = tracker.get_game_time_stats();
        assert_eq!(stats.current_scene, Some(SessionKind::Lobby));
        assert_eq!(stats.lobby_time_ms, 50);
    }

    #[test]
    fn raid_time_accumulates_across_lobby_gap() {
        let (clock, mut tracker) = tracker();
        tracker.start_session(SessionKind::Raid);
        clock.advance(500);
        tracker.start_session(SessionKind::Lobby);
        clock.advance(1_300);
        tracker.start_session(SessionKind::Raid);
        clock.advance(500);

        let stats = tracker.get_game_time_stats();
        assert_eq!(stats.raid_time_ms, 1_000);
        assert_eq!(stats.lobby_time_ms, 1_300);
        assert_eq!(stats.total_time_ms, 2_300);
        assert_eq!(stats.session_raids, 2);
    }

    #[test]
    fn stats_report_live_time_without_mutating() {
        let (clock, mut tracker) = tracker();
        tracker.start_session(SessionKind::Raid);
        clock.advance(100);
        let first = tracker.get_game_time_stats();
        let second = tracker.get_game_time_stats();
        assert_eq!(first, second);
        clock.advance(100);
        assert_eq!(tracker.get_game_time_stats().raid_time_ms, 200);
    }

    #[test]
    fn termination_is_idempotent() {
        let (clock, mut tracker) = tracker();
        tracker.start_session(SessionKind::Raid);
        clock.advance(800);

        let segment = tracker.on_game_terminated().expect("flushed");
        assert_eq!(segment.duration_ms, 800);
        assert!(tracker.on_game_terminated().is_none());

        clock.advance(5_000);
        let stats = tracker.get_game_time_stats();
        assert_eq!(stats.raid_time_ms, 800);
        assert_eq!(stats.current_scene, None);
        assert_eq!(stats.session_started_at, None);
    }

    #[test]
    fn unrecognized_scene_changes_nothing() {
        let (_clock, mut tracker) = tracker();
        tracker.apply_scene(SceneSignal::Lobby);
        assert!(tracker.apply_scene(SceneSignal::None).is_none());
        assert_eq!(tracker.last_scene(), Some(SceneSignal::Lobby));
    }

    #[test]
    fn reload_clears_lifetime_only_when_idle() {
        let (clock, mut tracker) = tracker();
        tracker.start_session(SessionKind::Lobby);
        clock.advance(1_000);

        tracker.reload_data();
        clock.advance(1_000);
        assert_eq!(tracker.get_game_time_stats().lobby_time_ms, 2_000);

        tracker.on_game_terminated();
        tracker.reload_data();
        assert_eq!(tracker.get_game_time_stats().lobby_time_ms, 0);
    }

    #[test]
    fn raid_count_resets_per_launch() {
        let (_clock, mut tracker) = tracker();
        tracker.start_session(SessionKind::Raid);
        tracker.start_session(SessionKind::Lobby);
        tracker.start_session(SessionKind::Raid);
        assert_eq!(tracker.session_raids(), 2);
        tracker.reset_session_raids();
        assert_eq!(tracker.session_raids(), 0);
    }

    #[test]
    fn all_time_totals_persist_across_trackers() {
        let clock = Arc::new(ManualClock::new(0));
        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());

        let mut first = SessionTimeTracker::with_store(clock.clone(), store.clone());
        first.start_session(SessionKind::Raid);
        clock.advance(1_500);
        first.on_game_terminated();

        let second = SessionTimeTracker::with_store(clock.clone(), store);
        let stats = second.get_game_time_stats();
        assert_eq!(stats.raid_time_ms, 0);
        assert_eq!(stats.all_time_raid_ms, 1_500);
        assert_eq!(stats.all_time_raids, 1);
    }

    #[test]
    fn reload_while_live_does_not_double_count_all_time() {
        let clock = Arc::new(ManualClock::new(0));
        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let mut tracker = SessionTimeTracker::with_store(clock.clone(), store);

        tracker.start_session(SessionKind::Lobby);
        clock.advance(400);
        tracker.reload_data();
        tracker.reload_data();
        clock.advance(100);

        let stats = tracker.get_game_time_stats();
        assert_eq!(stats.all_time_lobby_ms, 500);
        assert_eq!(stats.lobby_time_ms, 500);
    }

    #[test]
    fn clock_going_backwards_never_subtracts_time() {
        let (clock, mut tracker) = tracker();
        tracker.start_session(SessionKind::Lobby);
        clock.advance(-500);
        assert_eq!(tracker.get_game_time_stats().lobby_time_ms, 0);
        let segment = tracker.on_game_terminated().expect("flushed");
        assert_eq!(segment.duration_ms, 0);
    }
}
