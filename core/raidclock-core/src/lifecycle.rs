//! Game lifecycle coordination.
//!
//! The coordinator is the single owner of the session tracker in the
//! background process. It moves through three phases:
//!
//! ```text
//! Idle ──launch (supported)──▶ Negotiating ──features resolved──▶ Active
//!   ▲                               │                                │
//!   └────────────terminate──────────┴────────────terminate───────────┘
//! ```
//!
//! Negotiation runs on its own thread so scene updates and hotkeys keep
//! flowing. Each launch bumps a generation counter; a negotiation whose
//! generation is stale when it finishes is discarded. Errors from the host
//! never escape a handler: they are logged and the coordinator carries on.
//!
//! Lock order is `state` then `tracker`. The game-time ticker only takes
//! `tracker`. It is tagged with the generation that started it, and the
//! terminate path only stops the ticker of the lifetime it ended.

use crate::aggregate::{AggregateStore, UNKNOWN_MAP_ID};
use crate::bus::CrossWindowBus;
use crate::config::{AppConfig, GameDefinition, HotkeyAction};
use crate::host::{TelemetryHost, TrackerWindow, WindowManager};
use crate::negotiator::{FeatureNegotiator, FeatureSubscription};
use crate::scene::{self, MapInfo, RawTelemetry, SceneSignal};
use crate::session::{SessionSegment, SessionTimeTracker};
use crate::ticker::GameTimeTicker;
use raidclock_protocol::{
    GameInfo, GameTimeStats, HostSignal, LifecycleReason, MessageType, NamedEvent, SessionKind,
    WindowName, TRACKER_WINDOWS,
};
use serde::Serialize;
use serde_json::json;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorPhase {
    Idle,
    Negotiating,
    Active,
}

impl CoordinatorPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoordinatorPhase::Idle => "idle",
            CoordinatorPhase::Negotiating => "negotiating",
            CoordinatorPhase::Active => "active",
        }
    }
}

/// Read-only view of the coordinator, served over IPC.
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorSnapshot {
    pub phase: CoordinatorPhase,
    pub class_id: Option<u32>,
    pub game: Option<String>,
    pub features: Option<FeatureSubscription>,
    pub current_map: Option<MapInfo>,
    pub scene: Option<SessionKind>,
    pub game_time: GameTimeStats,
}

/// Body of `game-state-changed`.
#[derive(Debug, Clone, Serialize)]
pub struct GameStatePayload {
    pub running: bool,
    pub phase: CoordinatorPhase,
    pub scene: Option<SessionKind>,
    pub class_id: Option<u32>,
}

/// Collaborators wired in at process entry.
pub struct CoordinatorDeps {
    pub config: AppConfig,
    pub telemetry: Arc<dyn TelemetryHost>,
    pub windows: Arc<dyn WindowManager>,
    pub bus: Arc<CrossWindowBus>,
    pub aggregates: Arc<AggregateStore>,
    pub tracker: SessionTimeTracker,
}

struct State {
    phase: CoordinatorPhase,
    generation: u64,
    game: Option<GameDefinition>,
    subscription: Option<FeatureSubscription>,
    current_map: Option<MapInfo>,
}

pub struct GameLifecycleCoordinator {
    config: AppConfig,
    telemetry: Arc<dyn TelemetryHost>,
    bus: Arc<CrossWindowBus>,
    aggregates: Arc<AggregateStore>,
    desktop: TrackerWindow,
    in_game: TrackerWindow,
    negotiator: FeatureNegotiator,
    tracker: Arc<Mutex<SessionTimeTracker>>,
    state: Mutex<State>,
    ticker: GameTimeTicker,
    this: Weak<GameLifecycleCoordinator>,
}

impl GameLifecycleCoordinator {
    pub fn new(deps: CoordinatorDeps) -> Arc<Self> {
        let CoordinatorDeps {
            config,
            telemetry,
            windows,
            bus,
            aggregates,
            tracker,
        } = deps;

        Arc::new_cyclic(|this| Self {
            desktop: TrackerWindow::from_config(WindowName::Desktop, &config.windows, windows.clone()),
            in_game: TrackerWindow::from_config(WindowName::InGame, &config.windows, windows),
            negotiator: FeatureNegotiator::new(config.negotiation.retry_delay()),
            ticker: GameTimeTicker::new(config.broadcast.game_time_interval()),
            config,
            telemetry,
            bus,
            aggregates,
            tracker: Arc::new(Mutex::new(tracker)),
            state: Mutex::new(State {
                phase: CoordinatorPhase::Idle,
                generation: 0,
                game: None,
                subscription: None,
                current_map: None,
            }),
            this: this.clone(),
        })
    }

    pub fn phase(&self) -> CoordinatorPhase {
        self.lock_state().phase
    }

    pub fn game_time_stats(&self) -> GameTimeStats {
        lock_tracker(&self.tracker).get_game_time_stats()
    }

    pub fn snapshot(&self) -> CoordinatorSnapshot {
        let state = self.lock_state();
        let game_time = lock_tracker(&self.tracker).get_game_time_stats();
        CoordinatorSnapshot {
            phase: state.phase,
            class_id: state.game.as_ref().map(|game| game.class_id),
            game: state.game.as_ref().map(|game| game.name.clone()),
            features: state.subscription.clone(),
            current_map: state.current_map.clone(),
            scene: game_time.current_scene,
            game_time,
        }
    }

    pub fn window(&self, name: WindowName) -> Option<&TrackerWindow> {
        match name {
            WindowName::Desktop => Some(&self.desktop),
            WindowName::InGame => Some(&self.in_game),
            WindowName::Background => None,
        }
    }

    /// Entry point for every host signal. Never fails; problems are logged.
    pub fn handle_host_signal(&self, signal: HostSignal) {
        match signal {
            HostSignal::GameInfoUpdated { ref game_info, .. } => {
                match signal.lifecycle_reason() {
                    Some(LifecycleReason::Launched) => self.on_game_launched(game_info),
                    Some(LifecycleReason::Terminated) => self.on_game_terminated(game_info),
                    _ => debug!(class_id = game_info.class_id, "Ignoring game info update"),
                }
            }
            HostSignal::InfoUpdate { info, .. } => self.on_telemetry(RawTelemetry::Info(&info)),
            HostSignal::GameEvent { events } => self.on_game_events(&events),
            HostSignal::TelemetryError { feature, reason } => {
                warn!(feature = ?feature, reason = %reason, "Telemetry error reported by host");
            }
            HostSignal::HotkeyPressed { name } => self.on_hotkey(&name),
            HostSignal::HotkeyChanged { name, binding } => {
                info!(hotkey = %name, binding = %binding, "Hotkey binding changed");
                self.bus.broadcast(
                    &TRACKER_WINDOWS,
                    MessageType::HotkeyUpdated,
                    Some(json!({ "name": name, "binding": binding })),
                );
            }
        }
    }

    /// Starts a tracked lifetime for a supported game. Repeated launches are ignored.
    pub fn on_game_launched(&self, game_info: &GameInfo) {
        let Some(game) = self.config.supported_game(game_info.class_id).cloned() else {
            debug!(class_id = game_info.class_id, "Ignoring unsupported game");
            return;
        };

        let generation = {
            let mut state = self.lock_state();
            if state.phase != CoordinatorPhase::Idle {
                debug!(
                    class_id = game.class_id,
                    phase = state.phase.as_str(),
                    "Ignoring duplicate launch signal"
                );
                return;
            }
            state.phase = CoordinatorPhase::Negotiating;
            state.generation += 1;
            state.game = Some(game.clone());
            state.subscription = None;
            state.current_map = None;

            let mut tracker = lock_tracker(&self.tracker);
            tracker.reload_data();
            tracker.reset_session_raids();
            state.generation
        };

        info!(class_id = game.class_id, game = %game.name, "Game launched");
        self.broadcast_game_state();

        if self.config.windows.show_in_game_on_launch {
            if let Err(err) = self.in_game.show() {
                warn!(error = %err, "Failed to show in-game window");
            }
        }

        if game.features.is_empty() {
            self.finish_negotiation(generation, FeatureSubscription::empty(&game.features));
            return;
        }

        let Some(this) = self.this.upgrade() else {
            return;
        };
        let features = game.features.clone();
        let spawned = thread::Builder::new()
            .name("feature-negotiation".to_string())
            .spawn(move || {
                let outcome = this.negotiator.negotiate_while(
                    this.telemetry.as_ref(),
                    &features,
                    this.config.negotiation.max_attempts,
                    || this.is_negotiating(generation),
                );
                let subscription = match outcome {
                    Ok(subscription) => subscription,
                    Err(err) => {
                        warn!(error = %err, "Continuing without telemetry features");
                        FeatureSubscription::empty(&features)
                    }
                };
                this.finish_negotiation(generation, subscription);
            });

        if let Err(err) = spawned {
            warn!(error = %err, "Failed to spawn negotiation thread");
            self.finish_negotiation(generation, FeatureSubscription::empty(&game.features));
        }
    }

    /// Ends the tracked lifetime. Safe to call when nothing is running.
    ///
    /// The tracker is settled in the same critical section that returns the
    /// phase to `Idle`, so a relaunch never reloads from a live session.
    pub fn on_game_terminated(&self, game_info: &GameInfo) {
        let (ended_generation, ended_map, segment, stats) = {
            let mut state = self.lock_state();
            if state.phase == CoordinatorPhase::Idle {
                debug!(class_id = game_info.class_id, "Ignoring termination while idle");
                return;
            }
            if state.game.as_ref().map(|game| game.class_id) != Some(game_info.class_id) {
                debug!(class_id = game_info.class_id, "Ignoring termination of untracked game");
                return;
            }
            let ended_generation = state.generation;
            state.phase = CoordinatorPhase::Idle;
            state.generation += 1;
            state.game = None;
            state.subscription = None;
            let ended_map = state.current_map.take();

            let mut tracker = lock_tracker(&self.tracker);
            let segment = tracker.on_game_terminated();
            (ended_generation, ended_map, segment, tracker.get_game_time_stats())
        };

        self.ticker.stop_if(ended_generation);

        info!(
            class_id = game_info.class_id,
            raid_time_ms = stats.raid_time_ms,
            lobby_time_ms = stats.lobby_time_ms,
            "Game terminated; session totals settled"
        );

        if let Some(segment) = segment {
            self.record_raid(&segment, ended_map.as_ref());
        }
        self.broadcast_game_time(&stats);
        self.broadcast_game_state();

        if self.config.windows.hide_in_game_on_exit {
            if let Err(err) = self.in_game.hide() {
                warn!(error = %err, "Failed to hide in-game window");
            }
        }
    }

    pub fn on_game_events(&self, events: &[NamedEvent]) {
        self.on_telemetry(RawTelemetry::Events(events));
    }

    /// Classifies one telemetry input and applies it to the session state.
    pub fn on_telemetry(&self, raw: RawTelemetry<'_>) {
        let signal = scene::classify(raw);
        let map = scene::extract_map(raw);
        if !signal.is_recognized() && map.is_none() {
            return;
        }

        let (segment, previous_map, map_changed, scene_changed, stats) = {
            let mut state = self.lock_state();
            if state.phase == CoordinatorPhase::Idle {
                debug!(scene = signal.as_str(), "Ignoring telemetry while no game is running");
                return;
            }

            let previous_map = state.current_map.clone();
            let map_changed = match &map {
                Some(map) if previous_map.as_ref().map(|known| &known.map_id) != Some(&map.map_id) => {
                    state.current_map = Some(map.clone());
                    true
                }
                _ => false,
            };

            let mut tracker = lock_tracker(&self.tracker);
            let before = tracker.current_kind();
            let segment = tracker.apply_scene(signal);
            let scene_changed = tracker.current_kind() != before || segment.is_some();
            (segment, previous_map, map_changed, scene_changed, tracker.get_game_time_stats())
        };

        if let Some(segment) = segment {
            let ended_map = previous_map.as_ref().or(map.as_ref());
            self.record_raid(&segment, ended_map);
        }

        if map_changed {
            if let Some(map) = &map {
                info!(map_id = %map.map_id, "Map changed");
                self.bus
                    .broadcast_data(&TRACKER_WINDOWS, MessageType::MapUpdated, map);
            }
        }

        if scene_changed {
            debug!(scene = signal.as_str(), "Scene changed");
            self.broadcast_game_time(&stats);
            self.broadcast_game_state();
        }
    }

    /// Applies a configured hotkey. Unknown names are ignored.
    pub fn on_hotkey(&self, name: &str) {
        let Some(binding) = self.config.hotkey(name) else {
            debug!(hotkey = %name, "Ignoring unbound hotkey");
            return;
        };
        let Some(window) = self.window(binding.window) else {
            warn!(hotkey = %name, window = %binding.window, "Hotkey targets a non-tracker window");
            return;
        };

        let result = match binding.action {
            HotkeyAction::Toggle => window.toggle(),
            HotkeyAction::Show => window.show(),
            HotkeyAction::Hide => window.hide(),
        };
        if let Err(err) = result {
            warn!(hotkey = %name, window = %window.name(), error = %err, "Hotkey action failed");
            return;
        }

        let visible = match window.is_visible() {
            Ok(visible) => visible,
            Err(err) => {
                warn!(window = %window.name(), error = %err, "Failed to read window visibility");
                return;
            }
        };
        debug!(hotkey = %name, window = %window.name(), visible, "Tracker window switched");
        self.bus.broadcast(
            &TRACKER_WINDOWS,
            MessageType::TrackerWindowSwitched,
            Some(json!({ "window": window.name(), "visible": visible })),
        );
    }

    /// Stops background work; used at process shutdown.
    pub fn shutdown(&self) {
        self.ticker.stop();
    }

    fn is_negotiating(&self, generation: u64) -> bool {
        let state = self.lock_state();
        state.generation == generation && state.phase == CoordinatorPhase::Negotiating
    }

    /// Resolves the starting scene and enters `Active`.
    ///
    /// The phase flips in the same critical section that seeds the tracker and
    /// starts the ticker, so an observer never sees `Active` without a session.
    fn finish_negotiation(&self, generation: u64, subscription: FeatureSubscription) {
        if !self.is_negotiating(generation) {
            debug!(generation, "Discarding stale negotiation result");
            return;
        }

        let snapshot = match self.telemetry.current_info_snapshot() {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(error = %err, "Failed to read current scene snapshot");
                None
            }
        };

        let stats = {
            let mut state = self.lock_state();
            if state.generation != generation || state.phase != CoordinatorPhase::Negotiating {
                debug!(generation, "Discarding stale negotiation result");
                return;
            }
            info!(
                requested = subscription.requested.len(),
                enabled = subscription.enabled.len(),
                "Coordinator active"
            );
            state.phase = CoordinatorPhase::Active;
            state.subscription = Some(subscription);

            let snapshot_map = snapshot
                .as_ref()
                .and_then(|value| scene::extract_map(RawTelemetry::Snapshot(value)));
            if let Some(map) = snapshot_map {
                state.current_map = Some(map);
            }

            let mut tracker = lock_tracker(&self.tracker);
            if tracker.current_kind().is_none() {
                let signal = snapshot
                    .as_ref()
                    .map(|value| scene::classify(RawTelemetry::Snapshot(value)))
                    .unwrap_or(SceneSignal::None);
                if signal.is_recognized() {
                    info!(scene = signal.as_str(), "Resuming scene already in progress");
                    tracker.apply_scene(signal);
                } else {
                    tracker.start_session(SessionKind::Lobby);
                }
            }
            let stats = tracker.get_game_time_stats();
            drop(tracker);

            let ticking_tracker = self.tracker.clone();
            let bus = self.bus.clone();
            self.ticker.start(generation, move || {
                let stats = lock_tracker(&ticking_tracker).get_game_time_stats();
                bus.broadcast_data(&TRACKER_WINDOWS, MessageType::GameTimeUpdated, &stats);
            });
            stats
        };

        self.broadcast_game_time(&stats);
        self.broadcast_game_state();
    }

    fn record_raid(&self, segment: &SessionSegment, map: Option<&MapInfo>) {
        if segment.kind != SessionKind::Raid {
            return;
        }
        let map_id = map.map(|map| map.map_id.as_str()).unwrap_or(UNKNOWN_MAP_ID);
        match self.aggregates.record_session_end(map_id, segment.duration_ms) {
            Ok(_) => {
                if let Some(title) = map.and_then(|map| map.title.as_deref()) {
                    if let Err(err) = self.aggregates.set_title(map_id, title) {
                        warn!(map_id = %map_id, error = %err, "Failed to store map title");
                    }
                }
            }
            Err(err) => warn!(map_id = %map_id, error = %err, "Failed to record raid"),
        }
    }

    fn broadcast_game_time(&self, stats: &GameTimeStats) {
        self.bus
            .broadcast_data(&TRACKER_WINDOWS, MessageType::GameTimeUpdated, stats);
    }

    fn broadcast_game_state(&self) {
        let payload = {
            let state = self.lock_state();
            GameStatePayload {
                running: state.phase != CoordinatorPhase::Idle,
                phase: state.phase,
                scene: lock_tracker(&self.tracker).current_kind(),
                class_id: state.game.as_ref().map(|game| game.class_id),
            }
        };
        self.bus
            .broadcast_data(&TRACKER_WINDOWS, MessageType::GameStateChanged, &payload);
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn lock_tracker(tracker: &Mutex<SessionTimeTracker>) -> MutexGuard<'_, SessionTimeTracker> {
    tracker
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::ChannelTransport;
    use crate::clock::ManualClock;
    use crate::error::Result;
    use crate::host::ShowOptions;
    use crate::kv::MemoryKvStore;
    use raidclock_protocol::{FeatureReply, Message};
    use serde_json::Value;
    use std::sync::mpsc::Receiver;
    use std::time::Duration;

    struct StaticHost {
        snapshot: Option<Value>,
    }

    impl TelemetryHost for StaticHost {
        fn subscribe_features(&self, features: &[String]) -> Result<FeatureReply> {
            Ok(FeatureReply {
                success: true,
                supported_features: features.to_vec(),
                error: None,
            })
        }

        fn current_info_snapshot(&self) -> Result<Option<Value>> {
            Ok(self.snapshot.clone())
        }
    }

    #[derive(Default)]
    struct Windows {
        calls: Mutex<Vec<String>>,
    }

    impl WindowManager for Windows {
        fn show_window(&self, window: WindowName, _options: &ShowOptions) -> Result<()> {
            self.calls.lock().expect("lock").push(format!("show:{}", window));
            Ok(())
        }
        fn hide_window(&self, window: WindowName) -> Result<()> {
            self.calls.lock().expect("lock").push(format!("hide:{}", window));
            Ok(())
        }
        fn toggle_window(&self, window: WindowName) -> Result<()> {
            self.calls.lock().expect("lock").push(format!("toggle:{}", window));
            Ok(())
        }
        fn close_window(&self, _window: WindowName) -> Result<()> {
            Ok(())
        }
        fn window_visibility(&self, _window: WindowName) -> Result<bool> {
            Ok(true)
        }
    }

    struct Harness {
        clock: Arc<ManualClock>,
        windows: Arc<Windows>,
        aggregates: Arc<AggregateStore>,
        desktop: Receiver<String>,
        coordinator: Arc<GameLifecycleCoordinator>,
    }

    fn harness(features: Vec<String>, snapshot: Option<Value>) -> Harness {
        let clock = Arc::new(ManualClock::new(1_000));
        let transport = Arc::new(ChannelTransport::new());
        let desktop = transport.register(WindowName::Desktop);
        let bus = Arc::new(CrossWindowBus::new(
            WindowName::Background,
            transport,
            clock.clone(),
        ));
        let aggregates = Arc::new(AggregateStore::new(
            Arc::new(MemoryKvStore::new()),
            clock.clone(),
        ));
        let windows = Arc::new(Windows::default());

        let mut config = AppConfig::default();
        config.games[0].features = features;
        config.negotiation.retry_delay_ms = 0;
        config.broadcast.game_time_interval_ms = 60_000;

        let coordinator = GameLifecycleCoordinator::new(CoordinatorDeps {
            config,
            telemetry: Arc::new(StaticHost { snapshot }),
            windows: windows.clone(),
            bus,
            aggregates: aggregates.clone(),
            tracker: SessionTimeTracker::new(clock.clone()),
        });

        Harness {
            clock,
            windows,
            aggregates,
            desktop,
            coordinator,
        }
    }

    fn game(class_id: u32) -> GameInfo {
        GameInfo {
            class_id,
            title: None,
            is_running: true,
        }
    }

    fn drain(rx: &Receiver<String>) -> Vec<Message> {
        rx.try_iter()
            .filter_map(|payload| Message::decode(&payload).ok())
            .collect()
    }

    #[test]
    fn launch_without_features_activates_immediately_in_lobby() {
        let h = harness(Vec::new(), None);
        h.coordinator.on_game_launched(&game(21634));

        assert_eq!(h.coordinator.phase(), CoordinatorPhase::Active);
        assert_eq!(h.coordinator.game_time_stats().current_scene, Some(SessionKind::Lobby));
        assert_eq!(
            h.windows.calls.lock().expect("lock").as_slice(),
            ["show:in_game".to_string()]
        );
        h.coordinator.shutdown();
    }

    #[test]
    fn unsupported_game_is_ignored() {
        let h = harness(Vec::new(), None);
        h.coordinator.on_game_launched(&game(999));
        assert_eq!(h.coordinator.phase(), CoordinatorPhase::Idle);
        assert!(h.windows.calls.lock().expect("lock").is_empty());
        assert!(drain(&h.desktop).is_empty());
    }

    #[test]
    fn snapshot_scene_is_resumed() {
        let h = harness(Vec::new(), Some(json!({ "res": { "game_info": { "scene": "ingame" } } })));
        h.coordinator.on_game_launched(&game(21634));
        assert_eq!(h.coordinator.game_time_stats().current_scene, Some(SessionKind::Raid));
        h.coordinator.shutdown();
    }

    #[test]
    fn duplicate_launch_keeps_running_session() {
        let h = harness(Vec::new(), None);
        h.coordinator.on_game_launched(&game(21634));
        h.clock.advance(500);
        h.coordinator.on_game_launched(&game(21634));
        h.clock.advance(500);
        assert_eq!(h.coordinator.game_time_stats().lobby_time_ms, 1_000);
        h.coordinator.shutdown();
    }

    #[test]
    fn raid_end_records_map_statistics() {
        let h = harness(Vec::new(), None);
        h.coordinator.on_game_launched(&game(21634));

        h.coordinator
            .on_telemetry(RawTelemetry::Info(&json!({ "match_info": { "map": "customs", "map_name": "Customs" } })));
        h.coordinator
            .on_telemetry(RawTelemetry::Info(&json!({ "game_info": { "scene": "ingame" } })));
        h.clock.advance(90_000);
        h.coordinator
            .on_telemetry(RawTelemetry::Info(&json!({ "game_info": { "scene": "summary" } })));

        let record = h.aggregates.get("customs").expect("get").expect("record");
        assert_eq!(record.play_count, 1);
        assert_eq!(record.total_play_time_ms, 90_000);
        assert_eq!(record.title.as_deref(), Some("Customs"));

        let types: Vec<MessageType> = drain(&h.desktop).iter().map(|m| m.message_type).collect();
        assert!(types.contains(&MessageType::MapUpdated));
        assert!(types.contains(&MessageType::GameStateChanged));
        h.coordinator.shutdown();
    }

    #[test]
    fn termination_during_raid_records_and_settles() {
        let h = harness(Vec::new(), None);
        h.coordinator.on_game_launched(&game(21634));
        h.coordinator
            .on_game_events(&[NamedEvent { name: "match_start".to_string(), data: None }]);
        h.clock.advance(2_000);
        drain(&h.desktop);

        h.coordinator.on_game_terminated(&game(21634));
        assert_eq!(h.coordinator.phase(), CoordinatorPhase::Idle);
        assert_eq!(
            h.aggregates.get(UNKNOWN_MAP_ID).expect("get").map(|r| r.total_play_time_ms),
            Some(2_000)
        );

        let messages = drain(&h.desktop);
        let final_time = messages
            .iter()
            .find(|m| m.message_type == MessageType::GameTimeUpdated)
            .and_then(|m| m.data.clone())
            .expect("final stats");
        let stats: GameTimeStats = serde_json::from_value(final_time).expect("stats");
        assert_eq!(stats.raid_time_ms, 2_000);
        assert_eq!(stats.current_scene, None);

        h.clock.advance(5_000);
        assert_eq!(h.coordinator.game_time_stats().raid_time_ms, 2_000);
        assert!(h.windows.calls.lock().expect("lock").contains(&"hide:in_game".to_string()));

        h.coordinator.on_game_terminated(&game(21634));
        assert_eq!(h.coordinator.game_time_stats().raid_time_ms, 2_000);
    }

    #[test]
    fn relaunch_after_termination_starts_a_fresh_lifetime() {
        let h = harness(Vec::new(), None);
        h.coordinator.on_game_launched(&game(21634));
        h.coordinator
            .on_game_events(&[NamedEvent { name: "match_start".to_string(), data: None }]);
        h.clock.advance(2_000);

        h.coordinator.on_game_terminated(&game(21634));
        assert!(!h.coordinator.ticker.is_running());
        h.coordinator.on_game_launched(&game(21634));

        let stats = h.coordinator.game_time_stats();
        assert_eq!((stats.raid_time_ms, stats.lobby_time_ms), (0, 0));
        assert_eq!(stats.current_scene, Some(SessionKind::Lobby));
        assert!(h.coordinator.ticker.is_running());

        // A stop issued on behalf of the ended lifetime leaves the new ticker alone.
        assert!(!h.coordinator.ticker.stop_if(1));
        assert!(h.coordinator.ticker.is_running());
        h.coordinator.shutdown();
    }

    #[test]
    fn telemetry_while_idle_is_ignored() {
        let h = harness(Vec::new(), None);
        h.coordinator
            .on_telemetry(RawTelemetry::Info(&json!({ "scene": "ingame" })));
        assert_eq!(h.coordinator.game_time_stats().current_scene, None);
    }

    #[test]
    fn hotkey_toggles_and_announces_window() {
        let h = harness(Vec::new(), None);
        h.coordinator.handle_host_signal(HostSignal::HotkeyPressed {
            name: "toggle_tracker".to_string(),
        });
        h.coordinator.handle_host_signal(HostSignal::HotkeyPressed {
            name: "not_bound".to_string(),
        });

        assert_eq!(
            h.windows.calls.lock().expect("lock").as_slice(),
            ["toggle:in_game".to_string()]
        );
        let switched: Vec<Message> = drain(&h.desktop)
            .into_iter()
            .filter(|m| m.message_type == MessageType::TrackerWindowSwitched)
            .collect();
        assert_eq!(switched.len(), 1);
        assert_eq!(
            switched[0].data,
            Some(json!({ "window": "in_game", "visible": true }))
        );
    }

    #[test]
    fn negotiation_runs_off_thread_then_activates() {
        let h = harness(vec!["game_info".to_string()], None);
        h.coordinator.on_game_launched(&game(21634));

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while h.coordinator.phase() != CoordinatorPhase::Active {
            assert!(std::time::Instant::now() < deadline, "negotiation never finished");
            thread::sleep(Duration::from_millis(5));
        }
        let snapshot = h.coordinator.snapshot();
        assert_eq!(
            snapshot.features.map(|f| f.enabled),
            Some(vec!["game_info".to_string()])
        );
        h.coordinator.shutdown();
    }
}
