//! What a tracker window knows, rebuilt from bus broadcasts.
//!
//! The window never computes statistics itself. It keeps the latest payload
//! of each broadcast and renders it as a log line.

use raidclock_core::bus::{CrossWindowBus, Subscription};
use raidclock_core::error::Result;
use raidclock_protocol::{GameTimeStats, Message, MessageType, RangedPayload, WindowName};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

pub type GameTimeFetch = Box<dyn Fn() -> Result<GameTimeStats> + Send + Sync>;

const OBSERVED: [MessageType; 10] = [
    MessageType::GameTimeUpdated,
    MessageType::GameStateChanged,
    MessageType::MapUpdated,
    MessageType::TrackerWindowSwitched,
    MessageType::HotkeyUpdated,
    MessageType::TopMapsUpdated,
    MessageType::DashboardUpdated,
    MessageType::LibraryUpdated,
    MessageType::OverviewUpdated,
    MessageType::Custom,
];

#[derive(Debug, Clone, Default)]
pub struct WindowState {
    pub game_time: Option<GameTimeStats>,
    pub game_state: Option<Value>,
    pub current_map: Option<Value>,
    pub visible: Option<bool>,
    pub hotkeys: BTreeMap<String, String>,
    /// Latest `<X>-updated` payload keyed by its wire type.
    pub stats: BTreeMap<&'static str, RangedPayload<Value>>,
}

pub struct WindowView {
    window: WindowName,
    state: Mutex<WindowState>,
    fetch_game_time: GameTimeFetch,
}

impl WindowView {
    pub fn new(window: WindowName, fetch_game_time: GameTimeFetch) -> Arc<Self> {
        Arc::new(Self {
            window,
            state: Mutex::new(WindowState::default()),
            fetch_game_time,
        })
    }

    pub fn attach(self: &Arc<Self>, bus: &CrossWindowBus) -> Vec<Subscription> {
        OBSERVED
            .iter()
            .map(|message_type| {
                let view = Arc::clone(self);
                bus.on_message(*message_type, move |message| view.apply(message))
            })
            .collect()
    }

    pub fn state(&self) -> WindowState {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, WindowState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn apply(&self, message: &Message) -> std::result::Result<(), String> {
        match message.message_type {
            MessageType::GameTimeUpdated => {
                // An empty update means "ask the background for the totals".
                let stats = match &message.data {
                    Some(data) => parse::<GameTimeStats>(data)?,
                    None => (self.fetch_game_time)().map_err(String::from)?,
                };
                info!(
                    window = self.window.as_str(),
                    raid_ms = stats.raid_time_ms,
                    lobby_ms = stats.lobby_time_ms,
                    session_raids = stats.session_raids,
                    scene = stats.current_scene.map(|kind| kind.as_str()).unwrap_or("-"),
                    "Game time"
                );
                self.lock().game_time = Some(stats);
            }
            MessageType::GameStateChanged => {
                info!(window = self.window.as_str(), state = ?message.data, "Game state");
                self.lock().game_state = message.data.clone();
            }
            MessageType::MapUpdated => {
                info!(window = self.window.as_str(), map = ?message.data, "Map");
                self.lock().current_map = message.data.clone();
            }
            MessageType::TrackerWindowSwitched => {
                let data = message.data.as_ref().ok_or("switch without data")?;
                if data.get("window").and_then(Value::as_str) == Some(self.window.as_str()) {
                    let visible = data.get("visible").and_then(Value::as_bool);
                    info!(window = self.window.as_str(), visible = ?visible, "Visibility switched");
                    self.lock().visible = visible;
                }
            }
            MessageType::HotkeyUpdated => {
                let data = message.data.as_ref().ok_or("hotkey update without data")?;
                let (Some(name), Some(binding)) = (
                    data.get("name").and_then(Value::as_str),
                    data.get("binding").and_then(Value::as_str),
                ) else {
                    return Err("hotkey update needs name and binding".to_string());
                };
                self.lock()
                    .hotkeys
                    .insert(name.to_string(), binding.to_string());
            }
            MessageType::TopMapsUpdated
            | MessageType::DashboardUpdated
            | MessageType::LibraryUpdated
            | MessageType::OverviewUpdated => {
                let data = message.data.as_ref().ok_or("statistics update without data")?;
                let payload = parse::<RangedPayload<Value>>(data)?;
                info!(
                    window = self.window.as_str(),
                    kind = message.message_type.as_str(),
                    range = payload.range.as_str(),
                    "Statistics"
                );
                self.lock()
                    .stats
                    .insert(message.message_type.as_str(), payload);
            }
            other => debug!(window = self.window.as_str(), message_type = %other, "Ignored"),
        }
        Ok(())
    }
}

fn parse<T: serde::de::DeserializeOwned>(data: &Value) -> std::result::Result<T, String> {
    serde_json::from_value(data.clone()).map_err(|err| err.to_string())
}
