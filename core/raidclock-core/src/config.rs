//! User configuration loaded from `~/.raidclock/config.toml`.
//!
//! Every field has a default, so a missing file, a missing section or a
//! partially written file still yields a usable configuration.

use crate::error::{CoreError, Result};
use raidclock_protocol::{Dock, WindowName};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 3_000;
pub const DEFAULT_GAME_TIME_INTERVAL_MS: u64 = 2_000;
pub const DEFAULT_GAME_CLASS_ID: u32 = 21634;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub negotiation: NegotiationConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default = "default_games")]
    pub games: Vec<GameDefinition>,
    #[serde(default = "default_hotkeys")]
    pub hotkeys: Vec<HotkeyBinding>,
    #[serde(default)]
    pub windows: WindowsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NegotiationConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl NegotiationConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastConfig {
    #[serde(default = "default_game_time_interval_ms")]
    pub game_time_interval_ms: u64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            game_time_interval_ms: default_game_time_interval_ms(),
        }
    }
}

impl BroadcastConfig {
    pub fn game_time_interval(&self) -> Duration {
        Duration::from_millis(self.game_time_interval_ms)
    }
}

/// A supported game, matched by the host's numeric class identifier.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct GameDefinition {
    pub class_id: u32,
    #[serde(default)]
    pub name: String,
    /// Telemetry features to request. Empty means the title needs no negotiation.
    #[serde(default)]
    pub features: Vec<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HotkeyAction {
    Toggle,
    Show,
    Hide,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct HotkeyBinding {
    pub name: String,
    pub window: WindowName,
    #[serde(default = "default_hotkey_action")]
    pub action: HotkeyAction,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WindowsConfig {
    #[serde(default = "default_in_game_dock")]
    pub in_game_dock: Dock,
    #[serde(default = "default_true")]
    pub desktop_centered: bool,
    #[serde(default = "default_true")]
    pub show_in_game_on_launch: bool,
    #[serde(default = "default_true")]
    pub hide_in_game_on_exit: bool,
}

impl Default for WindowsConfig {
    fn default() -> Self {
        Self {
            in_game_dock: default_in_game_dock(),
            desktop_centered: true,
            show_in_game_on_launch: true,
            hide_in_game_on_exit: true,
        }
    }
}

impl Default for AppConfig {
    /// Every section at its default, including the built-in game table.
    fn default() -> Self {
        Self {
            negotiation: NegotiationConfig::default(),
            broadcast: BroadcastConfig::default(),
            games: default_games(),
            hotkeys: default_hotkeys(),
            windows: WindowsConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn supported_game(&self, class_id: u32) -> Option<&GameDefinition> {
        self.games.iter().find(|game| game.class_id == class_id)
    }

    pub fn hotkey(&self, name: &str) -> Option<&HotkeyBinding> {
        self.hotkeys.iter().find(|binding| binding.name == name)
    }

    pub fn from_toml_str(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

/// Loads the config file, returning defaults if it does not exist.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }

    let content = fs_err::read_to_string(path).map_err(|err| CoreError::Io {
        context: format!("Failed to read config {}", path.display()),
        source: err,
    })?;
    AppConfig::from_toml_str(&content).map_err(|err| CoreError::ConfigMalformed {
        path: path.to_path_buf(),
        details: err.to_string(),
    })
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}

fn default_game_time_interval_ms() -> u64 {
    DEFAULT_GAME_TIME_INTERVAL_MS
}

fn default_games() -> Vec<GameDefinition> {
    vec![GameDefinition {
        class_id: DEFAULT_GAME_CLASS_ID,
        name: "Escape from Tarkov".to_string(),
        features: vec!["game_info".to_string(), "match_info".to_string()],
    }]
}

fn default_hotkeys() -> Vec<HotkeyBinding> {
    vec![
        HotkeyBinding {
            name: "toggle_tracker".to_string(),
            window: WindowName::InGame,
            action: HotkeyAction::Toggle,
        },
        HotkeyBinding {
            name: "toggle_desktop".to_string(),
            window: WindowName::Desktop,
            action: HotkeyAction::Toggle,
        },
    ]
}

fn default_hotkey_action() -> HotkeyAction {
    HotkeyAction::Toggle
}

fn default_in_game_dock() -> Dock {
    Dock::TopRight
}

fn default_true() -> bool {
    true
}
