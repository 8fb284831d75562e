//! IPC protocol and cross-window message types for raidclock.
//!
//! This crate is shared by the background daemon, the tracker windows and the
//! host adapter to prevent schema drift. The daemon remains the authority on
//! validation, but every process reuses the same types to build requests.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    /// Host platform signal (lifecycle, telemetry, hotkeys) pushed by the host adapter.
    HostSignal,
    /// Stringified bus message addressed to the receiving process.
    Deliver,
    GetGameTime,
    GetCoordinatorState,
    /// Command sent by the daemon to the host adapter.
    HostCommand,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(method: Method, id: Option<String>, params: Option<Value>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            method,
            id,
            params,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }

    /// Converts a failed response into its error, keeping the payload otherwise.
    pub fn into_result(self) -> Result<Option<Value>, ErrorInfo> {
        if self.ok {
            Ok(self.data)
        } else {
            Err(self
                .error
                .unwrap_or_else(|| ErrorInfo::new("unknown_error", "response carried no error")))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Windows
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowName {
    Background,
    Desktop,
    InGame,
}

/// Every renderer window that displays tracker statistics.
pub const TRACKER_WINDOWS: [WindowName; 2] = [WindowName::Desktop, WindowName::InGame];

impl WindowName {
    pub fn as_str(&self) -> &'static str {
        match self {
            WindowName::Background => "background",
            WindowName::Desktop => "desktop",
            WindowName::InGame => "in_game",
        }
    }
}

impl FromStr for WindowName {
    type Err = UnknownName;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "background" => Ok(WindowName::Background),
            "desktop" => Ok(WindowName::Desktop),
            "in_game" | "in-game" | "ingame" => Ok(WindowName::InGame),
            _ => Err(UnknownName(value.to_string())),
        }
    }
}

/// A window or range name outside the known set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownName(pub String);

impl fmt::Display for UnknownName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown name: {}", self.0)
    }
}

impl std::error::Error for UnknownName {}

impl fmt::Display for WindowName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dock {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

// ─────────────────────────────────────────────────────────────────────────────
// Host adapter -> daemon
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleReason {
    Launched,
    Terminated,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameInfo {
    pub class_id: u32,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub is_running: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedEvent {
    pub name: String,
    #[serde(default)]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HostSignal {
    GameInfoUpdated {
        #[serde(default)]
        reason: Vec<LifecycleReason>,
        game_info: GameInfo,
    },
    InfoUpdate {
        info: Value,
        #[serde(default)]
        feature: Option<String>,
    },
    GameEvent {
        events: Vec<NamedEvent>,
    },
    TelemetryError {
        #[serde(default)]
        feature: Option<String>,
        reason: String,
    },
    HotkeyPressed {
        name: String,
    },
    HotkeyChanged {
        name: String,
        binding: String,
    },
}

impl HostSignal {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        match self {
            HostSignal::GameInfoUpdated { game_info, .. } => {
                if game_info.class_id == 0 {
                    return Err(ErrorInfo::new("invalid_class_id", "class_id is required"));
                }
            }
            HostSignal::InfoUpdate { .. } => {}
            HostSignal::GameEvent { events } => {
                if events.is_empty() {
                    return Err(ErrorInfo::new("missing_field", "events must not be empty"));
                }
                if events.iter().any(|event| event.name.trim().is_empty()) {
                    return Err(ErrorInfo::new("missing_field", "event name is required"));
                }
            }
            HostSignal::TelemetryError { .. } => {}
            HostSignal::HotkeyPressed { name } => require_string(name, "name")?,
            HostSignal::HotkeyChanged { name, binding } => {
                require_string(name, "name")?;
                require_string(binding, "binding")?;
            }
        }
        Ok(())
    }

    /// The lifecycle edge carried by a game-info update, if any.
    pub fn lifecycle_reason(&self) -> Option<LifecycleReason> {
        match self {
            HostSignal::GameInfoUpdated { reason, .. } => reason
                .iter()
                .copied()
                .find(|value| *value != LifecycleReason::Other),
            _ => None,
        }
    }
}

pub fn parse_host_signal(params: Value) -> Result<HostSignal, ErrorInfo> {
    let signal: HostSignal = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("host signal payload is invalid: {}", err),
        )
    })?;
    signal.validate()?;
    Ok(signal)
}

fn require_string(value: &str, field: &str) -> Result<(), ErrorInfo> {
    if value.trim().is_empty() {
        return Err(ErrorInfo::new(
            "missing_field",
            format!("{} is required", field),
        ));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Daemon -> host adapter
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum HostCommand {
    ShowWindow {
        window: WindowName,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        center_on: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dock: Option<Dock>,
    },
    HideWindow {
        window: WindowName,
    },
    ToggleWindow {
        window: WindowName,
    },
    CloseWindow {
        window: WindowName,
    },
    GetWindowVisibility {
        window: WindowName,
    },
    SubscribeFeatures {
        features: Vec<String>,
    },
    GetCurrentInfoSnapshot,
}

/// Host reply to a feature subscription round trip.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureReply {
    pub success: bool,
    #[serde(default)]
    pub supported_features: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Cross-window bus messages
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
    MapUpdated,
    GameStateChanged,
    TrackerWindowSwitched,
    HotkeyUpdated,
    GameTimeUpdated,
    TopMapsRequest,
    TopMapsUpdated,
    DashboardRequest,
    DashboardUpdated,
    LibraryRequest,
    LibraryUpdated,
    OverviewRequest,
    OverviewUpdated,
    Custom,
}

impl MessageType {
    pub const ALL: [MessageType; 14] = [
        MessageType::MapUpdated,
        MessageType::GameStateChanged,
        MessageType::TrackerWindowSwitched,
        MessageType::HotkeyUpdated,
        MessageType::GameTimeUpdated,
        MessageType::TopMapsRequest,
        MessageType::TopMapsUpdated,
        MessageType::DashboardRequest,
        MessageType::DashboardUpdated,
        MessageType::LibraryRequest,
        MessageType::LibraryUpdated,
        MessageType::OverviewRequest,
        MessageType::OverviewUpdated,
        MessageType::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::MapUpdated => "map-updated",
            MessageType::GameStateChanged => "game-state-changed",
            MessageType::TrackerWindowSwitched => "tracker-window-switched",
            MessageType::HotkeyUpdated => "hotkey-updated",
            MessageType::GameTimeUpdated => "game-time-updated",
            MessageType::TopMapsRequest => "top-maps-request",
            MessageType::TopMapsUpdated => "top-maps-updated",
            MessageType::DashboardRequest => "dashboard-request",
            MessageType::DashboardUpdated => "dashboard-updated",
            MessageType::LibraryRequest => "library-request",
            MessageType::LibraryUpdated => "library-updated",
            MessageType::OverviewRequest => "overview-request",
            MessageType::OverviewUpdated => "overview-updated",
            MessageType::Custom => "custom",
        }
    }

    pub fn from_wire(value: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|candidate| candidate.as_str() == value)
    }

    /// The `<X>-updated` type that answers a `<X>-request`.
    pub fn response_type(&self) -> Option<MessageType> {
        match self {
            MessageType::TopMapsRequest => Some(MessageType::TopMapsUpdated),
            MessageType::DashboardRequest => Some(MessageType::DashboardUpdated),
            MessageType::LibraryRequest => Some(MessageType::LibraryUpdated),
            MessageType::OverviewRequest => Some(MessageType::OverviewUpdated),
            _ => None,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bus message. Immutable once sent; carried as text between processes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    Malformed(String),
    UnknownType(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Malformed(details) => write!(f, "malformed message: {}", details),
            DecodeError::UnknownType(value) => write!(f, "unknown message type: {}", value),
        }
    }
}

impl Message {
    pub fn new(message_type: MessageType, data: Option<Value>, timestamp: i64) -> Self {
        Self {
            message_type,
            data,
            timestamp,
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parses a stringified message, separating unknown types from broken payloads.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|err| DecodeError::Malformed(err.to_string()))?;
        let object = value
            .as_object()
            .ok_or_else(|| DecodeError::Malformed("message must be an object".to_string()))?;

        let type_name = object
            .get("type")
            .and_then(|value| value.as_str())
            .ok_or_else(|| DecodeError::Malformed("type is required".to_string()))?;
        let message_type = MessageType::from_wire(type_name)
            .ok_or_else(|| DecodeError::UnknownType(type_name.to_string()))?;

        let timestamp = object
            .get("timestamp")
            .and_then(|value| value.as_i64())
            .ok_or_else(|| DecodeError::Malformed("timestamp must be an integer".to_string()))?;

        let data = match object.get("data") {
            None | Some(Value::Null) => None,
            Some(value) => Some(value.clone()),
        };

        Ok(Self {
            message_type,
            data,
            timestamp,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared payloads
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    Lobby,
    Raid,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Lobby => "lobby",
            SessionKind::Raid => "raid",
        }
    }
}

/// As-of-now game time totals for the current game process lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameTimeStats {
    pub raid_time_ms: u64,
    pub lobby_time_ms: u64,
    pub total_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_scene: Option<SessionKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_started_at: Option<i64>,
    pub session_raids: u32,
    #[serde(default)]
    pub all_time_raid_ms: u64,
    #[serde(default)]
    pub all_time_lobby_ms: u64,
    #[serde(default)]
    pub all_time_raids: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatsRange {
    #[serde(rename = "today")]
    Today,
    #[serde(rename = "7d")]
    SevenDays,
    #[default]
    #[serde(rename = "all")]
    All,
}

impl StatsRange {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatsRange::Today => "today",
            StatsRange::SevenDays => "7d",
            StatsRange::All => "all",
        }
    }
}

impl FromStr for StatsRange {
    type Err = UnknownName;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "today" => Ok(StatsRange::Today),
            "7d" => Ok(StatsRange::SevenDays),
            "all" => Ok(StatsRange::All),
            _ => Err(UnknownName(value.to_string())),
        }
    }
}

/// Body of a `<X>-request` message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeRequest {
    #[serde(default)]
    pub range: Option<StatsRange>,
}

/// Body of a `<X>-updated` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangedPayload<T> {
    pub range: StatsRange,
    pub data: T,
}
