//! Scene classification for raw game telemetry.
//!
//! Telemetry arrives in several shapes: flat key/value info updates, nested
//! category/key updates, one-shot named events, and the snapshot returned by
//! the host when asked for the current state. Each shape is recognised
//! explicitly; anything else falls through to [`TelemetryShape::Unrecognized`]
//! and classifies as [`SceneSignal::None`]. Classification never fails and has
//! no side effects.

use raidclock_protocol::NamedEvent;
use serde::Serialize;
use serde_json::{Map, Value};

const SCENE_KEY: &str = "scene";
const MAP_KEY: &str = "map";
const MAP_NAME_KEY: &str = "map_name";
const SNAPSHOT_RESULT_KEY: &str = "res";
const MATCH_START_EVENT: &str = "match_start";
const MATCH_END_EVENT: &str = "match_end";

/// Normalized scene signal derived from one telemetry input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneSignal {
    Ingame,
    Lobby,
    Summary,
    MatchStart,
    MatchEnd,
    None,
}

impl SceneSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            SceneSignal::Ingame => "ingame",
            SceneSignal::Lobby => "lobby",
            SceneSignal::Summary => "summary",
            SceneSignal::MatchStart => "match_start",
            SceneSignal::MatchEnd => "match_end",
            SceneSignal::None => "none",
        }
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, SceneSignal::None)
    }
}

/// Raw input handed over by the host, before any interpretation.
#[derive(Debug, Clone, Copy)]
pub enum RawTelemetry<'a> {
    Info(&'a Value),
    Events(&'a [NamedEvent]),
    Snapshot(&'a Value),
}

/// The known telemetry shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryShape<'a> {
    /// `{ "scene": "lobby" }`
    Flat { scene: &'a str },
    /// `{ "game_info": { "scene": "lobby" } }`
    Nested { category: &'a str, scene: &'a str },
    /// `[{ "name": "match_start" }]`
    NamedEvent { name: &'a str },
    /// `{ "res": { "game_info": { "scene": "ingame" } } }`
    Snapshot { scene: &'a str },
    Unrecognized,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MapInfo {
    pub map_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

pub fn parse_shape<'a>(raw: RawTelemetry<'a>) -> TelemetryShape<'a> {
    match raw {
        RawTelemetry::Info(value) => match value.as_object() {
            Some(object) => {
                if let Some(scene) = object.get(SCENE_KEY).and_then(Value::as_str) {
                    return TelemetryShape::Flat { scene };
                }
                match find_nested(object, SCENE_KEY) {
                    Some((category, scene)) => TelemetryShape::Nested { category, scene },
                    None => TelemetryShape::Unrecognized,
                }
            }
            None => TelemetryShape::Unrecognized,
        },
        RawTelemetry::Events(events) => events
            .iter()
            .map(|event| event.name.as_str())
            .find(|name| *name == MATCH_START_EVENT || *name == MATCH_END_EVENT)
            .map(|name| TelemetryShape::NamedEvent { name })
            .unwrap_or(TelemetryShape::Unrecognized),
        RawTelemetry::Snapshot(value) => {
            let Some(result) = snapshot_result(value) else {
                return TelemetryShape::Unrecognized;
            };
            let scene = result
                .get(SCENE_KEY)
                .and_then(Value::as_str)
                .or_else(|| find_nested(result, SCENE_KEY).map(|(_, scene)| scene));
            match scene {
                Some(scene) => TelemetryShape::Snapshot { scene },
                None => TelemetryShape::Unrecognized,
            }
        }
    }
}

pub fn classify(raw: RawTelemetry<'_>) -> SceneSignal {
    match parse_shape(raw) {
        TelemetryShape::Flat { scene }
        | TelemetryShape::Nested { scene, .. }
        | TelemetryShape::Snapshot { scene } => scene_from_str(scene),
        TelemetryShape::NamedEvent { name } => match name {
            MATCH_START_EVENT => SceneSignal::MatchStart,
            MATCH_END_EVENT => SceneSignal::MatchEnd,
            _ => SceneSignal::None,
        },
        TelemetryShape::Unrecognized => SceneSignal::None,
    }
}

/// Finds a map identifier in info updates or snapshots.
pub fn extract_map(raw: RawTelemetry<'_>) -> Option<MapInfo> {
    let object = match raw {
        RawTelemetry::Info(value) => value.as_object()?,
        RawTelemetry::Snapshot(value) => snapshot_result(value)?,
        RawTelemetry::Events(events) => {
            return events.iter().find_map(|event| {
                event
                    .data
                    .as_ref()
                    .and_then(Value::as_object)
                    .and_then(map_from_object)
            });
        }
    };

    map_from_object(object).or_else(|| {
        object
            .values()
            .filter_map(Value::as_object)
            .find_map(map_from_object)
    })
}

fn scene_from_str(value: &str) -> SceneSignal {
    match value.trim().to_ascii_lowercase().as_str() {
        "ingame" => SceneSignal::Ingame,
        "lobby" => SceneSignal::Lobby,
        "summary" => SceneSignal::Summary,
        _ => SceneSignal::None,
    }
}

fn find_nested<'a>(object: &'a Map<String, Value>, key: &str) -> Option<(&'a str, &'a str)> {
    object.iter().find_map(|(category, value)| {
        value
            .as_object()
            .and_then(|inner| inner.get(key))
            .and_then(Value::as_str)
            .map(|scene| (category.as_str(), scene))
    })
}

fn snapshot_result(value: &Value) -> Option<&Map<String, Value>> {
    let object = value.as_object()?;
    match object.get(SNAPSHOT_RESULT_KEY) {
        Some(result) => result.as_object(),
        None => Some(object),
    }
}

fn map_from_object(object: &Map<String, Value>) -> Option<MapInfo> {
    let map_id = object
        .get(MAP_KEY)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())?;
    let title = object
        .get(MAP_NAME_KEY)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string);
    Some(MapInfo {
        map_id: map_id.to_string(),
        title,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(name: &str) -> NamedEvent {
        NamedEvent {
            name: name.to_string(),
            data: None,
        }
    }

    #[test]
    fn classifies_flat_scene() {
        let info = json!({ "scene": "ingame" });
        assert_eq!(classify(RawTelemetry::Info(&info)), SceneSignal::Ingame);
    }

    #[test]
    fn classifies_nested_scene() {
        let info = json!({ "game_info": { "scene": "summary" } });
        assert_eq!(
            parse_shape(RawTelemetry::Info(&info)),
            TelemetryShape::Nested {
                category: "game_info",
                scene: "summary"
            }
        );
        assert_eq!(classify(RawTelemetry::Info(&info)), SceneSignal::Summary);
    }

    #[test]
    fn classifies_named_events() {
        let events = vec![event("kill"), event("match_end")];
        assert_eq!(classify(RawTelemetry::Events(&events)), SceneSignal::MatchEnd);

        let events = vec![event("match_start")];
        assert_eq!(classify(RawTelemetry::Events(&events)), SceneSignal::MatchStart);
    }

    #[test]
    fn classifies_snapshot_with_and_without_result_wrapper() {
        let wrapped = json!({ "success": true, "res": { "game_info": { "scene": "lobby" } } });
        assert_eq!(classify(RawTelemetry::Snapshot(&wrapped)), SceneSignal::Lobby);

        let bare = json!({ "scene": "ingame" });
        assert_eq!(classify(RawTelemetry::Snapshot(&bare)), SceneSignal::Ingame);
    }

    #[test]
    fn unknown_shapes_are_none() {
        let cases = [
            json!(null),
            json!("lobby"),
            json!([1, 2, 3]),
            json!({ "scene": 42 }),
            json!({ "scene": "loading" }),
            json!({ "game_info": "not an object" }),
            json!({}),
        ];
        for value in &cases {
            assert_eq!(classify(RawTelemetry::Info(value)), SceneSignal::None);
            assert_eq!(classify(RawTelemetry::Snapshot(value)), SceneSignal::None);
        }

        let events = vec![event("kill")];
        assert_eq!(classify(RawTelemetry::Events(&events)), SceneSignal::None);
        assert_eq!(classify(RawTelemetry::Events(&[])), SceneSignal::None);
    }

    #[test]
    fn scene_values_are_case_insensitive() {
        let info = json!({ "scene": " Lobby " });
        assert_eq!(classify(RawTelemetry::Info(&info)), SceneSignal::Lobby);
    }

    #[test]
    fn extracts_map_from_nested_info() {
        let info = json!({ "match_info": { "map": "customs", "map_name": "Customs" } });
        assert_eq!(
            extract_map(RawTelemetry::Info(&info)),
            Some(MapInfo {
                map_id: "customs".to_string(),
                title: Some("Customs".to_string())
            })
        );
    }

    #[test]
    fn extracts_map_from_snapshot_and_events() {
        let snapshot = json!({ "res": { "match_info": { "map": "woods" } } });
        assert_eq!(
            extract_map(RawTelemetry::Snapshot(&snapshot)).map(|map| map.map_id),
            Some("woods".to_string())
        );

        let events = vec![NamedEvent {
            name: "match_start".to_string(),
            data: Some(json!({ "map": "factory" })),
        }];
        assert_eq!(
            extract_map(RawTelemetry::Events(&events)).map(|map| map.map_id),
            Some("factory".to_string())
        );
    }

    #[test]
    fn blank_map_is_ignored() {
        let info = json!({ "map": "  " });
        assert_eq!(extract_map(RawTelemetry::Info(&info)), None);
    }
}
