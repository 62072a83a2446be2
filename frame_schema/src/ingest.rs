//! Tolerant frame ingestion.
//!
//! The aggregator has renamed most of its fields at least once. This adapter
//! accepts every known spelling and produces a [`FramePayload`]; nothing else
//! in the workspace looks at raw frame JSON.

use ahash::AHashSet;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::payload::{
    FlowTransition, FrameMeta, FramePayload, HotspotThresholds, PlayerSample, WorldPosition,
    ZoneCount, ZoneKey,
};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("frame is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame root must be an object, found {found}")]
    NotAnObject { found: &'static str },
}

/// Where to look for a value inside a record.
#[derive(Debug, Clone, Copy)]
enum FieldPath {
    Key(&'static str),
    Nested(&'static str, &'static str),
    Indexed(&'static str, usize),
}

const FROM_ZX: &[FieldPath] = &[
    FieldPath::Key("fx"),
    FieldPath::Key("from_zx"),
    FieldPath::Key("fromX"),
    FieldPath::Key("fromZX"),
    FieldPath::Nested("from", "zx"),
    FieldPath::Nested("a", "zx"),
    FieldPath::Indexed("from", 0),
];
const FROM_ZY: &[FieldPath] = &[
    FieldPath::Key("fy"),
    FieldPath::Key("from_zy"),
    FieldPath::Key("fromY"),
    FieldPath::Key("fromZY"),
    FieldPath::Nested("from", "zy"),
    FieldPath::Nested("a", "zy"),
    FieldPath::Indexed("from", 1),
];
const TO_ZX: &[FieldPath] = &[
    FieldPath::Key("tx"),
    FieldPath::Key("to_zx"),
    FieldPath::Key("toX"),
    FieldPath::Key("toZX"),
    FieldPath::Nested("to", "zx"),
    FieldPath::Nested("b", "zx"),
    FieldPath::Indexed("to", 0),
];
const TO_ZY: &[FieldPath] = &[
    FieldPath::Key("ty"),
    FieldPath::Key("to_zy"),
    FieldPath::Key("toY"),
    FieldPath::Key("toZY"),
    FieldPath::Nested("to", "zy"),
    FieldPath::Nested("b", "zy"),
    FieldPath::Indexed("to", 1),
];
const TRANSITION_WEIGHT: &[&str] = &["n", "count", "weight", "w", "events", "c"];
const TRANSITION_NAMES: &[&str] = &["players", "names", "player_names", "playerNames"];
const PLAYER_ID: &[&str] = &["id", "pfid", "name", "label"];
const PLAYER_NAME: &[&str] = &["name", "label"];

pub fn parse_frame_payload(text: &str) -> Result<FramePayload, IngestError> {
    let value: Value = serde_json::from_str(text)?;
    frame_from_value(&value)
}

pub fn frame_from_value(value: &Value) -> Result<FramePayload, IngestError> {
    let root = value.as_object().ok_or(IngestError::NotAnObject {
        found: json_kind(value),
    })?;

    Ok(FramePayload {
        meta: read_meta(root),
        players: read_players(root),
        hotspots: read_hotspots(root),
        hotspot_thresholds: read_thresholds(root),
        transitions: read_transitions(root),
    })
}

fn read_meta(root: &Map<String, Value>) -> FrameMeta {
    let Some(meta) = root.get("meta").and_then(Value::as_object) else {
        return FrameMeta::default();
    };
    FrameMeta {
        schema: meta.get("schema").and_then(scalar_string),
        timestamp: meta.get("t").and_then(scalar_string),
    }
}

fn read_players(root: &Map<String, Value>) -> Vec<PlayerSample> {
    let Some(list) = root.get("players").and_then(Value::as_array) else {
        return Vec::new();
    };
    list.iter()
        .filter_map(Value::as_object)
        .map(|record| {
            let id = first_present(record, PLAYER_ID).and_then(scalar_string);
            let name = first_present(record, PLAYER_NAME).and_then(scalar_string);
            let zone = match (record.get("zx"), record.get("zy")) {
                (Some(zx), Some(zy)) => zone_key(zx, zy),
                _ => None,
            };
            let position = match (
                record.get("x").and_then(number),
                record.get("z").and_then(number),
            ) {
                (Some(x), Some(z)) => Some(WorldPosition { x, z }),
                _ => None,
            };
            PlayerSample {
                id,
                name,
                zone,
                position,
            }
        })
        .collect()
}

fn read_hotspots(root: &Map<String, Value>) -> Vec<ZoneCount> {
    let list = match root.get("hotspots") {
        Some(Value::Array(list)) => Some(list),
        Some(Value::Object(groups)) => match groups.get("world_zdos") {
            Some(Value::Array(list)) => Some(list),
            Some(Value::Object(inner)) => inner
                .get("zones")
                .or_else(|| inner.get("list"))
                .and_then(Value::as_array),
            _ => None,
        },
        _ => None,
    };
    let Some(list) = list else {
        return Vec::new();
    };

    let mut skipped = 0usize;
    let hotspots: Vec<ZoneCount> = list
        .iter()
        .filter_map(|entry| {
            let record = entry.as_object()?;
            let zone = match (record.get("zx"), record.get("zy")) {
                (Some(zx), Some(zy)) => zone_key(zx, zy),
                _ => None,
            };
            let Some(zone) = zone else {
                skipped += 1;
                return None;
            };
            let count = record
                .get("count")
                .or_else(|| record.get("v"))
                .and_then(number)
                .unwrap_or(0.0);
            Some(ZoneCount { zone, count })
        })
        .collect();
    if skipped > 0 {
        log::debug!("ingest.hotspots skipped={skipped} reason=missing_zone");
    }
    hotspots
}

fn read_thresholds(root: &Map<String, Value>) -> Option<HotspotThresholds> {
    let meta = root
        .get("hotspots_meta")?
        .as_object()?
        .get("world_zdos")?
        .as_object()?;
    Some(HotspotThresholds {
        p90: meta.get("p90").and_then(number),
        p99: meta.get("p99").and_then(number),
        epoch: meta
            .get("epoch")
            .and_then(number)
            .map(|epoch| epoch.floor() as i64),
    })
}

fn transition_list(root: &Map<String, Value>) -> Option<&Vec<Value>> {
    fn unwrap_list(value: &Value) -> Option<&Vec<Value>> {
        match value {
            Value::Array(list) => Some(list),
            Value::Object(inner) => inner.get("transitions").and_then(Value::as_array),
            _ => None,
        }
    }
    root.get("flow")
        .and_then(unwrap_list)
        .or_else(|| root.get("player_flow").and_then(unwrap_list))
}

fn read_transitions(root: &Map<String, Value>) -> Vec<FlowTransition> {
    let Some(list) = transition_list(root) else {
        return Vec::new();
    };

    let mut skipped = 0usize;
    let transitions: Vec<FlowTransition> = list
        .iter()
        .filter_map(|entry| {
            let parsed = entry.as_object().and_then(read_transition);
            if parsed.is_none() {
                skipped += 1;
            }
            parsed
        })
        .collect();
    if skipped > 0 {
        log::debug!("ingest.flow skipped={skipped} reason=malformed_or_empty");
    }
    transitions
}

fn read_transition(record: &Map<String, Value>) -> Option<FlowTransition> {
    let from = ZoneKey::new(
        zone_coord(lookup(record, FROM_ZX)?)?,
        zone_coord(lookup(record, FROM_ZY)?)?,
    );
    let to = ZoneKey::new(
        zone_coord(lookup(record, TO_ZX)?)?,
        zone_coord(lookup(record, TO_ZY)?)?,
    );
    let weight = match first_present(record, TRANSITION_WEIGHT) {
        Some(value) => number(value)?,
        None => 1.0,
    };
    if !(weight > 0.0) {
        return None;
    }

    let mut seen = AHashSet::new();
    let names = first_present(record, TRANSITION_NAMES)
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(scalar_string)
                .filter(|name| seen.insert(name.clone()))
                .collect()
        })
        .unwrap_or_default();

    Some(FlowTransition {
        from,
        to,
        weight,
        names,
    })
}

fn lookup<'a>(record: &'a Map<String, Value>, paths: &[FieldPath]) -> Option<&'a Value> {
    paths.iter().find_map(|path| {
        let value = match *path {
            FieldPath::Key(key) => record.get(key),
            FieldPath::Nested(outer, inner) => record.get(outer)?.as_object()?.get(inner),
            FieldPath::Indexed(outer, index) => record.get(outer)?.as_array()?.get(index),
        }?;
        (!value.is_null()).then_some(value)
    })
}

fn first_present<'a>(record: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| record.get(*key))
        .find(|value| !value.is_null())
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|n| n.is_finite())
}

fn zone_coord(value: &Value) -> Option<i32> {
    let n = number(value)?.trunc();
    (n.abs() <= i32::MAX as f64).then_some(n as i32)
}

fn zone_key(zx: &Value, zy: &Value) -> Option<ZoneKey> {
    Some(ZoneKey::new(zone_coord(zx)?, zone_coord(zy)?))
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn aggregator_frame_parses() {
        let frame = frame_from_value(&json!({
            "meta": { "schema": "frame/v2", "t": "2024-05-01T10:00:00Z" },
            "players": [{ "id": "p1", "name": "Ada", "zx": 1, "zy": 2 }],
            "flow": [{ "a": { "zx": 0, "zy": 0 }, "b": { "zx": 1, "zy": 0 }, "c": 3 }],
            "hotspots": { "world_zdos": [{ "zx": 4, "zy": 5, "count": 900 }] },
            "hotspots_meta": { "world_zdos": { "p90": 700, "p99": 2500, "epoch": 12 } }
        }))
        .expect("frame should parse");

        assert_eq!(frame.timestamp_key(), Some("2024-05-01T10:00:00Z"));
        assert_eq!(frame.players[0].zone, Some(ZoneKey::new(1, 2)));
        assert_eq!(frame.transitions.len(), 1);
        assert_eq!(frame.transitions[0].weight, 3.0);
        assert_eq!(frame.transitions[0].to, ZoneKey::new(1, 0));
        assert_eq!(frame.hotspots[0].count, 900.0);
        let thresholds = frame.hotspot_thresholds.expect("thresholds");
        assert_eq!(thresholds.p99, Some(2500.0));
        assert_eq!(thresholds.epoch, Some(12));
    }

    #[test]
    fn legacy_spellings_resolve_to_the_same_shape() {
        let frame = frame_from_value(&json!({
            "player_flow": { "transitions": [
                { "from_zx": 1, "from_zy": 1, "to_zx": 2, "to_zy": 1, "n": 2, "names": ["Bo", "Bo", "Cy"] },
                { "from": [3, 3], "to": [4, 4], "weight": "5" },
                { "fromX": 0, "fromY": 0, "toX": 1, "toY": 1 }
            ]},
            "hotspots": [{ "zx": 9, "zy": 9, "v": 40 }]
        }))
        .expect("frame should parse");

        assert_eq!(frame.transitions.len(), 3);
        assert_eq!(frame.transitions[0].names, vec!["Bo".to_string(), "Cy".to_string()]);
        assert_eq!(frame.transitions[1].from, ZoneKey::new(3, 3));
        assert_eq!(frame.transitions[1].weight, 5.0);
        assert_eq!(frame.transitions[2].weight, 1.0);
        assert_eq!(frame.hotspots[0].count, 40.0);
    }

    #[test]
    fn nested_hotspot_lists_are_accepted() {
        let zones = frame_from_value(&json!({
            "hotspots": { "world_zdos": { "zones": [{ "zx": 1, "zy": 1 }] } }
        }))
        .expect("frame should parse");
        assert_eq!(zones.hotspots[0].count, 0.0);

        let list = frame_from_value(&json!({
            "hotspots": { "world_zdos": { "list": [{ "zx": 2, "zy": 2, "count": 7 }] } }
        }))
        .expect("frame should parse");
        assert_eq!(list.hotspots[0].zone, ZoneKey::new(2, 2));
    }

    #[test]
    fn non_positive_and_incomplete_transitions_are_skipped() {
        let frame = frame_from_value(&json!({
            "flow": { "transitions": [
                { "fx": 0, "fy": 0, "tx": 1, "ty": 1, "count": 0 },
                { "fx": 0, "fy": 0, "tx": 1 },
                { "fx": 0, "fy": 0, "tx": 1, "ty": 1, "w": -2 }
            ]}
        }))
        .expect("frame should parse");
        assert!(frame.transitions.is_empty());
    }

    #[test]
    fn player_identity_falls_back_through_variants() {
        let frame = frame_from_value(&json!({
            "players": [
                { "pfid": 77, "x": 130.0, "z": -10.0 },
                { "label": "Scout" }
            ]
        }))
        .expect("frame should parse");
        assert_eq!(frame.players[0].identity(), Some("77"));
        assert_eq!(frame.players[0].zone_for(64.0), Some(ZoneKey::new(2, -1)));
        assert_eq!(frame.players[1].identity(), Some("Scout"));
        assert_eq!(frame.players[1].display_name(), Some("Scout"));
    }

    #[test]
    fn non_object_root_is_rejected() {
        let err = parse_frame_payload("[1, 2]").expect_err("array root");
        assert!(matches!(err, IngestError::NotAnObject { found: "array" }));
        assert!(matches!(
            parse_frame_payload("{").expect_err("truncated"),
            IngestError::Json(_)
        ));
    }
}
