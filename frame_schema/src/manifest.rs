use serde_json::Value;
use thiserror::Error;

use crate::time::{numeric_seconds, parse_compact_stamp, parse_iso_seconds};

const LOCATOR_KEYS: &[&str] = &["url", "path", "file", "href"];
const TIMESTAMP_KEYS: &[&str] = &["t", "time", "ts", "epoch", "sec"];

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("manifest root must be an object")]
    NotAnObject,
}

/// Archive listing published by the aggregator.
///
/// Frame entries are kept raw; the timeline's frame index decides which of
/// them are usable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manifest {
    pub earliest: Option<String>,
    pub latest: Option<String>,
    pub cadence_s: Option<f64>,
    pub frame_entries: Vec<Value>,
    pub frame_template: Option<String>,
    pub live_locator: Option<String>,
}

impl Manifest {
    /// Changes whenever the published time range or cadence moves.
    pub fn signature(&self) -> String {
        format!(
            "{}|{}|{}",
            self.earliest.as_deref().unwrap_or(""),
            self.latest.as_deref().unwrap_or(""),
            self.cadence_s.map(|c| c.to_string()).unwrap_or_default()
        )
    }
}

/// One usable archive entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameEntry {
    pub timestamp_sec: i64,
    pub locator: String,
}

pub fn parse_manifest(text: &str) -> Result<Manifest, ManifestError> {
    let value: Value = serde_json::from_str(text)?;
    let root = value.as_object().ok_or(ManifestError::NotAnObject)?;
    let time = root.get("time").and_then(Value::as_object);

    let frame_entries = root
        .get("frames")
        .and_then(Value::as_array)
        .or_else(|| time.and_then(|t| t.get("frames")).and_then(Value::as_array))
        .cloned()
        .unwrap_or_default();

    let time_string = |key: &str| {
        time.and_then(|t| t.get(key))
            .and_then(Value::as_str)
            .map(str::to_owned)
    };
    let web_path = |key: &str| {
        root.get("paths")
            .and_then(|paths| paths.get("web"))
            .and_then(|web| web.get(key))
            .and_then(Value::as_str)
            .filter(|path| !path.is_empty())
            .map(str::to_owned)
    };

    Ok(Manifest {
        earliest: time_string("earliest"),
        latest: time_string("latest"),
        cadence_s: time
            .and_then(|t| t.get("cadence_s"))
            .and_then(Value::as_f64),
        frame_entries,
        frame_template: web_path("frame_template"),
        live_locator: web_path("frame_live"),
    })
}

/// Reads a manifest frame entry; `None` when it has no locator or no
/// resolvable timestamp.
///
/// Entries are either a bare locator string, whose timestamp is taken from a
/// compact `YYYYMMDDTHHMMSS` stamp inside it, or an object carrying the
/// locator and timestamp under one of several historical keys.
pub fn parse_frame_entry(entry: &Value) -> Option<FrameEntry> {
    match entry {
        Value::String(locator) if !locator.is_empty() => Some(FrameEntry {
            timestamp_sec: parse_compact_stamp(locator)?,
            locator: locator.clone(),
        }),
        Value::Object(record) => {
            let locator = LOCATOR_KEYS
                .iter()
                .filter_map(|key| record.get(*key).and_then(Value::as_str))
                .find(|s| !s.is_empty())?
                .to_owned();
            let explicit = TIMESTAMP_KEYS
                .iter()
                .filter_map(|key| record.get(*key))
                .find(|value| !value.is_null());
            let timestamp_sec = match explicit {
                Some(Value::String(text)) => parse_iso_seconds(text),
                Some(Value::Number(n)) => n.as_f64().and_then(numeric_seconds),
                Some(_) => None,
                None => parse_compact_stamp(&locator),
            }?;
            Some(FrameEntry {
                timestamp_sec,
                locator,
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn manifest_reads_time_block_and_paths() {
        let manifest = parse_manifest(
            r#"{
                "time": {
                    "earliest": "2024-05-01T10:00:00Z",
                    "latest": "2024-05-01T10:02:00Z",
                    "cadence_s": 60,
                    "frames": ["frames/frame_20240501T100000.json"]
                },
                "paths": { "web": { "frame_live": "live/now.json", "frame_template": "frames/frame_{compact}.json" } }
            }"#,
        )
        .expect("manifest should parse");

        assert_eq!(manifest.frame_entries.len(), 1);
        assert_eq!(manifest.live_locator.as_deref(), Some("live/now.json"));
        assert_eq!(
            manifest.signature(),
            "2024-05-01T10:00:00Z|2024-05-01T10:02:00Z|60"
        );
    }

    #[test]
    fn top_level_frames_take_precedence() {
        let manifest = parse_manifest(
            r#"{ "frames": [{"path": "a.json", "t": 5}], "time": { "frames": ["b.json", "c.json"] } }"#,
        )
        .expect("manifest should parse");
        assert_eq!(manifest.frame_entries.len(), 1);
    }

    #[test]
    fn entry_variants() {
        assert_eq!(
            parse_frame_entry(&json!({ "href": "x.json", "epoch": 1_714_557_600_000_i64 })),
            Some(FrameEntry {
                timestamp_sec: 1_714_557_600,
                locator: "x.json".into()
            })
        );
        assert_eq!(
            parse_frame_entry(&json!({ "file": "y.json", "time": "2024-05-01T10:00:00Z" }))
                .map(|e| e.timestamp_sec),
            Some(1_714_557_600)
        );
        assert_eq!(
            parse_frame_entry(&json!({ "url": "frame_20240501T100000.json" }))
                .map(|e| e.timestamp_sec),
            Some(1_714_557_600)
        );
    }

    #[test]
    fn unusable_entries_are_rejected() {
        assert!(parse_frame_entry(&json!({ "t": 5 })).is_none());
        assert!(parse_frame_entry(&json!({ "path": "z.json", "t": "yesterday" })).is_none());
        assert!(parse_frame_entry(&json!("no-stamp.json")).is_none());
        assert!(parse_frame_entry(&json!(42)).is_none());
    }

    #[test]
    fn non_object_manifest_fails() {
        assert!(matches!(
            parse_manifest("[]").expect_err("array manifest"),
            ManifestError::NotAnObject
        ));
    }
}
