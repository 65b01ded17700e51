//! Per-tick action records.
//!
//! The client sends a [`PositionRecord`] for every control tick. The capture
//! server enriches it with sequence and timing fields to produce an
//! [`ActionRecord`]; an episode's trace file is a JSON array of those.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::io::{read_json, write_json, ModelError};

/// Fields the server owns on an [`ActionRecord`]. Client-supplied values for
/// these keys are dropped from the pass-through map.
pub const SERVER_ASSIGNED_FIELDS: [&str; 5] = [
    "frame_count",
    "episode_id",
    "renderTime",
    "relativeTimeMs",
    "epochTime",
];

/// Control input for one tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionState {
    /// Camera rotation delta as `[yaw_delta, pitch_delta]`.
    #[serde(default)]
    pub camera: [f64; 2],

    /// Key states (`forward`, `jump`, ...). Values are booleans for keys;
    /// anything else a client sends is kept verbatim.
    #[serde(flatten)]
    pub keys: BTreeMap<String, serde_json::Value>,
}

impl ActionState {
    /// Whether the named key is held down.
    pub fn is_pressed(&self, key: &str) -> bool {
        matches!(self.keys.get(key), Some(serde_json::Value::Bool(true)))
    }

    /// Names of all keys held down this tick.
    pub fn pressed_keys(&self) -> Vec<&str> {
        self.keys
            .iter()
            .filter(|(_, v)| matches!(v, serde_json::Value::Bool(true)))
            .map(|(k, _)| k.as_str())
            .collect()
    }
}

/// A position/action payload as sent by the game client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f64,
    pub pitch: f64,

    #[serde(default)]
    pub action: ActionState,

    /// Client render clock (ms). Not wallclock unless its magnitude says so.
    #[serde(rename = "renderTime", default)]
    pub render_time_ms: f64,

    /// Any other client fields, passed through to the trace.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One discrete control tick as persisted in an episode trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f64,
    pub pitch: f64,

    #[serde(default)]
    pub action: ActionState,

    /// Client render clock (ms).
    #[serde(rename = "renderTime")]
    pub render_time_ms: f64,

    /// `render_time_ms` minus the first render time of the episode.
    #[serde(rename = "relativeTimeMs")]
    pub relative_time_ms: f64,

    /// Absolute wallclock seconds.
    #[serde(rename = "epochTime")]
    pub epoch_time_sec: f64,

    /// Sequence index within the episode, starting at 0.
    pub frame_count: u64,

    pub episode_id: i64,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ActionRecord {
    /// Build a record from a client payload plus the server-assigned fields.
    pub fn from_position(
        position: PositionRecord,
        frame_count: u64,
        episode_id: i64,
        relative_time_ms: f64,
        epoch_time_sec: f64,
    ) -> Self {
        let mut extra = position.extra;
        for key in SERVER_ASSIGNED_FIELDS {
            extra.remove(key);
        }
        Self {
            x: position.x,
            y: position.y,
            z: position.z,
            yaw: position.yaw,
            pitch: position.pitch,
            action: position.action,
            render_time_ms: position.render_time_ms,
            relative_time_ms,
            epoch_time_sec,
            frame_count,
            episode_id,
            extra,
        }
    }
}

/// Load an episode trace (JSON array of action records).
pub fn load_action_trace(path: &Path) -> Result<Vec<ActionRecord>, ModelError> {
    read_json(path)
}

/// Write an episode trace.
pub fn save_action_trace(path: &Path, records: &[ActionRecord]) -> Result<(), ModelError> {
    write_json(path, records)
}

/// Check the per-episode ordering invariants: `frame_count` increases by
/// exactly one and render time never goes backwards.
pub fn validate_trace(records: &[ActionRecord]) -> Vec<String> {
    let mut errors = vec![];
    for (i, pair) in records.windows(2).enumerate() {
        let (prev, next) = (&pair[0], &pair[1]);
        if next.frame_count != prev.frame_count + 1 {
            errors.push(format!(
                "record {}: frame_count {} does not follow {}",
                i + 1,
                next.frame_count,
                prev.frame_count
            ));
        }
        if next.render_time_ms < prev.render_time_ms {
            errors.push(format!(
                "record {}: renderTime {} is earlier than {}",
                i + 1,
                next.render_time_ms,
                prev.render_time_ms
            ));
        }
        if next.episode_id != prev.episode_id {
            errors.push(format!(
                "record {}: episode_id {} differs from {}",
                i + 1,
                next.episode_id,
                prev.episode_id
            ));
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_position() -> PositionRecord {
        serde_json::from_str(
            r#"{
                "x": 1.23456, "y": 64.0, "z": -3.5, "yaw": 0.1, "pitch": -0.2,
                "action": { "forward": true, "jump": false, "camera": [0.5, -0.25] },
                "renderTime": 1234.5,
                "health": 20,
                "frame_count": 999
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_position_record_parses_client_payload() {
        let pos = sample_position();
        assert!((pos.render_time_ms - 1234.5).abs() < 1e-9);
        assert_eq!(pos.action.camera, [0.5, -0.25]);
        assert!(pos.action.is_pressed("forward"));
        assert!(!pos.action.is_pressed("jump"));
        assert!(!pos.action.is_pressed("sneak"));
        assert_eq!(pos.extra.get("health"), Some(&serde_json::json!(20)));
    }

    #[test]
    fn test_missing_render_time_defaults_to_zero() {
        let pos: PositionRecord =
            serde_json::from_str(r#"{"x":0,"y":0,"z":0,"yaw":0,"pitch":0}"#).unwrap();
        assert_eq!(pos.render_time_ms, 0.0);
        assert!(pos.action.keys.is_empty());
    }

    #[test]
    fn test_missing_position_field_is_rejected() {
        let parsed = serde_json::from_str::<PositionRecord>(r#"{"x":0,"y":0,"z":0,"yaw":0}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_action_record_uses_wire_field_names() {
        let record = ActionRecord::from_position(sample_position(), 3, 7, 250.0, 1_700_000_000.25);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["renderTime"], serde_json::json!(1234.5));
        assert_eq!(json["relativeTimeMs"], serde_json::json!(250.0));
        assert_eq!(json["epochTime"], serde_json::json!(1_700_000_000.25));
        assert_eq!(json["frame_count"], serde_json::json!(3));
        assert_eq!(json["episode_id"], serde_json::json!(7));
        assert_eq!(json["health"], serde_json::json!(20));
        assert_eq!(json["action"]["forward"], serde_json::json!(true));
    }

    #[test]
    fn test_client_frame_count_is_overridden() {
        let record = ActionRecord::from_position(sample_position(), 3, 7, 0.0, 0.0);
        assert!(!record.extra.contains_key("frame_count"));
        let text = serde_json::to_string(&record).unwrap();
        assert_eq!(text.matches("\"frame_count\"").count(), 1);
        let back: ActionRecord = serde_json::from_str(&text).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_pressed_keys_lists_only_true_values() {
        let pos = sample_position();
        assert_eq!(pos.action.pressed_keys(), vec!["forward"]);
    }

    #[test]
    fn test_validate_trace_flags_gaps_and_time_reversal() {
        let base = ActionRecord::from_position(sample_position(), 0, 1, 0.0, 0.0);
        let mut second = base.clone();
        second.frame_count = 2;
        second.render_time_ms = base.render_time_ms - 1.0;

        let errors = validate_trace(&[base, second]);
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("frame_count"));
        assert!(errors[1].contains("renderTime"));
    }

    proptest! {
        #[test]
        fn prop_sequential_trace_is_valid(deltas in proptest::collection::vec(0.0f64..100.0, 0..50)) {
            let mut render = 0.0;
            let records: Vec<ActionRecord> = deltas
                .iter()
                .enumerate()
                .map(|(i, d)| {
                    render += d;
                    let mut pos = sample_position();
                    pos.render_time_ms = render;
                    ActionRecord::from_position(pos, i as u64, 1, render, render / 1000.0)
                })
                .collect();
            prop_assert!(validate_trace(&records).is_empty());
        }
    }
}
