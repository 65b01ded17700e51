//! Alignment output: per-action mapping, diagnostics, and the report file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::io::{read_json, write_json, ModelError};

/// Timing view of one trace entry, tolerant of traces written by older
/// clients that lack some fields.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimedAction {
    #[serde(rename = "epochTime", default)]
    pub epoch_time_sec: Option<f64>,

    #[serde(rename = "renderTime", default)]
    pub render_time_ms: Option<f64>,

    #[serde(rename = "relativeTimeMs", default)]
    pub relative_time_ms: Option<f64>,
}

/// Load the timing fields of an action trace. The trace must be a
/// non-empty JSON array.
pub fn load_timed_actions(path: &Path) -> Result<Vec<TimedAction>, ModelError> {
    let actions: Vec<TimedAction> = read_json(path)?;
    if actions.is_empty() {
        return Err(ModelError::ValidationError {
            path: path.to_path_buf(),
            message: "action trace is empty".to_string(),
        });
    }
    Ok(actions)
}

/// Which video frame serves one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentMapping {
    pub action_index: usize,
    pub frame_index: usize,
    pub action_time_sec: f64,
    pub frame_time_sec: f64,
    /// `frame_time_sec - action_time_sec`.
    pub delta_sec: f64,
    #[serde(default)]
    pub render_time_ms: Option<f64>,
    #[serde(default)]
    pub relative_time_ms: Option<f64>,
}

/// A run of frames the recorder appears to have lost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroppedFrameGap {
    /// Index of the frame preceding the gap.
    pub after_frame_index: usize,
    /// Time between the two frames bordering the gap.
    pub gap_sec: f64,
    /// `round(gap / expected_interval) - 1`.
    pub estimated_missed_frames: u64,
}

/// Aggregate quality counters for one alignment run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub action_count: usize,
    pub frame_count: usize,
    pub matched_count: usize,
    pub unmatched_actions_start: usize,
    pub unmatched_actions_end: usize,
    pub skipped_frames_start: usize,
    pub skipped_frames_end: usize,
    pub duplicate_frame_count: usize,
    pub interior_unconsumed_count: usize,
    pub dropped_frame_gaps: Vec<DroppedFrameGap>,
    pub estimated_missed_frames: u64,
    pub mean_delta_sec: f64,
    pub max_abs_delta_sec: f64,
}

impl Diagnostics {
    /// Whether any finding signals a data-quality problem worth a warning.
    pub fn has_quality_warnings(&self) -> bool {
        self.unmatched_actions_start > 0
            || self.unmatched_actions_end > 0
            || self.duplicate_frame_count > 0
            || self.interior_unconsumed_count > 0
            || !self.dropped_frame_gaps.is_empty()
    }
}

/// Decode/seek accounting from re-encoding the aligned video.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReencodeSummary {
    pub frames_written: usize,
    pub cache_hits: usize,
    pub sequential_reads: usize,
    pub seeks: usize,
}

/// Output metadata of one alignment run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentReport {
    pub actions_path: PathBuf,
    pub camera_meta_path: PathBuf,
    pub recording_path: PathBuf,
    pub aligned_video_path: PathBuf,
    pub fps: f64,
    pub camera_start_time_sec: f64,
    pub first_action_time_sec: f64,
    pub last_action_time_sec: f64,
    #[serde(default)]
    pub video_delay_sec: f64,
    pub frame_mapping: Vec<AlignmentMapping>,
    pub diagnostics: Diagnostics,
    #[serde(default)]
    pub reencode: ReencodeSummary,
    #[serde(default)]
    pub comparison_video_path: Option<PathBuf>,
}

impl AlignmentReport {
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        read_json(path)
    }

    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        write_json(path, self)
    }

    /// Whether `frame_index` never decreases as `action_index` grows.
    pub fn is_monotonic(&self) -> bool {
        self.frame_mapping
            .windows(2)
            .all(|w| w[0].action_index < w[1].action_index && w[0].frame_index <= w[1].frame_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timed_actions_tolerate_missing_fields() {
        let dir = std::env::temp_dir().join("tickcap_test_timed_actions");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("trace.json");
        std::fs::write(
            &path,
            r#"[{"epochTime": 10.5, "renderTime": 0, "x": 1}, {"renderTime": 50}]"#,
        )
        .unwrap();

        let actions = load_timed_actions(&path).unwrap();
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].epoch_time_sec, Some(10.5));
        assert_eq!(actions[1].epoch_time_sec, None);
        assert_eq!(actions[1].relative_time_ms, None);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_empty_trace_is_rejected() {
        let dir = std::env::temp_dir().join("tickcap_test_empty_trace");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("trace.json");
        std::fs::write(&path, "[]").unwrap();

        assert!(matches!(
            load_timed_actions(&path).unwrap_err(),
            ModelError::ValidationError { .. }
        ));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_quality_warning_flags() {
        let mut diag = Diagnostics::default();
        assert!(!diag.has_quality_warnings());
        diag.skipped_frames_start = 40;
        assert!(!diag.has_quality_warnings());
        diag.duplicate_frame_count = 1;
        assert!(diag.has_quality_warnings());
    }

    #[test]
    fn test_report_monotonic_check() {
        let mapping = |a: usize, f: usize| AlignmentMapping {
            action_index: a,
            frame_index: f,
            action_time_sec: 0.0,
            frame_time_sec: 0.0,
            delta_sec: 0.0,
            render_time_ms: None,
            relative_time_ms: None,
        };
        let mut report = AlignmentReport {
            actions_path: PathBuf::from("a.json"),
            camera_meta_path: PathBuf::from("c.json"),
            recording_path: PathBuf::from("r.mp4"),
            aligned_video_path: PathBuf::from("o.mp4"),
            fps: 30.0,
            camera_start_time_sec: 0.0,
            first_action_time_sec: 0.0,
            last_action_time_sec: 0.0,
            video_delay_sec: 0.0,
            frame_mapping: vec![mapping(0, 0), mapping(1, 2), mapping(2, 2)],
            diagnostics: Diagnostics::default(),
            reencode: ReencodeSummary::default(),
            comparison_video_path: None,
        };
        assert!(report.is_monotonic());
        report.frame_mapping.push(mapping(3, 1));
        assert!(!report.is_monotonic());
    }
}
