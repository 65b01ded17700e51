//! Single-episode alignment: load, extract, match, re-encode, report.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tickcap_common::config::AlignConfig;
use tickcap_common::error::TickcapError;
use tickcap_episode_model::{
    load_timed_actions, AlignmentMapping, AlignmentReport, CameraMetadata, ModelError,
};
use tickcap_media::compare::build_side_by_side;
use tickcap_media::probe::{extract_frame_timestamps, timestamps_are_wallclock, ProbeError};
use tickcap_media::reencode::{reencode_file, ReencodeError};
use tickcap_media::MediaTools;

use crate::matcher::{log_diagnostics, match_streams, MatcherConfig};

#[derive(Debug, thiserror::Error)]
pub enum AlignError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("Action {index} in {path} has no epochTime")]
    MissingEpochTime { path: PathBuf, index: usize },

    #[error("Action {index} in {path} is earlier than the action before it")]
    UnorderedActions { path: PathBuf, index: usize },

    #[error("Recording not found at {declared} or {fallback}")]
    RecordingNotFound { declared: PathBuf, fallback: PathBuf },

    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error("Timestamps of {recording} are not wallclock (first is {first_timestamp})")]
    NotWallclock {
        recording: PathBuf,
        first_timestamp: f64,
    },

    #[error("No action could be matched to a frame ({action_count} actions, {frame_count} frames)")]
    NoMatches {
        action_count: usize,
        frame_count: usize,
    },

    #[error(transparent)]
    Reencode(#[from] ReencodeError),

    #[error("Alignment task failed: {0}")]
    Task(String),
}

impl From<AlignError> for TickcapError {
    fn from(err: AlignError) -> Self {
        match err {
            AlignError::Model(_)
            | AlignError::MissingEpochTime { .. }
            | AlignError::UnorderedActions { .. }
            | AlignError::RecordingNotFound { .. } => TickcapError::config(err.to_string()),
            AlignError::Probe(e) => e.into(),
            AlignError::Reencode(e) => e.into(),
            other => TickcapError::alignment(other.to_string()),
        }
    }
}

/// Optional side-by-side video of the game capture and the aligned output.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonRequest {
    pub game_video: PathBuf,
    pub output: PathBuf,
}

/// One episode to align.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentJob {
    pub actions_path: PathBuf,
    pub camera_meta_path: PathBuf,
    pub output_video: PathBuf,
    /// Defaults to `<output stem>_meta.json` beside the output video.
    pub output_metadata: Option<PathBuf>,
    /// Seconds added to every action time before matching.
    pub video_delay_secs: f64,
    pub comparison: Option<ComparisonRequest>,
}

impl AlignmentJob {
    pub fn new(
        actions_path: impl Into<PathBuf>,
        camera_meta_path: impl Into<PathBuf>,
        output_video: impl Into<PathBuf>,
    ) -> Self {
        Self {
            actions_path: actions_path.into(),
            camera_meta_path: camera_meta_path.into(),
            output_video: output_video.into(),
            output_metadata: None,
            video_delay_secs: 0.0,
            comparison: None,
        }
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.output_metadata.clone().unwrap_or_else(|| {
            let stem = self
                .output_video
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "aligned".to_string());
            self.output_video.with_file_name(format!("{stem}_meta.json"))
        })
    }
}

/// Tooling and matcher settings shared by every job.
#[derive(Debug, Clone)]
pub struct AlignOptions {
    pub tools: MediaTools,
    pub boundary_grace_secs: f64,
    pub gap_factor: f64,
    pub probe_timeout: Duration,
}

impl AlignOptions {
    pub fn from_config(config: &AlignConfig) -> Self {
        Self {
            tools: MediaTools::new(config.ffmpeg_path.clone(), config.ffprobe_path.clone()),
            boundary_grace_secs: config.boundary_grace_secs,
            gap_factor: config.gap_factor,
            probe_timeout: config.probe_timeout(),
        }
    }

    fn matcher_config(&self, fps: f64) -> MatcherConfig {
        MatcherConfig {
            fps,
            boundary_grace_secs: self.boundary_grace_secs,
            gap_factor: self.gap_factor,
        }
    }
}

impl Default for AlignOptions {
    fn default() -> Self {
        Self::from_config(&AlignConfig::default())
    }
}

/// Locate the recording named in camera metadata.
///
/// Relative paths are taken relative to the metadata file. When the declared
/// path does not exist, a file of the same name beside the metadata is used,
/// which covers recordings moved together with their metadata.
pub fn resolve_recording_path(camera_meta_path: &Path, declared: &str) -> Result<PathBuf, AlignError> {
    let meta_dir = camera_meta_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    let declared_path = PathBuf::from(declared);
    let resolved = if declared_path.is_absolute() {
        declared_path.clone()
    } else {
        meta_dir.join(&declared_path)
    };
    if resolved.exists() {
        return Ok(resolved);
    }

    let fallback = declared_path
        .file_name()
        .map(|name| meta_dir.join(name))
        .unwrap_or_else(|| resolved.clone());
    if fallback.exists() {
        tracing::warn!(
            declared = %resolved.display(),
            fallback = %fallback.display(),
            "Recording not at declared path; using file beside camera metadata"
        );
        return Ok(fallback);
    }
    Err(AlignError::RecordingNotFound {
        declared: resolved,
        fallback,
    })
}

/// Epoch seconds of every action, shifted by `delay_secs`.
fn action_times(
    path: &Path,
    actions: &[tickcap_episode_model::TimedAction],
    delay_secs: f64,
) -> Result<Vec<f64>, AlignError> {
    let mut times = Vec::with_capacity(actions.len());
    for (index, action) in actions.iter().enumerate() {
        let epoch = action
            .epoch_time_sec
            .ok_or_else(|| AlignError::MissingEpochTime {
                path: path.to_path_buf(),
                index,
            })?;
        let time = epoch + delay_secs;
        if times.last().is_some_and(|prev| time < *prev) {
            return Err(AlignError::UnorderedActions {
                path: path.to_path_buf(),
                index,
            });
        }
        times.push(time);
    }
    Ok(times)
}

/// Align one episode. On failure no output video or report is left behind.
pub fn align_episode(job: &AlignmentJob, options: &AlignOptions) -> Result<AlignmentReport, AlignError> {
    tracing::info!(
        actions = %job.actions_path.display(),
        camera_meta = %job.camera_meta_path.display(),
        output = %job.output_video.display(),
        "Aligning episode"
    );

    let actions = load_timed_actions(&job.actions_path)?;
    let times = action_times(&job.actions_path, &actions, job.video_delay_secs)?;

    let camera = CameraMetadata::load(&job.camera_meta_path)?;
    let recording = resolve_recording_path(&job.camera_meta_path, &camera.recording_path)?;

    let frame_times = extract_frame_timestamps(&options.tools, &recording, options.probe_timeout)?;
    if !timestamps_are_wallclock(&frame_times, camera.wallclock_timestamps) {
        return Err(AlignError::NotWallclock {
            recording,
            first_timestamp: frame_times[0],
        });
    }
    tracing::debug!(
        frames = frame_times.len(),
        first_frame = frame_times[0],
        camera_start = camera.start_epoch_seconds,
        first_action = times[0],
        "Loaded both timelines"
    );

    let result = match_streams(&times, &frame_times, &options.matcher_config(camera.fps));
    log_diagnostics(&result.diagnostics);
    if result.is_empty() {
        return Err(AlignError::NoMatches {
            action_count: times.len(),
            frame_count: frame_times.len(),
        });
    }

    let reencode = reencode_file(
        &options.tools,
        &recording,
        &job.output_video,
        &result.frame_indices(),
        camera.fps,
        options.probe_timeout,
    )?;

    let frame_mapping = result
        .matches
        .iter()
        .map(|m| AlignmentMapping {
            action_index: m.action_index,
            frame_index: m.frame_index,
            action_time_sec: times[m.action_index],
            frame_time_sec: frame_times[m.frame_index],
            delta_sec: m.delta_sec,
            render_time_ms: actions[m.action_index].render_time_ms,
            relative_time_ms: actions[m.action_index].relative_time_ms,
        })
        .collect();

    let comparison_video_path = job.comparison.as_ref().and_then(|request| {
        match build_side_by_side(
            &options.tools,
            &request.game_video,
            &job.output_video,
            &request.output,
            options.probe_timeout,
        ) {
            Ok(summary) => {
                tracing::info!(
                    output = %summary.output.display(),
                    frames = summary.frames,
                    "Wrote comparison video"
                );
                Some(summary.output)
            }
            Err(e) => {
                tracing::warn!("Comparison video failed: {e}");
                None
            }
        }
    });

    let report = AlignmentReport {
        actions_path: job.actions_path.clone(),
        camera_meta_path: job.camera_meta_path.clone(),
        recording_path: recording,
        aligned_video_path: job.output_video.clone(),
        fps: camera.fps,
        camera_start_time_sec: camera.start_epoch_seconds,
        first_action_time_sec: times[0],
        last_action_time_sec: times[times.len() - 1],
        video_delay_sec: job.video_delay_secs,
        frame_mapping,
        diagnostics: result.diagnostics,
        reencode,
        comparison_video_path,
    };

    let metadata_path = job.metadata_path();
    if let Err(e) = report.save(&metadata_path) {
        let _ = std::fs::remove_file(&job.output_video);
        return Err(e.into());
    }
    tracing::info!(
        output = %job.output_video.display(),
        metadata = %metadata_path.display(),
        frames = report.reencode.frames_written,
        "Alignment complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("tickcap_test_pipeline_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_metadata_path_defaults_beside_output() {
        let job = AlignmentJob::new("a.json", "c.json", "/out/ep1_aligned.mp4");
        assert_eq!(job.metadata_path(), PathBuf::from("/out/ep1_aligned_meta.json"));

        let job = AlignmentJob {
            output_metadata: Some(PathBuf::from("/elsewhere/m.json")),
            ..job
        };
        assert_eq!(job.metadata_path(), PathBuf::from("/elsewhere/m.json"));
    }

    #[test]
    fn test_recording_path_resolution() {
        let dir = temp_dir("resolve");
        let meta = dir.join("camera_meta.json");
        std::fs::write(dir.join("cam.mp4"), b"").unwrap();

        // Relative to the metadata directory.
        assert_eq!(resolve_recording_path(&meta, "cam.mp4").unwrap(), dir.join("cam.mp4"));
        // Stale absolute path falls back to the same name beside the metadata.
        assert_eq!(
            resolve_recording_path(&meta, "/recordings/old/cam.mp4").unwrap(),
            dir.join("cam.mp4")
        );

        match resolve_recording_path(&meta, "/recordings/old/missing.mp4").unwrap_err() {
            AlignError::RecordingNotFound { declared, fallback } => {
                assert_eq!(declared, PathBuf::from("/recordings/old/missing.mp4"));
                assert_eq!(fallback, dir.join("missing.mp4"));
            }
            other => panic!("unexpected error: {other}"),
        }

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_epoch_time_is_named() {
        let dir = temp_dir("missing_epoch");
        let actions = dir.join("trace.json");
        std::fs::write(&actions, r#"[{"epochTime": 1.0}, {"renderTime": 5.0}]"#).unwrap();
        let job = AlignmentJob::new(&actions, dir.join("camera_meta.json"), dir.join("out.mp4"));

        match align_episode(&job, &AlignOptions::default()).unwrap_err() {
            AlignError::MissingEpochTime { index, .. } => assert_eq!(index, 1),
            other => panic!("unexpected error: {other}"),
        }
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_camera_field_is_named() {
        let dir = temp_dir("missing_field");
        let actions = dir.join("trace.json");
        std::fs::write(&actions, r#"[{"epochTime": 1.0}]"#).unwrap();
        let meta = dir.join("camera_meta.json");
        std::fs::write(&meta, r#"{"fps": 30, "start_epoch_seconds": 1.0}"#).unwrap();
        let job = AlignmentJob::new(&actions, &meta, dir.join("out.mp4"));

        let err = align_episode(&job, &AlignOptions::default()).unwrap_err();
        match &err {
            AlignError::Model(ModelError::MissingField { field, .. }) => {
                assert_eq!(field, "recording_path")
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(TickcapError::from(err), TickcapError::Config { .. }));
        assert!(!dir.join("out.mp4").exists());
        std::fs::remove_dir_all(&dir).ok();
    }

    /// Stand-in ffprobe that reports stream-relative timestamps.
    #[cfg(unix)]
    fn relative_clock_ffprobe(dir: &Path) -> String {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("ffprobe_relative.sh");
        std::fs::write(&script, "#!/bin/sh\nprintf '0.0\\n0.1\\n0.2\\n'\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script.to_string_lossy().into_owned()
    }

    #[cfg(unix)]
    #[test]
    fn test_relative_timestamps_fail_alignment() {
        let dir = temp_dir("not_wallclock");
        let actions = dir.join("trace.json");
        std::fs::write(&actions, r#"[{"epochTime": 1700000000.0}]"#).unwrap();
        let meta = dir.join("camera_meta.json");
        std::fs::write(
            &meta,
            r#"{"fps": 10, "start_epoch_seconds": 1700000000.0, "recording_path": "cam.mp4"}"#,
        )
        .unwrap();
        std::fs::write(dir.join("cam.mp4"), b"").unwrap();

        let options = AlignOptions {
            tools: MediaTools::new("ffmpeg", relative_clock_ffprobe(&dir)),
            ..AlignOptions::default()
        };
        let job = AlignmentJob::new(&actions, &meta, dir.join("out.mp4"));

        match align_episode(&job, &options).unwrap_err() {
            AlignError::NotWallclock {
                recording,
                first_timestamp,
            } => {
                assert_eq!(recording, dir.join("cam.mp4"));
                assert_eq!(first_timestamp, 0.0);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!dir.join("out.mp4").exists());
        assert!(!job.metadata_path().exists());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_delay_shifts_action_times() {
        let actions = vec![
            tickcap_episode_model::TimedAction {
                epoch_time_sec: Some(10.0),
                render_time_ms: None,
                relative_time_ms: None,
            },
            tickcap_episode_model::TimedAction {
                epoch_time_sec: Some(10.5),
                render_time_ms: None,
                relative_time_ms: None,
            },
        ];
        let times = action_times(Path::new("t.json"), &actions, 0.15).unwrap();
        assert!((times[0] - 10.15).abs() < 1e-12);
        assert!((times[1] - 10.65).abs() < 1e-12);

        let reversed: Vec<_> = actions.into_iter().rev().collect();
        assert!(matches!(
            action_times(Path::new("t.json"), &reversed, 0.0).unwrap_err(),
            AlignError::UnorderedActions { index: 1, .. }
        ));
    }
}
