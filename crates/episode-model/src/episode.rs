//! Episode header, file naming, and metadata.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// First frame on every capture connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeHeader {
    pub episode: i64,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Metadata written next to every episode trace (`<name>_meta.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeMeta {
    /// Epoch seconds of the first tick's render time.
    pub episode_start_epoch: f64,

    /// Render time of the first tick (ms).
    pub first_render_time_ms: f64,

    /// Whether the client's render clock was already epoch milliseconds.
    pub render_time_is_epoch: bool,

    /// Number of action records in the trace.
    #[serde(alias = "frame_count")]
    pub frames: usize,

    /// Frame rate the episode video was written at.
    pub video_fps: f64,

    #[serde(default)]
    pub episode_id: i64,

    /// Tick rate measured from render times, before capping.
    #[serde(default)]
    pub measured_fps: Option<f64>,

    /// Frames actually written to the episode video; `None` when video
    /// capture was disabled or no video was produced.
    #[serde(default)]
    pub video_frames: Option<usize>,

    /// False when the connection ended without the zero-length terminator.
    #[serde(default = "default_true")]
    pub ended_cleanly: bool,
}

fn default_true() -> bool {
    true
}

/// Deterministic base name for an episode's files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeName {
    stem: String,
}

impl EpisodeName {
    /// Timestamp format used in episode names.
    pub const TIMESTAMP_FORMAT: &'static str = "%Y%m%d_%H%M%S";

    /// `{timestamp}_{episode:06}_{bot_name}_instance_{instance_id:03}`
    pub fn new(timestamp: &str, episode_id: i64, bot_name: &str, instance_id: u32) -> Self {
        Self {
            stem: format!("{timestamp}_{episode_id:06}_{bot_name}_instance_{instance_id:03}"),
        }
    }

    /// Name stamped with the current local time.
    pub fn now(episode_id: i64, bot_name: &str, instance_id: u32) -> Self {
        let timestamp = chrono::Local::now()
            .format(Self::TIMESTAMP_FORMAT)
            .to_string();
        Self::new(&timestamp, episode_id, bot_name, instance_id)
    }

    pub fn stem(&self) -> &str {
        &self.stem
    }

    /// Same name with `_{n}` appended, for names already taken on disk.
    pub fn with_suffix(&self, n: u32) -> Self {
        Self {
            stem: format!("{}_{n}", self.stem),
        }
    }

    /// `<dir>/<name>.json`
    pub fn trace_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.json", self.stem))
    }

    /// `<dir>/<name>.mp4`
    pub fn video_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.mp4", self.stem))
    }

    /// `<dir>/<name>_meta.json`
    pub fn meta_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}_meta.json", self.stem))
    }
}

impl std::fmt::Display for EpisodeName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.stem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_episode_name_format() {
        let name = EpisodeName::new("20260101_120000", 42, "alpha", 3);
        assert_eq!(name.stem(), "20260101_120000_000042_alpha_instance_003");

        let dir = Path::new("/data/out");
        assert_eq!(
            name.trace_path(dir),
            PathBuf::from("/data/out/20260101_120000_000042_alpha_instance_003.json")
        );
        assert_eq!(
            name.video_path(dir),
            PathBuf::from("/data/out/20260101_120000_000042_alpha_instance_003.mp4")
        );
        assert_eq!(
            name.meta_path(dir),
            PathBuf::from("/data/out/20260101_120000_000042_alpha_instance_003_meta.json")
        );
    }

    #[test]
    fn test_suffixed_name_keeps_meta_convention() {
        let name = EpisodeName::new("20260101_120000", 42, "alpha", 3).with_suffix(2);
        assert_eq!(name.stem(), "20260101_120000_000042_alpha_instance_003_2");
        assert_eq!(
            name.meta_path(Path::new("/d")),
            PathBuf::from("/d/20260101_120000_000042_alpha_instance_003_2_meta.json")
        );
    }

    #[test]
    fn test_episode_name_now_has_timestamp_prefix() {
        let name = EpisodeName::now(1, "bot", 0);
        let (timestamp, rest) = name.stem().split_at(15);
        assert!(chrono::NaiveDateTime::parse_from_str(timestamp, EpisodeName::TIMESTAMP_FORMAT).is_ok());
        assert_eq!(rest, "_000001_bot_instance_000");
    }

    #[test]
    fn test_header_requires_episode() {
        let header: EpisodeHeader = serde_json::from_str(r#"{"episode": 5, "seed": 1}"#).unwrap();
        assert_eq!(header.episode, 5);
        assert!(header.extra.contains_key("seed"));
        assert!(serde_json::from_str::<EpisodeHeader>(r#"{"seed": 1}"#).is_err());
        assert!(serde_json::from_str::<EpisodeHeader>(r#"{"episode": "five"}"#).is_err());
    }

    #[test]
    fn test_meta_reads_legacy_files() {
        let raw = r#"{
            "episode_start_epoch": 1700000000.5,
            "first_render_time_ms": 10.0,
            "render_time_is_epoch": false,
            "frame_count": 12,
            "video_fps": 20
        }"#;
        let meta: EpisodeMeta = serde_json::from_str(raw).unwrap();
        assert_eq!(meta.frames, 12);
        assert_eq!(meta.episode_id, 0);
        assert_eq!(meta.measured_fps, None);
        assert!(meta.ended_cleanly);
    }

    #[test]
    fn test_meta_writes_frames_key() {
        let meta = EpisodeMeta {
            episode_start_epoch: 1.0,
            first_render_time_ms: 0.0,
            render_time_is_epoch: false,
            frames: 1,
            video_fps: 20.0,
            episode_id: 9,
            measured_fps: None,
            video_frames: None,
            ended_cleanly: true,
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["frames"], serde_json::json!(1));
        assert!(json.get("frame_count").is_none());
        assert_eq!(json["episode_id"], serde_json::json!(9));
    }
}
