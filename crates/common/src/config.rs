//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{TickcapError, TickcapResult};

/// Global application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Capture server settings.
    pub capture: CaptureConfig,

    /// Offline alignment settings.
    pub align: AlignConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Capture server parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Interface to listen on.
    pub host: String,

    /// TCP port to listen on.
    pub port: u16,

    /// Bot name used in episode file names.
    pub bot_name: String,

    /// Instance id used in episode file names.
    pub instance_id: u32,

    /// Directory episode files are written to.
    pub output_dir: PathBuf,

    /// Whether each position frame is followed by an encoded image frame.
    pub video_capture: bool,

    /// Capacity of the per-connection tick queue.
    pub queue_capacity: usize,

    /// Timeout for a single socket read, in seconds. `None` disables it.
    pub read_timeout_secs: Option<f64>,

    /// How long the episode worker waits on an empty queue before logging
    /// an idle tick and polling again.
    pub worker_poll_secs: f64,

    /// Upper bound on the fps of the written episode video.
    pub max_video_fps: f64,

    /// ffmpeg executable used for episode video encoding.
    pub ffmpeg_path: String,
}

/// Offline alignment parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignConfig {
    /// Unconsumed frames closer than this to the recording start or end are
    /// expected and not reported.
    pub boundary_grace_secs: f64,

    /// A frame-time gap larger than `gap_factor / fps` counts as dropped frames.
    pub gap_factor: f64,

    /// Seconds added to every action time before matching.
    pub video_delay_secs: f64,

    /// Timeout for a single ffprobe invocation.
    pub probe_timeout_secs: f64,

    /// ffmpeg executable.
    pub ffmpeg_path: String,

    /// ffprobe executable.
    pub ffprobe_path: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "tickcap_capture_server=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8089,
            bot_name: "bot".to_string(),
            instance_id: 0,
            output_dir: PathBuf::from("output"),
            video_capture: true,
            queue_capacity: 4096,
            read_timeout_secs: Some(60.0),
            worker_poll_secs: 5.0,
            max_video_fps: 20.0,
            ffmpeg_path: "ffmpeg".to_string(),
        }
    }
}

impl Default for AlignConfig {
    fn default() -> Self {
        Self {
            boundary_grace_secs: 10.0,
            gap_factor: 1.8,
            video_delay_secs: 0.0,
            probe_timeout_secs: 60.0,
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl CaptureConfig {
    /// `host:port` string for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Per-read socket timeout. Zero, negative, or values past
    /// [`MAX_TIMEOUT_SECS`] (including infinity) disable it.
    pub fn read_timeout(&self) -> Option<std::time::Duration> {
        self.read_timeout_secs
            .filter(|secs| *secs > 0.0 && *secs <= MAX_TIMEOUT_SECS)
            .map(bounded_duration)
    }

    pub fn worker_poll_interval(&self) -> std::time::Duration {
        bounded_duration(self.worker_poll_secs)
    }
}

impl AlignConfig {
    pub fn probe_timeout(&self) -> std::time::Duration {
        bounded_duration(self.probe_timeout_secs)
    }
}

/// Longest finite interval honored from configuration.
pub const MAX_TIMEOUT_SECS: f64 = 86_400.0 * 365.0;

/// Seconds to a `Duration` clamped to `[1ms, MAX_TIMEOUT_SECS]`. NaN maps to
/// the maximum.
fn bounded_duration(secs: f64) -> std::time::Duration {
    std::time::Duration::try_from_secs_f64(secs.clamp(0.001, MAX_TIMEOUT_SECS))
        .unwrap_or(std::time::Duration::from_secs(MAX_TIMEOUT_SECS as u64))
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match Self::load_from(&config_path) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!("Failed to load config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Load config from an explicit file. Errors are returned, not swallowed.
    pub fn load_from(path: &Path) -> TickcapResult<Self> {
        if !path.exists() {
            return Err(TickcapError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| TickcapError::config(format!("Invalid config {}: {e}", path.display())))
    }

}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("tickcap").join("config.json")
}
