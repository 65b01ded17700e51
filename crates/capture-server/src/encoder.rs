//! Episode video encoding backends.

use std::path::Path;

use tickcap_common::error::TickcapResult;
use tickcap_media::writer::encode_frames;
use tickcap_media::{Frame, MediaTools};

/// Writes an episode's buffered frames to a video file.
pub trait VideoEncoder: Send + Sync {
    /// Encode `frames` at `fps`. Returns the number of frames written.
    fn encode(&self, output: &Path, fps: f64, frames: &[Frame]) -> TickcapResult<usize>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// H.264 encoding through an ffmpeg subprocess.
#[derive(Debug, Clone)]
pub struct FfmpegVideoEncoder {
    tools: MediaTools,
}

impl FfmpegVideoEncoder {
    pub fn new(ffmpeg_path: impl Into<String>) -> Self {
        Self {
            tools: MediaTools {
                ffmpeg: ffmpeg_path.into(),
                ..MediaTools::default()
            },
        }
    }
}

impl VideoEncoder for FfmpegVideoEncoder {
    fn encode(&self, output: &Path, fps: f64, frames: &[Frame]) -> TickcapResult<usize> {
        Ok(encode_frames(&self.tools, output, fps, frames)?)
    }

    fn name(&self) -> &str {
        "ffmpeg"
    }
}
