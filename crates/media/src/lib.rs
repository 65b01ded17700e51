//! tickcap Media
//!
//! Everything that touches encoded video goes through external `ffmpeg` and
//! `ffprobe` processes:
//!
//! ```text
//! recording.mp4 ──► ffprobe ──► sorted PTS (epoch secs) ──► matcher
//!       │
//!       └────────► ffmpeg (rawvideo rgb24) ──► FrameSource
//!                                                 │  reencode(indices)
//!                                                 ▼
//!                  ffmpeg (libx264) ◄────────── FrameSink ──► aligned.mp4
//! ```
//!
//! The [`reader::FrameSource`] and [`writer::FrameSink`] traits keep the
//! re-encoding logic independent of the ffmpeg processes behind them.

pub mod compare;
pub mod error;
pub mod probe;
pub mod process;
pub mod reader;
pub mod reencode;
pub mod writer;

pub use error::*;

/// A decoded video frame.
pub type Frame = image::RgbImage;

/// Locations of the external tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTools {
    pub ffmpeg: String,
    pub ffprobe: String,
}

impl Default for MediaTools {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
        }
    }
}

impl MediaTools {
    pub fn new(ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    /// Whether both tools can be found.
    pub fn available(&self) -> bool {
        process::command_exists(&self.ffmpeg) && process::command_exists(&self.ffprobe)
    }
}
