//! Media error type.

use std::path::PathBuf;

use tickcap_common::error::TickcapError;

/// Errors from running or talking to ffmpeg/ffprobe.
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("{tool} not found")]
    ToolNotFound { tool: String },

    #[error("{tool} timed out after {secs:.1}s")]
    Timeout { tool: String, secs: f64 },

    #[error("{tool} failed ({status}): {stderr}")]
    ProcessFailed {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("Unexpected {tool} output: {message}")]
    BadOutput { tool: String, message: String },

    #[error("Frame is {}x{}, expected {}x{}", got.0, got.1, expected.0, expected.1)]
    FrameShape {
        expected: (u32, u32),
        got: (u32, u32),
    },

    #[error("No frames were written to {path}")]
    EmptyOutput { path: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<MediaError> for TickcapError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::Io(e) => TickcapError::Io(e),
            MediaError::ToolNotFound { tool } => {
                TickcapError::unsupported(format!("{tool} is not installed or not in PATH"))
            }
            other => TickcapError::media(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_shape_message() {
        let err = MediaError::FrameShape {
            expected: (640, 360),
            got: (320, 180),
        };
        assert_eq!(err.to_string(), "Frame is 320x180, expected 640x360");
    }

    #[test]
    fn test_conversion_to_tickcap_error() {
        let err: TickcapError = MediaError::ToolNotFound {
            tool: "ffprobe".to_string(),
        }
        .into();
        assert!(matches!(err, TickcapError::Unsupported { .. }));

        let err: TickcapError = MediaError::Timeout {
            tool: "ffprobe".to_string(),
            secs: 1.0,
        }
        .into();
        assert!(matches!(err, TickcapError::Media { .. }));
    }
}
