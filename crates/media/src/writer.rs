//! Encoding frames into a video.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread::JoinHandle;

use crate::error::MediaError;
use crate::process::{drain_stderr, failure, join_stderr, spawn};
use crate::{Frame, MediaTools};

/// Ordered consumer of frames. All frames must share the first frame's
/// dimensions.
pub trait FrameSink {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), MediaError>;

    /// Flush and close the output. Returns the number of frames written.
    fn finish(&mut self) -> Result<usize, MediaError>;
}

struct Encoder {
    child: Child,
    stdin: ChildStdin,
    stderr_task: Option<JoinHandle<String>>,
}

/// [`FrameSink`] that pipes raw RGB frames into an ffmpeg H.264 encoder.
///
/// The encoder process starts with the first frame, which fixes the output
/// dimensions. Dropping an unfinished writer kills the encoder and removes
/// the partial output.
pub struct FfmpegFrameWriter {
    ffmpeg: String,
    output: PathBuf,
    fps: f64,
    dimensions: Option<(u32, u32)>,
    encoder: Option<Encoder>,
    frames_written: usize,
    finished: bool,
}

impl FfmpegFrameWriter {
    pub fn new(tools: &MediaTools, output: &Path, fps: f64) -> Self {
        Self {
            ffmpeg: tools.ffmpeg.clone(),
            output: output.to_path_buf(),
            fps,
            dimensions: None,
            encoder: None,
            frames_written: 0,
            finished: false,
        }
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn frames_written(&self) -> usize {
        self.frames_written
    }

    /// Stop encoding and delete whatever was written.
    pub fn abort(&mut self) {
        self.finished = true;
        if let Some(mut encoder) = self.encoder.take() {
            let _ = encoder.child.kill();
            let _ = encoder.child.wait();
        }
        if self.output.exists() {
            if let Err(e) = std::fs::remove_file(&self.output) {
                tracing::warn!(path = %self.output.display(), "Failed to remove partial output: {e}");
            }
        }
    }

    fn start(&mut self, width: u32, height: u32) -> Result<(), MediaError> {
        if let Some(parent) = self.output.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(["-y", "-v", "error", "-f", "rawvideo", "-pix_fmt", "rgb24", "-s"])
            .arg(format!("{width}x{height}"))
            .arg("-r")
            .arg(format!("{:.6}", self.fps))
            .args(["-i", "-", "-an"]);
        if width % 2 != 0 || height % 2 != 0 {
            cmd.args(["-vf", "pad=ceil(iw/2)*2:ceil(ih/2)*2"]);
        }
        cmd.args(["-c:v", "libx264", "-pix_fmt", "yuv420p", "-preset", "medium", "-crf", "18"])
            .arg(&self.output)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut child = spawn(&mut cmd, &self.ffmpeg)?;
        let stderr_task = drain_stderr(&mut child, &self.ffmpeg);
        let stdin = child.stdin.take().ok_or_else(|| MediaError::BadOutput {
            tool: self.ffmpeg.clone(),
            message: "failed to open encoder stdin".to_string(),
        })?;

        tracing::debug!(
            output = %self.output.display(),
            width,
            height,
            fps = self.fps,
            "Started encoder"
        );
        self.dimensions = Some((width, height));
        self.encoder = Some(Encoder {
            child,
            stdin,
            stderr_task,
        });
        Ok(())
    }
}

impl FrameSink for FfmpegFrameWriter {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), MediaError> {
        let got = frame.dimensions();
        match self.dimensions {
            None => self.start(got.0, got.1)?,
            Some(expected) if expected != got => {
                return Err(MediaError::FrameShape { expected, got });
            }
            Some(_) => {}
        }

        let Some(encoder) = self.encoder.as_mut() else {
            return Err(MediaError::BadOutput {
                tool: self.ffmpeg.clone(),
                message: "encoder is not running".to_string(),
            });
        };
        encoder.stdin.write_all(frame.as_raw())?;
        self.frames_written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<usize, MediaError> {
        self.finished = true;
        let Some(encoder) = self.encoder.take() else {
            return Err(MediaError::EmptyOutput {
                path: self.output.clone(),
            });
        };

        let Encoder {
            mut child,
            stdin,
            stderr_task,
        } = encoder;
        drop(stdin);
        let status = child.wait()?;
        let stderr = join_stderr(stderr_task);
        if !status.success() {
            let _ = std::fs::remove_file(&self.output);
            return Err(failure(&self.ffmpeg, status, &stderr));
        }

        tracing::debug!(
            output = %self.output.display(),
            frames = self.frames_written,
            "Encoder finished"
        );
        Ok(self.frames_written)
    }
}

impl Drop for FfmpegFrameWriter {
    fn drop(&mut self) {
        if !self.finished {
            self.abort();
        }
    }
}

/// Encode `frames` into `output` at `fps`.
pub fn encode_frames(
    tools: &MediaTools,
    output: &Path,
    fps: f64,
    frames: &[Frame],
) -> Result<usize, MediaError> {
    let mut writer = FfmpegFrameWriter::new(tools, output, fps);
    for frame in frames {
        if let Err(e) = writer.write_frame(frame) {
            writer.abort();
            return Err(e);
        }
    }
    writer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_without_frames_is_empty_output() {
        let tools = MediaTools::default();
        let path = std::env::temp_dir().join("tickcap_test_writer_empty.mp4");
        let mut writer = FfmpegFrameWriter::new(&tools, &path, 20.0);
        assert!(matches!(
            writer.finish().unwrap_err(),
            MediaError::EmptyOutput { .. }
        ));
        assert!(!path.exists());
    }

    #[test]
    fn test_missing_encoder_is_reported() {
        let tools = MediaTools::new("tickcap-no-such-ffmpeg", "ffprobe");
        let path = std::env::temp_dir().join("tickcap_test_writer_missing.mp4");
        let frames = vec![Frame::new(4, 4)];
        let err = encode_frames(&tools, &path, 20.0, &frames).unwrap_err();
        assert!(matches!(err, MediaError::ToolNotFound { .. }));
        assert!(!path.exists());
    }
}
