//! Decoding frames out of a video.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::time::Duration;

use crate::error::MediaError;
use crate::probe::{probe_frame_count, probe_video_dimensions};
use crate::process::{drain_stderr, spawn};
use crate::{Frame, MediaTools};

/// Random-access source of decoded frames in presentation order.
pub trait FrameSource {
    /// Number of frames in the source.
    fn total_frames(&self) -> usize;

    /// Reposition so the next call to [`FrameSource::next_frame`] yields
    /// frame `index`.
    fn seek(&mut self, index: usize) -> Result<(), MediaError>;

    /// Decode the next frame, or `None` past the end.
    fn next_frame(&mut self) -> Result<Option<Frame>, MediaError>;
}

/// [`FrameSource`] backed by an ffmpeg process emitting raw RGB frames.
pub struct FfmpegFrameReader {
    tools: MediaTools,
    path: PathBuf,
    width: u32,
    height: u32,
    total_frames: usize,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
}

impl FfmpegFrameReader {
    /// Probe `path` and start decoding from its first frame.
    pub fn open(tools: &MediaTools, path: &Path, probe_timeout: Duration) -> Result<Self, MediaError> {
        let (width, height) = probe_video_dimensions(tools, path, probe_timeout)?;
        let total_frames = probe_frame_count(tools, path, probe_timeout)?;
        let mut reader = Self {
            tools: tools.clone(),
            path: path.to_path_buf(),
            width,
            height,
            total_frames,
            child: None,
            stdout: None,
        };
        reader.start_at(0)?;
        tracing::debug!(
            path = %path.display(),
            width,
            height,
            total_frames,
            "Opened video for decoding"
        );
        Ok(reader)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn frame_bytes(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    fn start_at(&mut self, index: usize) -> Result<(), MediaError> {
        self.stop();

        let mut cmd = Command::new(&self.tools.ffmpeg);
        cmd.args(["-v", "error", "-nostdin", "-i"])
            .arg(&self.path)
            .args(["-map", "0:v:0"]);
        if index > 0 {
            cmd.arg("-vf").arg(format!("select=gte(n\\,{index})"));
        }
        cmd.args([
            "-fps_mode",
            "passthrough",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgb24",
            "-",
        ])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

        let mut child = spawn(&mut cmd, &self.tools.ffmpeg)?;
        // Decoder diagnostics are not needed; keep the pipe from filling.
        let _ = drain_stderr(&mut child, &self.tools.ffmpeg);
        self.stdout = child.stdout.take();
        self.child = Some(child);
        Ok(())
    }

    fn stop(&mut self) {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl FrameSource for FfmpegFrameReader {
    fn total_frames(&self) -> usize {
        self.total_frames
    }

    fn seek(&mut self, index: usize) -> Result<(), MediaError> {
        tracing::trace!(index, "Restarting decoder");
        self.start_at(index)
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, MediaError> {
        let frame_bytes = self.frame_bytes();
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(None);
        };

        let mut buf = vec![0u8; frame_bytes];
        let mut filled = 0;
        while filled < frame_bytes {
            let n = stdout.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        if filled == 0 {
            return Ok(None);
        }
        if filled < frame_bytes {
            return Err(MediaError::BadOutput {
                tool: self.tools.ffmpeg.clone(),
                message: format!("truncated frame: {filled} of {frame_bytes} bytes"),
            });
        }

        Frame::from_raw(self.width, self.height, buf).map(Some).ok_or_else(|| {
            MediaError::BadOutput {
                tool: self.tools.ffmpeg.clone(),
                message: "frame buffer does not match dimensions".to_string(),
            }
        })
    }
}

impl Drop for FfmpegFrameReader {
    fn drop(&mut self) {
        self.stop();
    }
}
