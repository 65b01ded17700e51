//! Side-by-side comparison videos.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use serde::Serialize;

use crate::error::MediaError;
use crate::probe::{probe_fps, probe_frame_count, probe_video_dimensions};
use crate::process::{drain_stderr, failure, join_stderr, spawn};
use crate::MediaTools;

/// Result of building a comparison video.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonSummary {
    pub output: PathBuf,
    pub frames: usize,
    pub height: u32,
    pub left_fps: f64,
    pub right_fps: f64,
}

/// Filter graph scaling both inputs to `height` and stacking them
/// horizontally. The shorter input ends the output.
pub fn side_by_side_filter(height: u32) -> String {
    format!(
        "[0:v]scale=-2:{height}[left];[1:v]scale=-2:{height}[right];\
         [left][right]hstack=inputs=2:shortest=1[out]"
    )
}

/// Render `left` and `right` next to each other into `output`, scaled to the
/// right video's height.
pub fn build_side_by_side(
    tools: &MediaTools,
    left: &Path,
    right: &Path,
    output: &Path,
    probe_timeout: Duration,
) -> Result<ComparisonSummary, MediaError> {
    let (_, height) = probe_video_dimensions(tools, right, probe_timeout)
        .or_else(|_| probe_video_dimensions(tools, left, probe_timeout))?;
    // Even height keeps yuv420p happy.
    let height = height + height % 2;
    let left_fps = probe_fps(tools, left, probe_timeout)?;
    let right_fps = probe_fps(tools, right, probe_timeout)?;

    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut cmd = Command::new(&tools.ffmpeg);
    cmd.args(["-y", "-v", "error", "-i"])
        .arg(left)
        .arg("-i")
        .arg(right)
        .arg("-filter_complex")
        .arg(side_by_side_filter(height))
        .args([
            "-map", "[out]", "-an", "-c:v", "libx264", "-pix_fmt", "yuv420p", "-preset",
            "medium", "-crf", "20",
        ])
        .arg(output)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

    tracing::info!(
        left = %left.display(),
        right = %right.display(),
        output = %output.display(),
        height,
        "Building comparison video"
    );

    let mut child = spawn(&mut cmd, &tools.ffmpeg)?;
    let stderr_task = drain_stderr(&mut child, &tools.ffmpeg);
    let status = child.wait()?;
    let stderr = join_stderr(stderr_task);
    if !status.success() {
        let _ = std::fs::remove_file(output);
        return Err(failure(&tools.ffmpeg, status, &stderr));
    }

    let frames = probe_frame_count(tools, output, probe_timeout).unwrap_or(0);
    if frames == 0 {
        let _ = std::fs::remove_file(output);
        return Err(MediaError::EmptyOutput {
            path: output.to_path_buf(),
        });
    }

    Ok(ComparisonSummary {
        output: output.to_path_buf(),
        frames,
        height,
        left_fps,
        right_fps,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_scales_both_inputs() {
        let filter = side_by_side_filter(720);
        assert!(filter.contains("[0:v]scale=-2:720[left]"));
        assert!(filter.contains("[1:v]scale=-2:720[right]"));
        assert!(filter.ends_with("hstack=inputs=2:shortest=1[out]"));
    }
}
