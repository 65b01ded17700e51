//! ffprobe queries: per-frame timestamps, dimensions, frame counts.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use tickcap_common::clock::looks_like_wallclock_secs;
use tickcap_common::error::TickcapError;

use crate::error::MediaError;
use crate::process::{failure, run_with_timeout};
use crate::MediaTools;

/// Timestamp extraction failed; alignment cannot proceed without it.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("Frame timestamp extraction unavailable: {reason}")]
    Unavailable { reason: String },
}

impl From<ProbeError> for TickcapError {
    fn from(err: ProbeError) -> Self {
        TickcapError::media(err.to_string())
    }
}

/// Presentation timestamps of every packet in the first video stream,
/// sorted ascending.
pub fn extract_frame_timestamps(
    tools: &MediaTools,
    video: &Path,
    timeout: Duration,
) -> Result<Vec<f64>, ProbeError> {
    let mut cmd = Command::new(&tools.ffprobe);
    cmd.args([
        "-v",
        "error",
        "-select_streams",
        "v:0",
        "-show_entries",
        "packet=pts_time",
        "-of",
        "csv=p=0",
    ])
    .arg(video);

    let unavailable = |reason: String| ProbeError::Unavailable { reason };

    let output = run_with_timeout(cmd, &tools.ffprobe, timeout)
        .map_err(|e| unavailable(e.to_string()))?;
    if !output.status.success() {
        return Err(unavailable(
            failure(&tools.ffprobe, output.status, &output.stderr).to_string(),
        ));
    }

    let raw = String::from_utf8_lossy(&output.stdout);
    let timestamps = parse_pts_lines(&raw);
    if timestamps.is_empty() {
        return Err(unavailable(format!(
            "no frame timestamps in {}",
            video.display()
        )));
    }

    tracing::debug!(
        video = %video.display(),
        frames = timestamps.len(),
        first = timestamps[0],
        "Extracted frame timestamps"
    );
    Ok(timestamps)
}

/// Parse ffprobe `pts_time` lines, skipping `N/A` and blanks, and sort the
/// result into presentation order.
pub fn parse_pts_lines(raw: &str) -> Vec<f64> {
    let mut timestamps: Vec<f64> = raw
        .lines()
        .map(|line| line.trim().trim_end_matches(','))
        .filter(|line| !line.is_empty() && *line != "N/A")
        .filter_map(|line| line.parse::<f64>().ok())
        .filter(|t| t.is_finite())
        .collect();
    timestamps.sort_by(f64::total_cmp);
    timestamps
}

/// Whether timestamps are absolute epoch seconds. An explicit flag from the
/// recorder wins; otherwise the first timestamp's magnitude decides.
pub fn timestamps_are_wallclock(timestamps: &[f64], explicit: Option<bool>) -> bool {
    match explicit {
        Some(flag) => flag,
        None => timestamps
            .first()
            .is_some_and(|first| looks_like_wallclock_secs(*first)),
    }
}

/// Width and height of the first video stream.
pub fn probe_video_dimensions(
    tools: &MediaTools,
    video: &Path,
    timeout: Duration,
) -> Result<(u32, u32), MediaError> {
    let mut cmd = Command::new(&tools.ffprobe);
    cmd.args([
        "-v",
        "error",
        "-select_streams",
        "v:0",
        "-show_entries",
        "stream=width,height",
        "-of",
        "csv=p=0:s=x",
    ])
    .arg(video);

    let output = run_with_timeout(cmd, &tools.ffprobe, timeout)?;
    if !output.status.success() {
        return Err(failure(&tools.ffprobe, output.status, &output.stderr));
    }
    let raw = String::from_utf8_lossy(&output.stdout);
    parse_dimensions(&raw).ok_or_else(|| MediaError::BadOutput {
        tool: tools.ffprobe.clone(),
        message: format!("no video dimensions in {:?}", raw.trim()),
    })
}

fn parse_dimensions(raw: &str) -> Option<(u32, u32)> {
    let line = raw.lines().next()?.trim();
    let (w, h) = line.split_once('x')?;
    let width = w.trim().parse::<u32>().ok()?;
    let height = h.trim().trim_end_matches('x').parse::<u32>().ok()?;
    if width == 0 || height == 0 {
        return None;
    }
    Some((width, height))
}

/// Number of packets in the first video stream.
pub fn probe_frame_count(
    tools: &MediaTools,
    video: &Path,
    timeout: Duration,
) -> Result<usize, MediaError> {
    let mut cmd = Command::new(&tools.ffprobe);
    cmd.args([
        "-v",
        "error",
        "-select_streams",
        "v:0",
        "-count_packets",
        "-show_entries",
        "stream=nb_read_packets",
        "-of",
        "csv=p=0",
    ])
    .arg(video);

    let output = run_with_timeout(cmd, &tools.ffprobe, timeout)?;
    if !output.status.success() {
        return Err(failure(&tools.ffprobe, output.status, &output.stderr));
    }
    let raw = String::from_utf8_lossy(&output.stdout);
    raw.lines()
        .next()
        .and_then(|line| line.trim().trim_end_matches(',').parse::<usize>().ok())
        .ok_or_else(|| MediaError::BadOutput {
            tool: tools.ffprobe.clone(),
            message: format!("no packet count in {:?}", raw.trim()),
        })
}

/// Average frame rate of the first video stream.
pub fn probe_fps(tools: &MediaTools, video: &Path, timeout: Duration) -> Result<f64, MediaError> {
    let mut cmd = Command::new(&tools.ffprobe);
    cmd.args([
        "-v",
        "error",
        "-select_streams",
        "v:0",
        "-show_entries",
        "stream=avg_frame_rate",
        "-of",
        "csv=p=0",
    ])
    .arg(video);

    let output = run_with_timeout(cmd, &tools.ffprobe, timeout)?;
    if !output.status.success() {
        return Err(failure(&tools.ffprobe, output.status, &output.stderr));
    }
    let raw = String::from_utf8_lossy(&output.stdout);
    raw.lines()
        .next()
        .and_then(|line| parse_rational(line.trim().trim_end_matches(',')))
        .ok_or_else(|| MediaError::BadOutput {
            tool: tools.ffprobe.clone(),
            message: format!("no frame rate in {:?}", raw.trim()),
        })
}

/// Parse `30000/1001` or `25` into a positive rate.
fn parse_rational(value: &str) -> Option<f64> {
    let rate = match value.split_once('/') {
        Some((num, den)) => {
            let num = num.parse::<f64>().ok()?;
            let den = den.parse::<f64>().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => value.parse::<f64>().ok()?,
    };
    (rate.is_finite() && rate > 0.0).then_some(rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pts_skips_na_and_sorts() {
        let raw = "1700000000.100000\nN/A\n\n1700000000.050000\n1700000000.150000,\n";
        let ts = parse_pts_lines(raw);
        assert_eq!(ts, vec![1_700_000_000.05, 1_700_000_000.1, 1_700_000_000.15]);
    }

    #[test]
    fn test_explicit_wallclock_flag_wins() {
        let small = [0.0, 0.033, 0.066];
        let large = [1_700_000_000.0];
        assert!(!timestamps_are_wallclock(&small, None));
        assert!(timestamps_are_wallclock(&small, Some(true)));
        assert!(timestamps_are_wallclock(&large, None));
        assert!(!timestamps_are_wallclock(&large, Some(false)));
        assert!(!timestamps_are_wallclock(&[], None));
    }

    #[test]
    fn test_parse_dimensions() {
        assert_eq!(parse_dimensions("1280x720\n"), Some((1280, 720)));
        assert_eq!(parse_dimensions("1280x720x\n"), Some((1280, 720)));
        assert_eq!(parse_dimensions("0x720"), None);
        assert_eq!(parse_dimensions(""), None);
    }

    #[test]
    fn test_parse_rational() {
        assert_eq!(parse_rational("30/1"), Some(30.0));
        assert!((parse_rational("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert_eq!(parse_rational("0/0"), None);
        assert_eq!(parse_rational("20"), Some(20.0));
    }

    #[test]
    fn test_missing_ffprobe_is_unavailable() {
        let tools = MediaTools::new("ffmpeg", "tickcap-no-such-ffprobe");
        let err = extract_frame_timestamps(&tools, Path::new("x.mp4"), Duration::from_secs(1))
            .unwrap_err();
        let ProbeError::Unavailable { reason } = err;
        assert!(reason.contains("not found"));
    }
}
