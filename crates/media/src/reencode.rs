//! Frame re-encoding: build a video whose i-th frame is source frame
//! `indices[i]`.
//!
//! Index sequences from the matcher are non-decreasing with long runs of
//! repeats and consecutive frames, so the re-encoder keeps the last decoded
//! frame, decodes forward when the next index follows it, and only seeks on
//! a jump.

use std::path::Path;
use std::time::Duration;

use tickcap_common::error::TickcapError;
use tickcap_episode_model::ReencodeSummary;

use crate::error::MediaError;
use crate::reader::{FfmpegFrameReader, FrameSource};
use crate::writer::{FfmpegFrameWriter, FrameSink};
use crate::{Frame, MediaTools};

#[derive(Debug, thiserror::Error)]
pub enum ReencodeError {
    #[error("No frame indices to encode")]
    NoFrames,

    #[error("Frame index {frame_index} at position {position} is out of range (source has {total} frames)")]
    OutOfRange {
        position: usize,
        frame_index: usize,
        total: usize,
    },

    #[error("Frame index {frame_index} at position {position} could not be decoded")]
    MissingFrame { position: usize, frame_index: usize },

    #[error("Failed to decode frame {frame_index} at position {position}: {source}")]
    Decode {
        position: usize,
        frame_index: usize,
        #[source]
        source: MediaError,
    },

    #[error("Failed to write output frame {position}: {source}")]
    Write {
        position: usize,
        #[source]
        source: MediaError,
    },

    #[error("Failed to open source video: {0}")]
    Open(#[source] MediaError),

    #[error("Failed to finalize output: {0}")]
    Finish(#[source] MediaError),
}

impl ReencodeError {
    /// Output position the failure occurred at, if it is tied to one.
    pub fn position(&self) -> Option<usize> {
        match self {
            Self::OutOfRange { position, .. }
            | Self::MissingFrame { position, .. }
            | Self::Decode { position, .. }
            | Self::Write { position, .. } => Some(*position),
            _ => None,
        }
    }
}

impl From<ReencodeError> for TickcapError {
    fn from(err: ReencodeError) -> Self {
        TickcapError::media(err.to_string())
    }
}

/// Copy `indices` from `source` to `sink` in order.
pub fn reencode<S, K>(
    source: &mut S,
    sink: &mut K,
    indices: &[usize],
) -> Result<ReencodeSummary, ReencodeError>
where
    S: FrameSource + ?Sized,
    K: FrameSink + ?Sized,
{
    if indices.is_empty() {
        return Err(ReencodeError::NoFrames);
    }

    let total = source.total_frames();
    let mut stats = ReencodeSummary::default();
    let mut cached: Option<(usize, Frame)> = None;

    for (position, &frame_index) in indices.iter().enumerate() {
        if frame_index >= total {
            return Err(ReencodeError::OutOfRange {
                position,
                frame_index,
                total,
            });
        }

        if let Some((cached_index, frame)) = &cached {
            if *cached_index == frame_index {
                sink.write_frame(frame)
                    .map_err(|source| ReencodeError::Write { position, source })?;
                stats.cache_hits += 1;
                stats.frames_written += 1;
                continue;
            }
        }

        let next_sequential = cached.as_ref().map_or(0, |(index, _)| index + 1);
        if frame_index == next_sequential {
            stats.sequential_reads += 1;
        } else {
            source
                .seek(frame_index)
                .map_err(|source| ReencodeError::Decode {
                    position,
                    frame_index,
                    source,
                })?;
            stats.seeks += 1;
        }

        let frame = source
            .next_frame()
            .map_err(|source| ReencodeError::Decode {
                position,
                frame_index,
                source,
            })?
            .ok_or(ReencodeError::MissingFrame {
                position,
                frame_index,
            })?;

        sink.write_frame(&frame)
            .map_err(|source| ReencodeError::Write { position, source })?;
        stats.frames_written += 1;
        cached = Some((frame_index, frame));
    }

    Ok(stats)
}

/// Re-encode `source_path` into `output_path` at `fps` using ffmpeg. The
/// output is removed if anything fails.
pub fn reencode_file(
    tools: &MediaTools,
    source_path: &Path,
    output_path: &Path,
    indices: &[usize],
    fps: f64,
    probe_timeout: Duration,
) -> Result<ReencodeSummary, ReencodeError> {
    if indices.is_empty() {
        return Err(ReencodeError::NoFrames);
    }

    let mut source =
        FfmpegFrameReader::open(tools, source_path, probe_timeout).map_err(ReencodeError::Open)?;
    let mut sink = FfmpegFrameWriter::new(tools, output_path, fps);

    let stats = match reencode(&mut source, &mut sink, indices) {
        Ok(stats) => stats,
        Err(e) => {
            sink.abort();
            return Err(e);
        }
    };
    sink.finish().map_err(ReencodeError::Finish)?;

    tracing::info!(
        output = %output_path.display(),
        frames = stats.frames_written,
        cache_hits = stats.cache_hits,
        sequential_reads = stats.sequential_reads,
        seeks = stats.seeks,
        "Re-encoded aligned video"
    );
    Ok(stats)
}
