//! Episode worker: turns queued ticks into action records and frames, and
//! writes the episode files when the connection ends.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;

use tickcap_common::clock::{
    capped_video_fps, measured_fps, now_epoch_secs, round_to_millis, RenderClockAnchor,
};
use tickcap_common::config::CaptureConfig;
use tickcap_common::error::{TickcapError, TickcapResult};
use tickcap_episode_model::{
    save_action_trace, write_json, ActionRecord, EpisodeMeta, EpisodeName, PositionRecord,
};
use tickcap_media::Frame;

use crate::encoder::VideoEncoder;

/// One tick as received from the socket.
#[derive(Debug, Clone)]
pub struct Tick {
    /// 0-based count of ticks received on the connection.
    pub sequence: u64,
    pub position: Value,
    pub image: Option<Vec<u8>>,
}

/// Messages from the connection task to the worker.
#[derive(Debug)]
pub enum WorkerMessage {
    Tick(Tick),
    /// No more ticks. `clean` is true when the client sent a terminator.
    Finish { clean: bool },
}

/// Worker parameters taken from [`CaptureConfig`].
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub output_dir: PathBuf,
    pub video_capture: bool,
    pub max_video_fps: f64,
    pub poll_interval: Duration,
}

impl WorkerSettings {
    pub fn from_config(config: &CaptureConfig) -> Self {
        Self {
            output_dir: config.output_dir.clone(),
            video_capture: config.video_capture,
            max_video_fps: config.max_video_fps,
            poll_interval: config.worker_poll_interval(),
        }
    }
}

/// What a finished episode produced.
#[derive(Debug, Clone)]
pub struct EpisodeSummary {
    pub episode_id: i64,
    pub name: String,
    pub records: usize,
    pub skipped_ticks: usize,
    pub skipped_images: usize,
    pub video_fps: f64,
    pub measured_fps: Option<f64>,
    pub video_frames: Option<usize>,
    pub ended_cleanly: bool,
    pub trace_path: PathBuf,
    pub meta_path: PathBuf,
    pub video_path: Option<PathBuf>,
}

/// Decode an encoded image payload to RGB.
pub fn decode_image(bytes: &[u8]) -> TickcapResult<Frame> {
    if bytes.is_empty() {
        return Err(TickcapError::decode("empty image payload"));
    }
    image::load_from_memory(bytes)
        .map(|img| img.to_rgb8())
        .map_err(|e| TickcapError::decode(format!("image decode failed: {e}")))
}

/// Reserve `name`'s trace file in `dir`. Names are second-resolution, so
/// two connections can share one; later claimants get `_1`, `_2`, ...
fn claim_name(name: EpisodeName, dir: &Path) -> TickcapResult<EpisodeName> {
    let mut candidate = name.clone();
    let mut attempt = 0u32;
    loop {
        let path = candidate.trace_path(dir);
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(_) => return Ok(candidate),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                attempt += 1;
                tracing::warn!(
                    path = %path.display(),
                    "Episode files already exist; writing under suffix _{attempt}"
                );
                candidate = name.with_suffix(attempt);
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Accumulates one episode. Owned by a single task; no shared state.
pub struct EpisodeWorker {
    episode_id: i64,
    name: EpisodeName,
    settings: WorkerSettings,
    encoder: Arc<dyn VideoEncoder>,
    anchor: Option<RenderClockAnchor>,
    records: Vec<ActionRecord>,
    frames: Vec<Frame>,
    skipped_ticks: usize,
    skipped_images: usize,
}

impl EpisodeWorker {
    pub fn new(
        episode_id: i64,
        name: EpisodeName,
        settings: WorkerSettings,
        encoder: Arc<dyn VideoEncoder>,
    ) -> Self {
        Self {
            episode_id,
            name,
            settings,
            encoder,
            anchor: None,
            records: Vec::new(),
            frames: Vec::new(),
            skipped_ticks: 0,
            skipped_images: 0,
        }
    }

    pub fn records(&self) -> &[ActionRecord] {
        &self.records
    }

    pub fn buffered_frames(&self) -> usize {
        self.frames.len()
    }

    /// Apply one tick. `image` is the already-decoded image when video
    /// capture is on; `now_epoch` anchors the render clock on the first tick.
    pub fn record_tick(
        &mut self,
        sequence: u64,
        position: Value,
        image: Option<TickcapResult<Frame>>,
        now_epoch: f64,
    ) {
        let position: PositionRecord = match serde_json::from_value(position) {
            Ok(position) => position,
            Err(e) => {
                self.skipped_ticks += 1;
                tracing::warn!(
                    episode_id = self.episode_id,
                    sequence,
                    "Skipping tick with undecodable position: {e}"
                );
                return;
            }
        };

        let anchor = *self.anchor.get_or_insert_with(|| {
            let anchor = RenderClockAnchor::anchor(position.render_time_ms, now_epoch);
            tracing::info!(
                episode_id = self.episode_id,
                first_render_time_ms = anchor.first_render_time_ms,
                episode_start_epoch = anchor.episode_start_epoch,
                render_time_is_epoch = anchor.render_time_is_epoch,
                "Anchored episode clock"
            );
            anchor
        });

        let frame_count = self.records.len() as u64;
        let relative_ms = anchor.relative_ms(position.render_time_ms);
        let epoch_secs = anchor.epoch_secs(position.render_time_ms);
        let mut record = ActionRecord::from_position(
            position,
            frame_count,
            self.episode_id,
            relative_ms,
            epoch_secs,
        );
        record.x = round_to_millis(record.x);
        record.y = round_to_millis(record.y);
        record.z = round_to_millis(record.z);
        record.yaw = round_to_millis(record.yaw);
        record.pitch = round_to_millis(record.pitch);
        self.records.push(record);

        if self.settings.video_capture {
            self.buffer_image(frame_count, image);
        }
    }

    fn buffer_image(&mut self, frame_count: u64, image: Option<TickcapResult<Frame>>) {
        let frame = match image {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                self.skipped_images += 1;
                tracing::warn!(episode_id = self.episode_id, frame_count, "Skipping image: {e}");
                return;
            }
            None => {
                self.skipped_images += 1;
                tracing::warn!(episode_id = self.episode_id, frame_count, "Tick has no image");
                return;
            }
        };

        if let Some(first) = self.frames.first() {
            if first.dimensions() != frame.dimensions() {
                self.skipped_images += 1;
                let (expected_w, expected_h) = first.dimensions();
                let (got_w, got_h) = frame.dimensions();
                tracing::warn!(
                    episode_id = self.episode_id,
                    frame_count,
                    "Skipping image with wrong shape: {got_w}x{got_h}, expected {expected_w}x{expected_h}"
                );
                return;
            }
        }
        self.frames.push(frame);
    }

    /// Encode the video and write the trace and metadata files.
    pub fn finish(self, clean: bool) -> TickcapResult<EpisodeSummary> {
        let Self {
            episode_id,
            name,
            settings,
            encoder,
            anchor,
            records,
            frames,
            skipped_ticks,
            skipped_images,
        } = self;

        let measured = match (records.first(), records.last()) {
            (Some(first), Some(last)) => {
                measured_fps(records.len(), first.render_time_ms, last.render_time_ms)
            }
            _ => None,
        };
        let video_fps = capped_video_fps(measured, settings.max_video_fps);

        std::fs::create_dir_all(&settings.output_dir)?;
        let name = claim_name(name, &settings.output_dir)?;
        let trace_path = name.trace_path(&settings.output_dir);
        let meta_path = name.meta_path(&settings.output_dir);
        let video_path = name.video_path(&settings.output_dir);

        let mut written_video = None;
        let video_frames = if !settings.video_capture {
            None
        } else if frames.is_empty() {
            tracing::warn!(episode_id, "No decodable frames; video not written");
            Some(0)
        } else {
            match encoder.encode(&video_path, video_fps, &frames) {
                Ok(written) => {
                    tracing::info!(
                        episode_id,
                        frames = written,
                        fps = video_fps,
                        backend = encoder.name(),
                        path = %video_path.display(),
                        "Wrote episode video"
                    );
                    written_video = Some(video_path);
                    Some(written)
                }
                Err(e) => {
                    tracing::error!(episode_id, "Episode video encoding failed: {e}");
                    Some(0)
                }
            }
        };

        save_action_trace(&trace_path, &records).map_err(anyhow::Error::from)?;

        let meta = EpisodeMeta {
            episode_start_epoch: anchor.map_or_else(now_epoch_secs, |a| a.episode_start_epoch),
            first_render_time_ms: anchor.map_or(0.0, |a| a.first_render_time_ms),
            render_time_is_epoch: anchor.is_some_and(|a| a.render_time_is_epoch),
            frames: records.len(),
            video_fps,
            episode_id,
            measured_fps: measured,
            video_frames,
            ended_cleanly: clean,
        };
        write_json(&meta_path, &meta).map_err(anyhow::Error::from)?;

        let summary = EpisodeSummary {
            episode_id,
            name: name.stem().to_string(),
            records: records.len(),
            skipped_ticks,
            skipped_images,
            video_fps,
            measured_fps: measured,
            video_frames,
            ended_cleanly: clean,
            trace_path,
            meta_path,
            video_path: written_video,
        };
        tracing::info!(
            episode_id,
            name = %summary.name,
            records = summary.records,
            skipped_ticks,
            skipped_images,
            ended_cleanly = clean,
            "Episode finalized"
        );
        Ok(summary)
    }

    /// Drain `rx` until a finish message or channel close, then finalize.
    pub async fn run(mut self, mut rx: mpsc::Receiver<WorkerMessage>) -> TickcapResult<EpisodeSummary> {
        let poll = self.settings.poll_interval;
        let clean = loop {
            let message = match tokio::time::timeout(poll, rx.recv()).await {
                Ok(message) => message,
                Err(_) => {
                    tracing::trace!(
                        episode_id = self.episode_id,
                        records = self.records.len(),
                        "Worker idle"
                    );
                    continue;
                }
            };

            match message {
                Some(WorkerMessage::Tick(tick)) => {
                    let image = match tick.image {
                        Some(bytes) if self.settings.video_capture => Some(
                            tokio::task::spawn_blocking(move || decode_image(&bytes))
                                .await
                                .map_err(|e| TickcapError::decode(format!("decode task failed: {e}")))
                                .and_then(|decoded| decoded),
                        ),
                        _ => None,
                    };
                    self.record_tick(tick.sequence, tick.position, image, now_epoch_secs());
                }
                Some(WorkerMessage::Finish { clean }) => break clean,
                None => {
                    tracing::debug!(episode_id = self.episode_id, "Tick queue closed without finish");
                    break false;
                }
            }
        };

        tokio::task::spawn_blocking(move || self.finish(clean))
            .await
            .map_err(|e| TickcapError::Other(anyhow::anyhow!("episode finalization panicked: {e}")))?
    }
}
