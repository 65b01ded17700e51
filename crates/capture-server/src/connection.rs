//! Per-connection protocol handling.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;

use tickcap_common::config::CaptureConfig;
use tickcap_common::error::{TickcapError, TickcapResult};
use tickcap_episode_model::{EpisodeHeader, EpisodeName};

use crate::encoder::VideoEncoder;
use crate::wire::{read_frame, ReadOutcome};
use crate::worker::{EpisodeSummary, EpisodeWorker, Tick, WorkerMessage, WorkerSettings};

/// Lifecycle of one client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Listening,
    Connected,
    AwaitingHeader,
    Streaming,
    /// Reading has stopped; the worker is finalizing the episode.
    Draining,
    Closed,
}

/// Shared, read-only state every connection handler sees.
pub struct ServerContext {
    pub config: CaptureConfig,
    pub encoder: Arc<dyn VideoEncoder>,
}

/// How the tick stream ended.
enum StreamEnd {
    Terminator,
    Disconnected,
    Failed(TickcapError),
}

struct Connection {
    peer: SocketAddr,
    state: ConnectionState,
}

impl Connection {
    fn transition(&mut self, next: ConnectionState) {
        tracing::debug!(peer = %self.peer, from = ?self.state, to = ?next, "Connection state");
        self.state = next;
    }
}

/// Serve one connection to completion. Returns the finalized episode, or
/// `None` when no valid header arrived.
pub async fn handle_connection<S>(
    mut stream: S,
    peer: SocketAddr,
    context: Arc<ServerContext>,
) -> TickcapResult<Option<EpisodeSummary>>
where
    S: AsyncRead + Unpin + Send,
{
    let config = &context.config;
    let timeout = config.read_timeout();
    let mut conn = Connection {
        peer,
        state: ConnectionState::Listening,
    };
    conn.transition(ConnectionState::Connected);
    conn.transition(ConnectionState::AwaitingHeader);

    let header = match read_header(&mut stream, timeout).await {
        Ok(Some(header)) => header,
        Ok(None) => {
            tracing::info!(peer = %peer, "Connection closed before an episode header");
            conn.transition(ConnectionState::Closed);
            return Ok(None);
        }
        Err(e) => {
            tracing::warn!(peer = %peer, "Rejected episode header: {e}");
            conn.transition(ConnectionState::Closed);
            return Ok(None);
        }
    };

    let episode_id = header.episode;
    let name = EpisodeName::now(episode_id, &config.bot_name, config.instance_id);
    tracing::info!(peer = %peer, episode_id, name = %name, "Episode started");

    let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
    let worker = EpisodeWorker::new(
        episode_id,
        name,
        WorkerSettings::from_config(config),
        Arc::clone(&context.encoder),
    );
    let worker_task = tokio::spawn(worker.run(rx));

    conn.transition(ConnectionState::Streaming);
    let end = stream_ticks(&mut stream, &tx, config.video_capture, timeout).await;

    conn.transition(ConnectionState::Draining);
    let clean = match end {
        StreamEnd::Terminator => true,
        StreamEnd::Disconnected => {
            tracing::warn!(peer = %peer, episode_id, "Client disconnected without terminator");
            false
        }
        StreamEnd::Failed(e) if e.is_connection_scoped() => {
            tracing::warn!(peer = %peer, episode_id, "Episode stream ended abnormally: {e}");
            false
        }
        StreamEnd::Failed(e) => {
            tracing::error!(peer = %peer, episode_id, "Episode stream failed: {e}");
            false
        }
    };
    // The worker treats a closed channel as an abnormal finish, so a failed
    // send needs no handling.
    let _ = tx.send(WorkerMessage::Finish { clean }).await;
    drop(tx);

    let summary = worker_task
        .await
        .map_err(|e| TickcapError::Other(anyhow::anyhow!("episode worker failed: {e}")))??;
    conn.transition(ConnectionState::Closed);
    Ok(Some(summary))
}

async fn read_header<S: AsyncRead + Unpin>(
    stream: &mut S,
    timeout: Option<Duration>,
) -> TickcapResult<Option<EpisodeHeader>> {
    let bytes = match read_frame(stream, timeout).await? {
        ReadOutcome::Frame(bytes) => bytes,
        ReadOutcome::Terminator | ReadOutcome::Eof => return Ok(None),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| TickcapError::protocol(format!("invalid episode header: {e}")))
}

async fn stream_ticks<S: AsyncRead + Unpin>(
    stream: &mut S,
    tx: &mpsc::Sender<WorkerMessage>,
    video_capture: bool,
    timeout: Option<Duration>,
) -> StreamEnd {
    let mut sequence = 0u64;
    loop {
        match next_tick(stream, sequence, video_capture, timeout).await {
            Ok(Some(tick)) => {
                if tx.send(WorkerMessage::Tick(tick)).await.is_err() {
                    return StreamEnd::Failed(TickcapError::Other(anyhow::anyhow!(
                        "episode worker stopped accepting ticks"
                    )));
                }
                sequence += 1;
            }
            Ok(None) => return StreamEnd::Terminator,
            Err(TickOutcome::Disconnected) => return StreamEnd::Disconnected,
            Err(TickOutcome::Failed(e)) => return StreamEnd::Failed(e),
        }
    }
}

enum TickOutcome {
    Disconnected,
    Failed(TickcapError),
}

impl From<crate::wire::WireError> for TickOutcome {
    fn from(err: crate::wire::WireError) -> Self {
        TickOutcome::Failed(err.into())
    }
}

/// Read one position frame and, with video capture on, its image frame.
/// `Ok(None)` is a clean terminator.
async fn next_tick<S: AsyncRead + Unpin>(
    stream: &mut S,
    sequence: u64,
    video_capture: bool,
    timeout: Option<Duration>,
) -> Result<Option<Tick>, TickOutcome> {
    let bytes = match read_frame(stream, timeout).await? {
        ReadOutcome::Frame(bytes) => bytes,
        ReadOutcome::Terminator => return Ok(None),
        ReadOutcome::Eof => return Err(TickOutcome::Disconnected),
    };
    let position: Value = serde_json::from_slice(&bytes).map_err(|e| {
        TickOutcome::Failed(TickcapError::protocol(format!(
            "unparseable position frame {sequence}: {e}"
        )))
    })?;
    if !position.is_object() {
        return Err(TickOutcome::Failed(TickcapError::protocol(format!(
            "position frame {sequence} is not a JSON object"
        ))));
    }

    let image = if video_capture {
        match read_frame(stream, timeout).await? {
            ReadOutcome::Frame(bytes) => Some(bytes),
            ReadOutcome::Terminator => {
                return Err(TickOutcome::Failed(TickcapError::protocol(format!(
                    "terminator in place of image frame {sequence}"
                ))))
            }
            ReadOutcome::Eof => return Err(TickOutcome::Disconnected),
        }
    } else {
        None
    };

    Ok(Some(Tick {
        sequence,
        position,
        image,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{write_frame, write_terminator};
    use tickcap_media::Frame;

    struct NullEncoder;

    impl VideoEncoder for NullEncoder {
        fn encode(&self, _: &std::path::Path, _: f64, frames: &[Frame]) -> TickcapResult<usize> {
            Ok(frames.len())
        }

        fn name(&self) -> &str {
            "null"
        }
    }

    fn context(name: &str) -> Arc<ServerContext> {
        let dir = std::env::temp_dir().join(format!("tickcap_test_connection_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        Arc::new(ServerContext {
            config: CaptureConfig {
                output_dir: dir,
                video_capture: false,
                read_timeout_secs: Some(2.0),
                worker_poll_secs: 0.05,
                ..Default::default()
            },
            encoder: Arc::new(NullEncoder),
        })
    }

    fn peer() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 40000))
    }

    #[tokio::test]
    async fn test_terminator_header_closes_without_episode() {
        let ctx = context("terminator_header");
        let mut buf = Vec::new();
        write_terminator(&mut buf).await.unwrap();
        let result = handle_connection(buf.as_slice(), peer(), Arc::clone(&ctx))
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(!ctx.config.output_dir.exists());
    }

    #[tokio::test]
    async fn test_header_without_episode_is_rejected() {
        let ctx = context("no_episode");
        let mut buf = Vec::new();
        write_frame(&mut buf, br#"{"name": "x"}"#).await.unwrap();
        let result = handle_connection(buf.as_slice(), peer(), Arc::clone(&ctx))
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(!ctx.config.output_dir.exists());
    }

    #[tokio::test]
    async fn test_garbage_position_ends_episode_abnormally() {
        let ctx = context("garbage_position");
        let mut buf = Vec::new();
        write_frame(&mut buf, br#"{"episode": 9}"#).await.unwrap();
        write_frame(
            &mut buf,
            br#"{"x":0,"y":0,"z":0,"yaw":0,"pitch":0,"renderTime":0}"#,
        )
        .await
        .unwrap();
        write_frame(&mut buf, b"{not json").await.unwrap();

        let summary = handle_connection(buf.as_slice(), peer(), Arc::clone(&ctx))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(summary.episode_id, 9);
        assert_eq!(summary.records, 1);
        assert!(!summary.ended_cleanly);

        std::fs::remove_dir_all(&ctx.config.output_dir).ok();
    }

    #[tokio::test]
    async fn test_empty_image_frame_ends_episode_abnormally() {
        let dir = std::env::temp_dir().join("tickcap_test_connection_empty_image");
        let _ = std::fs::remove_dir_all(&dir);
        let ctx = Arc::new(ServerContext {
            config: CaptureConfig {
                output_dir: dir,
                video_capture: true,
                read_timeout_secs: Some(2.0),
                worker_poll_secs: 0.05,
                ..Default::default()
            },
            encoder: Arc::new(NullEncoder),
        });

        let mut buf = Vec::new();
        write_frame(&mut buf, br#"{"episode": 4}"#).await.unwrap();
        write_frame(
            &mut buf,
            br#"{"x":0,"y":0,"z":0,"yaw":0,"pitch":0,"renderTime":0}"#,
        )
        .await
        .unwrap();
        // Zero length where the image frame belongs.
        write_terminator(&mut buf).await.unwrap();

        let summary = handle_connection(buf.as_slice(), peer(), Arc::clone(&ctx))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(summary.episode_id, 4);
        assert_eq!(summary.records, 0);
        assert!(!summary.ended_cleanly);

        std::fs::remove_dir_all(&ctx.config.output_dir).ok();
    }
}
