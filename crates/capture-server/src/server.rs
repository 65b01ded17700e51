//! TCP accept loop.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;

use tickcap_common::config::CaptureConfig;
use tickcap_common::error::{TickcapError, TickcapResult};

use crate::connection::{handle_connection, ServerContext};
use crate::encoder::{FfmpegVideoEncoder, VideoEncoder};

/// A bound capture server. Every accepted connection runs on its own task,
/// so one client's failure never affects another.
pub struct CaptureServer {
    listener: TcpListener,
    context: Arc<ServerContext>,
}

impl CaptureServer {
    /// Bind using ffmpeg for episode videos.
    pub async fn bind(config: CaptureConfig) -> TickcapResult<Self> {
        let encoder = Arc::new(FfmpegVideoEncoder::new(config.ffmpeg_path.clone()));
        Self::bind_with_encoder(config, encoder).await
    }

    pub async fn bind_with_encoder(
        config: CaptureConfig,
        encoder: Arc<dyn VideoEncoder>,
    ) -> TickcapResult<Self> {
        let addr = config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| TickcapError::transport(format!("failed to bind {addr}: {e}")))?;
        Ok(Self {
            listener,
            context: Arc::new(ServerContext { config, encoder }),
        })
    }

    pub fn local_addr(&self) -> TickcapResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` turns true or its sender is
    /// dropped, then wait for in-flight episodes to finalize.
    pub async fn run_until(self, mut shutdown: watch::Receiver<bool>) -> TickcapResult<()> {
        let config = &self.context.config;
        tracing::info!(
            addr = %self.local_addr()?,
            bot_name = %config.bot_name,
            instance_id = config.instance_id,
            output_dir = %config.output_dir.display(),
            video_capture = config.video_capture,
            encoder = self.context.encoder.name(),
            "Capture server listening"
        );

        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::warn!("Accept failed: {e}");
                            continue;
                        }
                    };
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!(peer = %peer, "Failed to set TCP_NODELAY: {e}");
                    }
                    tracing::info!(peer = %peer, "Client connected");
                    let context = Arc::clone(&self.context);
                    connections.spawn(async move {
                        (peer, handle_connection(stream, peer, context).await)
                    });
                }
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    log_connection_result(joined);
                }
            }
        }

        tracing::info!(
            in_flight = connections.len(),
            "Shutting down; waiting for open episodes"
        );
        while let Some(joined) = connections.join_next().await {
            log_connection_result(joined);
        }
        Ok(())
    }
}

type ConnectionResult = (SocketAddr, TickcapResult<Option<crate::EpisodeSummary>>);

fn log_connection_result(joined: Result<ConnectionResult, tokio::task::JoinError>) {
    match joined {
        Ok((peer, Ok(Some(summary)))) => {
            tracing::info!(
                peer = %peer,
                episode_id = summary.episode_id,
                records = summary.records,
                "Connection finished"
            );
        }
        Ok((peer, Ok(None))) => tracing::debug!(peer = %peer, "Connection finished without episode"),
        Ok((peer, Err(e))) => tracing::error!(peer = %peer, "Connection failed: {e}"),
        Err(e) => tracing::error!("Connection task panicked: {e}"),
    }
}
