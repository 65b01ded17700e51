//! Run the capture server.

use tokio::sync::watch;

use tickcap_capture_server::CaptureServer;
use tickcap_common::config::CaptureConfig;

pub async fn run(config: CaptureConfig) -> anyhow::Result<()> {
    println!("Starting capture server");
    println!("  Bot: {} (instance {})", config.bot_name, config.instance_id);
    println!("  Output: {}", config.output_dir.display());
    println!("  Video capture: {}", config.video_capture);

    let server = CaptureServer::bind(config)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start server: {e}"))?;
    println!("  Listening on: {}", server.local_addr()?);
    println!();
    println!("Press Ctrl+C to stop...");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {e}");
            return;
        }
        tracing::info!("Ctrl+C received; stopping");
        let _ = shutdown_tx.send(true);
    });

    server.run_until(shutdown_rx).await?;
    println!("Capture server stopped.");
    Ok(())
}
