//! Build a side-by-side comparison video.

use std::path::PathBuf;

use tickcap_common::config::AlignConfig;
use tickcap_media::compare::build_side_by_side;
use tickcap_media::MediaTools;

pub async fn run(
    config: AlignConfig,
    left: PathBuf,
    right: PathBuf,
    output: PathBuf,
) -> anyhow::Result<()> {
    let tools = MediaTools::new(config.ffmpeg_path.clone(), config.ffprobe_path.clone());
    let timeout = config.probe_timeout();
    let summary =
        tokio::task::spawn_blocking(move || build_side_by_side(&tools, &left, &right, &output, timeout))
            .await?
            .map_err(|e| anyhow::anyhow!("Comparison failed: {e}"))?;

    println!("Comparison video: {}", summary.output.display());
    println!("  Frames: {}", summary.frames);
    println!("  Height: {}", summary.height);
    println!(
        "  Input fps: {:.2} (left), {:.2} (right)",
        summary.left_fps, summary.right_fps
    );
    Ok(())
}
