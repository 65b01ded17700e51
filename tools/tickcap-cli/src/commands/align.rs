//! Align one episode.

use std::path::PathBuf;

use tickcap_align_engine::{align_episode, AlignOptions, AlignmentJob, ComparisonRequest};
use tickcap_common::config::AlignConfig;

pub async fn run(
    config: AlignConfig,
    actions: PathBuf,
    camera_meta: PathBuf,
    output_video: PathBuf,
    output_metadata: Option<PathBuf>,
    comparison: Option<(PathBuf, PathBuf)>,
) -> anyhow::Result<()> {
    let job = AlignmentJob {
        output_metadata,
        video_delay_secs: config.video_delay_secs,
        comparison: comparison.map(|(output, game_video)| ComparisonRequest { game_video, output }),
        ..AlignmentJob::new(actions, camera_meta, output_video)
    };
    let metadata_path = job.metadata_path();
    let options = AlignOptions::from_config(&config);

    let report = tokio::task::spawn_blocking(move || align_episode(&job, &options))
        .await?
        .map_err(|e| anyhow::anyhow!("Alignment failed: {e}"))?;

    let diag = &report.diagnostics;
    println!("Aligned video: {}", report.aligned_video_path.display());
    println!("Report: {}", metadata_path.display());
    println!(
        "  Actions: {} ({} matched, {} before video, {} after video)",
        diag.action_count, diag.matched_count, diag.unmatched_actions_start, diag.unmatched_actions_end
    );
    println!(
        "  Frames: {} ({} skipped at start, {} at end)",
        diag.frame_count, diag.skipped_frames_start, diag.skipped_frames_end
    );
    println!(
        "  Delta: mean {:.4}s, max {:.4}s",
        diag.mean_delta_sec, diag.max_abs_delta_sec
    );
    if diag.has_quality_warnings() {
        println!(
            "  Warnings: {} duplicated frames, {} unused interior frames, ~{} dropped frames",
            diag.duplicate_frame_count, diag.interior_unconsumed_count, diag.estimated_missed_frames
        );
    }
    if let Some(path) = &report.comparison_video_path {
        println!("Comparison video: {}", path.display());
    }
    Ok(())
}
