//! Summarize a tickcap JSON file.

use std::path::PathBuf;

use tickcap_episode_model::{
    load_action_trace, read_json, validate_trace, AlignmentReport, CameraMetadata, EpisodeMeta,
};

pub fn run(path: PathBuf) -> anyhow::Result<()> {
    let value: serde_json::Value =
        read_json(&path).map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", path.display()))?;

    match &value {
        serde_json::Value::Array(_) => action_trace(&path),
        serde_json::Value::Object(map) if map.contains_key("frame_mapping") => alignment_report(&path),
        serde_json::Value::Object(map) if map.contains_key("episode_start_epoch") => {
            episode_meta(&path)
        }
        serde_json::Value::Object(map) if map.contains_key("start_epoch_seconds") => {
            camera_meta(&path)
        }
        _ => anyhow::bail!("{} is not a recognized tickcap file", path.display()),
    }
}

fn action_trace(path: &std::path::Path) -> anyhow::Result<()> {
    let records = load_action_trace(path).map_err(|e| anyhow::anyhow!("Failed to load trace: {e}"))?;

    println!("Action trace: {}", path.display());
    println!("  Records: {}", records.len());
    if let (Some(first), Some(last)) = (records.first(), records.last()) {
        println!("  Episode: {}", first.episode_id);
        println!(
            "  Duration: {:.3}s (epoch {:.3} .. {:.3})",
            last.epoch_time_sec - first.epoch_time_sec,
            first.epoch_time_sec,
            last.epoch_time_sec
        );
    }

    let problems = validate_trace(&records);
    if problems.is_empty() {
        println!("  Sequence: OK");
    } else {
        println!("  Sequence problems: {}", problems.len());
        for problem in problems.iter().take(10) {
            println!("    - {problem}");
        }
    }
    Ok(())
}

fn episode_meta(path: &std::path::Path) -> anyhow::Result<()> {
    let meta: EpisodeMeta =
        read_json(path).map_err(|e| anyhow::anyhow!("Failed to load episode metadata: {e}"))?;

    println!("Episode metadata: {}", path.display());
    println!("  Episode: {}", meta.episode_id);
    println!("  Ticks: {}", meta.frames);
    println!("  Start epoch: {:.3}", meta.episode_start_epoch);
    println!(
        "  Render clock: {}",
        if meta.render_time_is_epoch { "epoch ms" } else { "relative" }
    );
    match meta.measured_fps {
        Some(fps) => println!("  Tick rate: {fps:.2}/s (video at {:.2} fps)", meta.video_fps),
        None => println!("  Tick rate: unknown (video at {:.2} fps)", meta.video_fps),
    }
    match meta.video_frames {
        Some(frames) => println!("  Video frames: {frames}"),
        None => println!("  Video frames: video capture disabled"),
    }
    println!("  Ended cleanly: {}", meta.ended_cleanly);
    Ok(())
}

fn camera_meta(path: &std::path::Path) -> anyhow::Result<()> {
    let meta = CameraMetadata::load(path).map_err(|e| anyhow::anyhow!("{e}"))?;

    println!("Camera metadata: {}", path.display());
    println!("  Recording: {}", meta.recording_path);
    println!("  FPS: {}", meta.fps);
    println!("  Start epoch: {:.3}", meta.start_epoch_seconds);
    match meta.wallclock_timestamps {
        Some(flag) => println!("  Wallclock timestamps: {flag}"),
        None => println!("  Wallclock timestamps: not declared"),
    }
    Ok(())
}

fn alignment_report(path: &std::path::Path) -> anyhow::Result<()> {
    let report =
        AlignmentReport::load(path).map_err(|e| anyhow::anyhow!("Failed to load report: {e}"))?;
    let diag = &report.diagnostics;

    println!("Alignment report: {}", path.display());
    println!("  Aligned video: {}", report.aligned_video_path.display());
    println!("  Recording: {}", report.recording_path.display());
    println!("  FPS: {}", report.fps);
    println!("  Video delay: {}s", report.video_delay_sec);
    println!();

    println!("Matching:");
    println!(
        "  Actions: {} ({} matched, {} before video, {} after video)",
        diag.action_count, diag.matched_count, diag.unmatched_actions_start, diag.unmatched_actions_end
    );
    println!(
        "  Frames: {} ({} skipped at start, {} at end)",
        diag.frame_count, diag.skipped_frames_start, diag.skipped_frames_end
    );
    println!("  Duplicated frames: {}", diag.duplicate_frame_count);
    println!("  Unused interior frames: {}", diag.interior_unconsumed_count);
    println!(
        "  Dropped-frame gaps: {} (~{} frames)",
        diag.dropped_frame_gaps.len(),
        diag.estimated_missed_frames
    );
    println!(
        "  Delta: mean {:.4}s, max {:.4}s",
        diag.mean_delta_sec, diag.max_abs_delta_sec
    );
    println!("  Monotonic: {}", report.is_monotonic());
    println!();

    println!("Re-encode:");
    println!("  Frames written: {}", report.reencode.frames_written);
    println!(
        "  Cache hits: {}, sequential reads: {}, seeks: {}",
        report.reencode.cache_hits, report.reencode.sequential_reads, report.reencode.seeks
    );
    Ok(())
}
