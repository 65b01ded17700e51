//! Align every job in a manifest.

use std::path::PathBuf;

use tickcap_align_engine::{align_batch, load_manifest, AlignOptions};
use tickcap_common::config::AlignConfig;

pub async fn run(config: AlignConfig, manifest: PathBuf, jobs: usize) -> anyhow::Result<()> {
    let batch = load_manifest(&manifest, config.video_delay_secs)
        .map_err(|e| anyhow::anyhow!("Failed to load manifest: {e}"))?;
    let total = batch.len();
    println!("Aligning {total} episode(s) with {} worker(s)", jobs.max(1));

    let outcomes = align_batch(batch, AlignOptions::from_config(&config), jobs).await;

    let mut failed = 0;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(report) => println!(
                "[OK]   {} ({} of {} actions matched)",
                report.aligned_video_path.display(),
                report.diagnostics.matched_count,
                report.diagnostics.action_count
            ),
            Err(e) => {
                failed += 1;
                println!("[FAIL] {}: {e}", outcome.job.actions_path.display());
            }
        }
    }

    println!();
    println!("{} succeeded, {failed} failed", total - failed);
    if failed > 0 {
        anyhow::bail!("{failed} of {total} alignment jobs failed");
    }
    Ok(())
}
