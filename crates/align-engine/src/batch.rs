//! Concurrent alignment of many episodes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::Semaphore;

use tickcap_episode_model::{read_json, AlignmentReport, ModelError};

use crate::pipeline::{align_episode, AlignError, AlignOptions, AlignmentJob};

/// One manifest entry. Relative paths are relative to the manifest file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ManifestEntry {
    pub actions: PathBuf,
    pub camera_meta: PathBuf,
    pub output_video: PathBuf,
    #[serde(default)]
    pub output_metadata: Option<PathBuf>,
    #[serde(default)]
    pub video_delay_secs: Option<f64>,
}

impl ManifestEntry {
    pub fn into_job(self, base_dir: &Path, default_delay_secs: f64) -> AlignmentJob {
        let resolve = |p: PathBuf| if p.is_absolute() { p } else { base_dir.join(p) };
        AlignmentJob {
            actions_path: resolve(self.actions),
            camera_meta_path: resolve(self.camera_meta),
            output_video: resolve(self.output_video),
            output_metadata: self.output_metadata.map(resolve),
            video_delay_secs: self.video_delay_secs.unwrap_or(default_delay_secs),
            comparison: None,
        }
    }
}

/// Load a manifest (a JSON array of entries) into jobs.
pub fn load_manifest(path: &Path, default_delay_secs: f64) -> Result<Vec<AlignmentJob>, ModelError> {
    let entries: Vec<ManifestEntry> = read_json(path)?;
    let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    Ok(entries
        .into_iter()
        .map(|entry| entry.into_job(&base_dir, default_delay_secs))
        .collect())
}

/// Result of one job in a batch.
#[derive(Debug)]
pub struct BatchOutcome {
    pub job: AlignmentJob,
    pub result: Result<AlignmentReport, AlignError>,
}

/// Run `jobs` with at most `parallelism` in flight. Outcomes are returned in
/// job order; a failed job does not stop the others.
pub async fn align_batch(
    jobs: Vec<AlignmentJob>,
    options: AlignOptions,
    parallelism: usize,
) -> Vec<BatchOutcome> {
    let semaphore = Arc::new(Semaphore::new(parallelism.max(1)));
    let options = Arc::new(options);
    let total = jobs.len();

    let handles: Vec<_> = jobs
        .into_iter()
        .map(|job| {
            let semaphore = Arc::clone(&semaphore);
            let options = Arc::clone(&options);
            let task_job = job.clone();
            let handle = tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| AlignError::Task(e.to_string()))?;
                tokio::task::spawn_blocking(move || align_episode(&task_job, &options))
                    .await
                    .map_err(|e| AlignError::Task(e.to_string()))?
            });
            (job, handle)
        })
        .collect();

    let mut outcomes = Vec::with_capacity(total);
    for (index, (job, handle)) in handles.into_iter().enumerate() {
        let result = handle
            .await
            .unwrap_or_else(|e| Err(AlignError::Task(e.to_string())));
        match &result {
            Ok(report) => tracing::info!(
                job = index + 1,
                total,
                output = %report.aligned_video_path.display(),
                matched = report.diagnostics.matched_count,
                "Batch job finished"
            ),
            Err(e) => tracing::error!(
                job = index + 1,
                total,
                actions = %job.actions_path.display(),
                "Batch job failed: {e}"
            ),
        }
        outcomes.push(BatchOutcome { job, result });
    }
    outcomes
}
