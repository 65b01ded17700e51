//! Stream matcher: maps action times onto frame times.
//!
//! Both inputs are ascending epoch seconds. A single forward pointer walks
//! the frames; each action takes the first frame at or after it. The
//! pointer is not advanced after a match, so several actions falling
//! between two frames share the later frame, and frames between actions are
//! left unconsumed. Both cases are reported in [`Diagnostics`] rather than
//! hidden.

use tickcap_common::config::AlignConfig;
use tickcap_episode_model::{Diagnostics, DroppedFrameGap};

/// Matcher parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatcherConfig {
    /// Nominal recording fps, used for dropped-frame detection.
    pub fps: f64,
    /// Unconsumed frames and gaps this close to either end of the recording
    /// are expected and not reported.
    pub boundary_grace_secs: f64,
    /// Frame gaps larger than `gap_factor / fps` count as dropped frames.
    pub gap_factor: f64,
}

impl MatcherConfig {
    pub fn new(fps: f64) -> Self {
        Self {
            fps,
            boundary_grace_secs: 10.0,
            gap_factor: 1.8,
        }
    }

    pub fn from_align_config(fps: f64, config: &AlignConfig) -> Self {
        Self {
            fps,
            boundary_grace_secs: config.boundary_grace_secs,
            gap_factor: config.gap_factor,
        }
    }
}

/// One matched action.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchedFrame {
    pub action_index: usize,
    pub frame_index: usize,
    /// `frame_time - action_time`, never negative.
    pub delta_sec: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matches: Vec<MatchedFrame>,
    pub diagnostics: Diagnostics,
}

impl MatchResult {
    pub fn frame_indices(&self) -> Vec<usize> {
        self.matches.iter().map(|m| m.frame_index).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}

/// Match ascending `action_times` to ascending `frame_times`.
pub fn match_streams(
    action_times: &[f64],
    frame_times: &[f64],
    config: &MatcherConfig,
) -> MatchResult {
    let mut diagnostics = Diagnostics {
        action_count: action_times.len(),
        frame_count: frame_times.len(),
        ..Diagnostics::default()
    };

    let Some(&first_frame) = frame_times.first() else {
        diagnostics.unmatched_actions_end = action_times.len();
        return MatchResult {
            matches: Vec::new(),
            diagnostics,
        };
    };

    let mut matches = Vec::with_capacity(action_times.len());
    let mut ptr = 0;
    for (action_index, &action_time) in action_times.iter().enumerate() {
        if action_time < first_frame {
            diagnostics.unmatched_actions_start += 1;
            continue;
        }
        while frame_times[ptr] < action_time && ptr + 1 < frame_times.len() {
            ptr += 1;
        }
        if frame_times[ptr] < action_time {
            diagnostics.unmatched_actions_end = action_times.len() - action_index;
            break;
        }
        matches.push(MatchedFrame {
            action_index,
            frame_index: ptr,
            delta_sec: frame_times[ptr] - action_time,
        });
    }

    fill_match_diagnostics(&mut diagnostics, &matches, frame_times.len());
    fill_frame_diagnostics(&mut diagnostics, &matches, frame_times, config);

    MatchResult {
        matches,
        diagnostics,
    }
}

fn fill_match_diagnostics(diag: &mut Diagnostics, matches: &[MatchedFrame], frame_count: usize) {
    diag.matched_count = matches.len();
    let (Some(first), Some(last)) = (matches.first(), matches.last()) else {
        return;
    };
    diag.skipped_frames_start = first.frame_index;
    diag.skipped_frames_end = frame_count - 1 - last.frame_index;

    // Indices are non-decreasing, so repeats form runs.
    diag.duplicate_frame_count = matches
        .windows(2)
        .enumerate()
        .filter(|(i, w)| {
            w[0].frame_index == w[1].frame_index
                && (*i == 0 || matches[i - 1].frame_index != w[0].frame_index)
        })
        .count();

    let total: f64 = matches.iter().map(|m| m.delta_sec).sum();
    diag.mean_delta_sec = total / matches.len() as f64;
    diag.max_abs_delta_sec = matches
        .iter()
        .map(|m| m.delta_sec.abs())
        .fold(0.0, f64::max);
}

fn fill_frame_diagnostics(
    diag: &mut Diagnostics,
    matches: &[MatchedFrame],
    frame_times: &[f64],
    config: &MatcherConfig,
) {
    let (Some(&start), Some(&end)) = (frame_times.first(), frame_times.last()) else {
        return;
    };
    let grace = config.boundary_grace_secs;
    let interior = |t: f64| t - start > grace && end - t > grace;

    let mut used = vec![false; frame_times.len()];
    for m in matches {
        used[m.frame_index] = true;
    }
    diag.interior_unconsumed_count = frame_times
        .iter()
        .zip(&used)
        .filter(|(t, used)| !**used && interior(**t))
        .count();

    if config.fps <= 0.0 || !config.fps.is_finite() {
        return;
    }
    let threshold = config.gap_factor / config.fps;
    for (i, pair) in frame_times.windows(2).enumerate() {
        let gap = pair[1] - pair[0];
        if gap > threshold && interior(pair[0]) && interior(pair[1]) {
            let missed = ((gap * config.fps).round() - 1.0).max(0.0) as u64;
            diag.dropped_frame_gaps.push(DroppedFrameGap {
                after_frame_index: i,
                gap_sec: gap,
                estimated_missed_frames: missed,
            });
            diag.estimated_missed_frames += missed;
        }
    }
}

/// Log data-quality findings. None of them fail a run.
pub fn log_diagnostics(diag: &Diagnostics) {
    tracing::info!(
        actions = diag.action_count,
        frames = diag.frame_count,
        matched = diag.matched_count,
        skipped_frames_start = diag.skipped_frames_start,
        skipped_frames_end = diag.skipped_frames_end,
        mean_delta_sec = diag.mean_delta_sec,
        max_abs_delta_sec = diag.max_abs_delta_sec,
        "Matched actions to frames"
    );
    if diag.unmatched_actions_start > 0 {
        tracing::warn!(
            count = diag.unmatched_actions_start,
            "Actions before the first video frame were dropped"
        );
    }
    if diag.unmatched_actions_end > 0 {
        tracing::warn!(
            count = diag.unmatched_actions_end,
            "Actions after the last video frame were dropped"
        );
    }
    if diag.duplicate_frame_count > 0 {
        tracing::warn!(
            count = diag.duplicate_frame_count,
            "Video frames serve more than one action"
        );
    }
    if diag.interior_unconsumed_count > 0 {
        tracing::warn!(
            count = diag.interior_unconsumed_count,
            "Video frames away from the recording edges were never used"
        );
    }
    for gap in &diag.dropped_frame_gaps {
        tracing::warn!(
            after_frame_index = gap.after_frame_index,
            gap_sec = gap.gap_sec,
            estimated_missed_frames = gap.estimated_missed_frames,
            "Gap in video frame timestamps"
        );
    }
}
