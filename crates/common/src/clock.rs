//! Clock and timing utilities for stream synchronization.
//!
//! The game client stamps every tick with its own render clock, which is not
//! comparable across machines. At the start of an episode the first render
//! time is anchored to wallclock epoch seconds once; every later tick is
//! placed on the epoch timeline by its offset from that first tick.

/// Render times at or above this magnitude are taken to be epoch
/// milliseconds rather than a relative render clock.
pub const EPOCH_MILLIS_THRESHOLD: f64 = 1e12;

/// Video timestamps above this magnitude are taken to be absolute epoch
/// seconds rather than offsets from recording start.
pub const WALLCLOCK_PTS_THRESHOLD: f64 = 1e9;

/// Current wallclock time as fractional epoch seconds.
pub fn now_epoch_secs() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Whether a render time looks like epoch milliseconds.
pub fn looks_like_epoch_millis(render_time_ms: f64) -> bool {
    render_time_ms >= EPOCH_MILLIS_THRESHOLD
}

/// Whether a timestamp looks like absolute epoch seconds.
pub fn looks_like_wallclock_secs(secs: f64) -> bool {
    secs > WALLCLOCK_PTS_THRESHOLD
}

/// Round to three decimal places.
pub fn round_to_millis(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Anchor that maps a client's render clock onto epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderClockAnchor {
    /// Render time of the first tick in the episode (ms).
    pub first_render_time_ms: f64,

    /// Epoch seconds corresponding to render time zero offset.
    pub episode_start_epoch: f64,

    /// Whether the client's render clock already is epoch milliseconds.
    pub render_time_is_epoch: bool,
}

impl RenderClockAnchor {
    /// Anchor on the first tick of an episode.
    ///
    /// `now_epoch` is the wallclock time at which that tick is processed; it
    /// is only used when the render clock is not itself epoch based.
    pub fn anchor(first_render_time_ms: f64, now_epoch: f64) -> Self {
        if looks_like_epoch_millis(first_render_time_ms) {
            Self {
                first_render_time_ms,
                episode_start_epoch: first_render_time_ms / 1000.0,
                render_time_is_epoch: true,
            }
        } else {
            Self {
                first_render_time_ms,
                episode_start_epoch: now_epoch - first_render_time_ms / 1000.0,
                render_time_is_epoch: false,
            }
        }
    }

    /// Milliseconds since the first tick.
    pub fn relative_ms(&self, render_time_ms: f64) -> f64 {
        render_time_ms - self.first_render_time_ms
    }

    /// Epoch seconds for a tick.
    pub fn epoch_secs(&self, render_time_ms: f64) -> f64 {
        if self.render_time_is_epoch {
            render_time_ms / 1000.0
        } else {
            self.episode_start_epoch + self.relative_ms(render_time_ms) / 1000.0
        }
    }
}

/// Tick rate implied by `count` ticks spanning the given render times.
///
/// Returns `None` when the span is not positive or there are fewer than two
/// ticks.
pub fn measured_fps(count: usize, first_render_ms: f64, last_render_ms: f64) -> Option<f64> {
    if count < 2 {
        return None;
    }
    let span_secs = (last_render_ms - first_render_ms) / 1000.0;
    if span_secs <= 0.0 || !span_secs.is_finite() {
        return None;
    }
    Some(count as f64 / span_secs)
}

/// Video fps for an episode: the measured rate capped at `max_fps`, or
/// `max_fps` itself when no rate can be measured.
pub fn capped_video_fps(measured: Option<f64>, max_fps: f64) -> f64 {
    match measured {
        Some(fps) => fps.min(max_fps),
        None => max_fps,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_render_clock_anchors_to_now() {
        let anchor = RenderClockAnchor::anchor(5_000.0, 1_700_000_010.0);
        assert!(!anchor.render_time_is_epoch);
        assert!((anchor.episode_start_epoch - 1_700_000_005.0).abs() < 1e-6);
        assert!((anchor.relative_ms(5_250.0) - 250.0).abs() < 1e-9);
        assert!((anchor.epoch_secs(5_250.0) - 1_700_000_010.25).abs() < 1e-6);
    }

    #[test]
    fn test_epoch_render_clock_is_used_directly() {
        let first = 1_700_000_000_000.0;
        let anchor = RenderClockAnchor::anchor(first, 42.0);
        assert!(anchor.render_time_is_epoch);
        assert!((anchor.episode_start_epoch - 1_700_000_000.0).abs() < 1e-6);
        assert!((anchor.epoch_secs(first + 500.0) - 1_700_000_000.5).abs() < 1e-6);
        assert!((anchor.relative_ms(first + 500.0) - 500.0).abs() < 1e-9);
    }

    // Magnitude heuristics are brittle: a relative clock that runs long enough
    // or a producer with an unusual epoch unit will be misclassified. Producers
    // should send an explicit flag whenever they can.
    #[test]
    fn test_brittle_epoch_millis_threshold() {
        assert!(looks_like_epoch_millis(1e12));
        assert!(!looks_like_epoch_millis(999_999_999_999.0));
        assert!(!looks_like_epoch_millis(0.0));
    }

    #[test]
    fn test_brittle_wallclock_secs_threshold() {
        assert!(looks_like_wallclock_secs(1_700_000_000.0));
        assert!(!looks_like_wallclock_secs(1e9));
        assert!(!looks_like_wallclock_secs(12.5));
    }

    #[test]
    fn test_round_to_millis() {
        assert!((round_to_millis(1.23456) - 1.235).abs() < 1e-12);
        assert!((round_to_millis(-0.0004) - 0.0).abs() < 1e-12);
    }

    #[test]
    fn test_measured_fps_uses_tick_count_over_span() {
        let fps = measured_fps(20, 0.0, 1000.0).unwrap();
        assert!((fps - 20.0).abs() < 1e-9);
        assert_eq!(measured_fps(1, 0.0, 1000.0), None);
        assert_eq!(measured_fps(5, 100.0, 100.0), None);
    }

    #[test]
    fn test_video_fps_is_capped() {
        // 200 ticks per second of render time.
        let measured = measured_fps(200, 0.0, 1000.0);
        assert!((capped_video_fps(measured, 20.0) - 20.0).abs() < 1e-9);
        assert!((capped_video_fps(Some(12.5), 20.0) - 12.5).abs() < 1e-9);
        assert!((capped_video_fps(None, 20.0) - 20.0).abs() < 1e-9);
    }
}
