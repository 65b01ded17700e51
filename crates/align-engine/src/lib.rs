//! tickcap Align Engine
//!
//! Reconciles an episode's action trace with a camera recording made on a
//! different clock:
//!
//! 1. Per-frame wallclock timestamps are extracted from the recording.
//! 2. The [`matcher`] walks both timelines once and assigns every action
//!    the first frame at or after it.
//! 3. The recording is re-encoded so frame `i` of the output belongs to
//!    matched action `i`.
//! 4. The mapping and its diagnostics are written next to the output.
//!
//! [`batch`] runs many episodes concurrently.

pub mod batch;
pub mod matcher;
pub mod pipeline;

pub use batch::{align_batch, load_manifest, BatchOutcome, ManifestEntry};
pub use matcher::{match_streams, MatchResult, MatchedFrame, MatcherConfig};
pub use pipeline::{align_episode, AlignError, AlignOptions, AlignmentJob, ComparisonRequest};
