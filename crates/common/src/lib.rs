//! tickcap Common Utilities
//!
//! Shared infrastructure for all tickcap crates:
//! - Error types and result aliases
//! - Clock helpers for anchoring client render time to wallclock epoch
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
