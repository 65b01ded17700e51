//! tickcap Episode Model
//!
//! Defines the data contracts shared by the capture server and the
//! alignment engine:
//! - **Actions:** per-tick control and position records of an episode
//! - **Episodes:** header, file naming, and episode metadata
//! - **Camera:** metadata written by the independent camera recorder
//! - **Alignment:** action-to-frame mapping, diagnostics, and the report
//!
//! JSON field names follow the files the game client and camera recorder
//! already produce, so existing traces load unchanged.

pub mod action;
pub mod alignment;
pub mod camera;
pub mod episode;
pub mod io;

pub use action::*;
pub use alignment::*;
pub use camera::*;
pub use episode::*;
pub use io::*;
