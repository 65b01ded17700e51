//! tickcap Capture Server
//!
//! Accepts game-client connections and persists each one as an episode:
//!
//! ```text
//! socket ──► connection task ──(bounded mpsc)──► episode worker ──► <name>.json
//!            header, ticks,                       anchor clock,       <name>.mp4
//!            terminator                           decode images       <name>_meta.json
//! ```
//!
//! The connection task only reads and enqueues; all decoding and disk work
//! happens in the worker so slow encoding never stalls the socket.

pub mod connection;
pub mod encoder;
pub mod server;
pub mod wire;
pub mod worker;

pub use connection::ConnectionState;
pub use encoder::{FfmpegVideoEncoder, VideoEncoder};
pub use server::CaptureServer;
pub use worker::{EpisodeSummary, EpisodeWorker};
