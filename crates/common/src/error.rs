//! Error types shared across tickcap crates.

use std::path::PathBuf;

/// Top-level error type for tickcap operations.
#[derive(Debug, thiserror::Error)]
pub enum TickcapError {
    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Decode error: {message}")]
    Decode { message: String },

    #[error("Media error: {message}")]
    Media { message: String },

    #[error("Alignment error: {message}")]
    Alignment { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using TickcapError.
pub type TickcapResult<T> = Result<T, TickcapError>;

impl TickcapError {
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport {
            message: msg.into(),
        }
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol {
            message: msg.into(),
        }
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode {
            message: msg.into(),
        }
    }

    pub fn media(msg: impl Into<String>) -> Self {
        Self::Media {
            message: msg.into(),
        }
    }

    pub fn alignment(msg: impl Into<String>) -> Self {
        Self::Alignment {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            message: msg.into(),
        }
    }

    /// Whether this error ends only the current connection (as opposed to
    /// being a local fault such as a disk error).
    pub fn is_connection_scoped(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Protocol { .. })
    }
}
