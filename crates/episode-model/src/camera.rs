//! Metadata produced by the independent camera recorder.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::io::{read_json, ModelError};

/// Camera recording metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraMetadata {
    /// Nominal recording frame rate.
    pub fps: f64,

    /// Wallclock epoch seconds at recording start.
    pub start_epoch_seconds: f64,

    /// Recording file, absolute or relative to the metadata file.
    pub recording_path: String,

    /// Whether the recording's PTS are absolute epoch seconds.
    #[serde(default)]
    pub wallclock_timestamps: Option<bool>,
}

impl CameraMetadata {
    pub const REQUIRED_FIELDS: [&'static str; 3] = ["start_epoch_seconds", "fps", "recording_path"];

    /// Load camera metadata, naming the first missing required field.
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let value: serde_json::Value = read_json(path)?;
        let object = value.as_object().ok_or_else(|| ModelError::ValidationError {
            path: path.to_path_buf(),
            message: "camera metadata must be a JSON object".to_string(),
        })?;

        for field in Self::REQUIRED_FIELDS {
            if object.get(field).map_or(true, serde_json::Value::is_null) {
                return Err(ModelError::MissingField {
                    path: path.to_path_buf(),
                    field: field.to_string(),
                });
            }
        }

        let meta: Self = serde_json::from_value(value).map_err(|e| ModelError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;

        if meta.fps.is_nan() || meta.fps <= 0.0 {
            return Err(ModelError::ValidationError {
                path: path.to_path_buf(),
                message: format!("fps must be positive, got {}", meta.fps),
            });
        }
        Ok(meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_meta(name: &str, body: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("tickcap_test_camera_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("camera_meta.json");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_load_valid_metadata() {
        let path = write_meta(
            "valid",
            r#"{"fps": 30, "start_epoch_seconds": 1700000000.0, "recording_path": "cam.mp4", "wallclock_timestamps": true}"#,
        );
        let meta = CameraMetadata::load(&path).unwrap();
        assert!((meta.fps - 30.0).abs() < 1e-9);
        assert_eq!(meta.recording_path, "cam.mp4");
        assert_eq!(meta.wallclock_timestamps, Some(true));
        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_missing_field_is_named() {
        let path = write_meta(
            "missing",
            r#"{"fps": 30, "recording_path": "cam.mp4"}"#,
        );
        match CameraMetadata::load(&path).unwrap_err() {
            ModelError::MissingField { field, .. } => assert_eq!(field, "start_epoch_seconds"),
            other => panic!("unexpected error: {other}"),
        }
        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_non_positive_fps_is_rejected() {
        let path = write_meta(
            "zero_fps",
            r#"{"fps": 0, "start_epoch_seconds": 1.0, "recording_path": "cam.mp4"}"#,
        );
        assert!(matches!(
            CameraMetadata::load(&path).unwrap_err(),
            ModelError::ValidationError { .. }
        ));
        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }
}
