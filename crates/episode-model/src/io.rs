//! JSON file helpers with path-annotated errors.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Errors that can occur when reading or writing model files.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Parse error in {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("{path} is missing required field '{field}'")]
    MissingField { path: PathBuf, field: String },

    #[error("Invalid data in {path}: {message}")]
    ValidationError { path: PathBuf, message: String },
}

/// Read and deserialize a JSON file.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ModelError> {
    let content = std::fs::read_to_string(path).map_err(|e| ModelError::IoError {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_str(&content).map_err(|e| ModelError::ParseError {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Serialize a value to a compact JSON file, creating parent directories.
/// The file is replaced atomically.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), ModelError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| ModelError::IoError {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    let json = serde_json::to_string(value).map_err(|e| ModelError::ParseError {
        path: path.to_path_buf(),
        source: e,
    })?;
    // Readers polling for the file must never see it half-written.
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);
    std::fs::write(&tmp, json)
        .and_then(|()| std::fs::rename(&tmp, path))
        .map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            ModelError::IoError {
                path: path.to_path_buf(),
                source: e,
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read_creates_parent_dirs() {
        let dir = std::env::temp_dir().join("tickcap_test_model_io");
        let _ = std::fs::remove_dir_all(&dir);

        let path = dir.join("nested").join("values.json");
        write_json(&path, &vec![1, 2, 3]).unwrap();
        let back: Vec<u32> = read_json(&path).unwrap();
        assert_eq!(back, vec![1, 2, 3]);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_read_missing_file_reports_path() {
        let path = std::env::temp_dir().join("tickcap_no_such_file.json");
        let err = read_json::<serde_json::Value>(&path).unwrap_err();
        match err {
            ModelError::IoError { path: p, .. } => assert_eq!(p, path),
            other => panic!("unexpected error: {other}"),
        }
    }
}
