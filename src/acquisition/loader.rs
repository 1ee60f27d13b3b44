//! Loader trait and shared acquisition types

use std::path::Path;
use thiserror::Error;

use super::CsvRecordingLoader;
use crate::types::{DeviceType, RawChannelSet};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No loader for '{0}' files")]
    UnsupportedFormat(String),

    #[error("Missing header field '{0}'")]
    MissingHeader(&'static str),

    #[error("Invalid header field '{key}': '{value}'")]
    InvalidHeader { key: String, value: String },

    #[error("Missing column '{0}'")]
    MissingColumn(&'static str),

    #[error("Line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Recording was made by a {found} device, configured for {expected}")]
    DeviceMismatch { expected: DeviceType, found: String },

    #[error("Recording contains no samples")]
    NoData,

    #[error("Recording has no page timestamps")]
    NoTimestamps,
}

// ============================================================================
// Loader output
// ============================================================================

/// A fully loaded recording.
#[derive(Debug, Clone)]
pub struct Recording {
    /// Device header fields in file order
    pub header: Vec<(String, String)>,
    /// X, Y, Z, Temperature, Battery and Integrity
    pub channels: RawChannelSet,
}

impl Recording {
    pub fn header_value(&self, key: &str) -> Option<&str> {
        self.header
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// X, Y and Z only, loaded for anomaly detection.
#[derive(Debug, Clone)]
pub struct QcPreview {
    pub channels: RawChannelSet,
}

/// A source of decoded recordings.
///
/// `fast_load` may skip everything anomaly detection does not need, but
/// must return the samples and page timestamps exactly as stored.
pub trait RecordingLoader {
    fn name(&self) -> &'static str;

    fn load(&self, path: &Path, device: DeviceType) -> Result<Recording, LoadError>;

    fn fast_load(&self, path: &Path, device: DeviceType) -> Result<QcPreview, LoadError>;
}

/// Pick a loader from the file extension.
pub fn loader_for(path: &Path) -> Result<Box<dyn RecordingLoader>, LoadError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match extension.as_str() {
        "csv" => Ok(Box::new(CsvRecordingLoader)),
        other => Err(LoadError::UnsupportedFormat(other.to_string())),
    }
}
