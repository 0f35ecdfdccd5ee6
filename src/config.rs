//! Storage configuration

use crate::error::{Result, StorageError};
use serde::{Deserialize, Serialize};

/// Name of the per-position metadata stream
pub const DEFAULT_METADATA_FILE_NAME: &str = "metadata.txt";

/// Options controlling how a dataset is written and recovered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// File name of each position's metadata stream
    pub metadata_file_name: String,

    /// Pretty-print per-record JSON in streams and TIFF descriptions
    pub pretty_json: bool,

    /// Write pixel size as TIFF resolution tags
    pub write_calibration: bool,

    /// Fall back to 1.x file names when a current-format file is missing
    /// during recovery
    pub legacy_fallback: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            metadata_file_name: DEFAULT_METADATA_FILE_NAME.to_string(),
            pretty_json: true,
            write_calibration: true,
            legacy_fallback: true,
        }
    }
}

impl StorageConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metadata_file_name(mut self, name: impl Into<String>) -> Self {
        self.metadata_file_name = name.into();
        self
    }

    pub fn with_pretty_json(mut self, pretty: bool) -> Self {
        self.pretty_json = pretty;
        self
    }

    pub fn with_write_calibration(mut self, calibrate: bool) -> Self {
        self.write_calibration = calibrate;
        self
    }

    pub fn with_legacy_fallback(mut self, fallback: bool) -> Self {
        self.legacy_fallback = fallback;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let name = &self.metadata_file_name;
        if name.is_empty() {
            return Err(StorageError::Configuration(
                "metadata file name must not be empty".to_string(),
            ));
        }
        if name.contains('/') || name.contains('\\') || name == "." || name == ".." {
            return Err(StorageError::Configuration(format!(
                "metadata file name {:?} must be a plain file name",
                name
            )));
        }
        Ok(())
    }

    /// Render a JSON value the way records are written
    pub(crate) fn render_json(&self, value: &serde_json::Value) -> Result<String> {
        let rendered = if self.pretty_json {
            serde_json::to_string_pretty(value)?
        } else {
            serde_json::to_string(value)?
        };
        Ok(rendered)
    }
}
