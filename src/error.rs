//! Error types for single-plane TIFF series storage

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for dataset operations
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Directory at {} already exists", .0.display())]
    AlreadyExists(PathBuf),

    #[error("Unable to find dataset at {}", .0.display())]
    DatasetNotFound(PathBuf),

    #[error("Storage cannot handle images with axis \"{axis}\"; allowed axes are {allowed}")]
    DisallowedAxis { axis: String, allowed: String },

    #[error("Attempted to add an image to a read-only dataset")]
    ReadOnly,

    #[error("Image at {0} does not have a valid position name")]
    MissingPositionName(String),

    #[error("Position name changed during acquisition: index {index} is bound to \"{existing}\", image claims \"{requested}\"")]
    PositionNameConflict {
        index: usize,
        existing: String,
        requested: String,
    },

    #[error("Unexpected image format with {bytes_per_pixel} bytes per pixel and {num_components} components")]
    UnsupportedPixelLayout {
        bytes_per_pixel: usize,
        num_components: usize,
    },

    #[error("Invalid dimensions: {0}")]
    InvalidDimensions(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl StorageError {
    /// Errors that abort the whole operation rather than a single image.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StorageError::AlreadyExists(_)
                | StorageError::DatasetNotFound(_)
                | StorageError::PositionNameConflict { .. }
                | StorageError::MissingPositionName(_)
        )
    }
}

/// Specialized Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

impl From<tiff::TiffError> for StorageError {
    fn from(err: tiff::TiffError) -> Self {
        match err {
            tiff::TiffError::IoError(e) => StorageError::Io(e),
            other => StorageError::Codec(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
