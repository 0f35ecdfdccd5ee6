//! Core data types for single-plane TIFF storage

use crate::error::{Result, StorageError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pixel layouts a single-plane TIFF series can hold.
///
/// Each variant fixes a (bytes per pixel, components) pair. RGB32 pixels are
/// stored as 4 bytes in B, G, R, padding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelType {
    /// 8-bit grayscale
    #[serde(rename = "GRAY8")]
    Gray8,
    /// 16-bit grayscale, native endianness in the raw buffer
    #[serde(rename = "GRAY16")]
    Gray16,
    /// 8-bit RGB packed into 32 bits
    #[serde(rename = "RGB32")]
    Rgb32,
}

impl PixelType {
    /// Resolve a (bytes per pixel, components) pair
    pub fn from_layout(bytes_per_pixel: usize, num_components: usize) -> Result<Self> {
        match (bytes_per_pixel, num_components) {
            (1, 1) => Ok(PixelType::Gray8),
            (2, 1) => Ok(PixelType::Gray16),
            (4, 3) => Ok(PixelType::Rgb32),
            _ => Err(StorageError::UnsupportedPixelLayout {
                bytes_per_pixel,
                num_components,
            }),
        }
    }

    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelType::Gray8 => 1,
            PixelType::Gray16 => 2,
            PixelType::Rgb32 => 4,
        }
    }

    pub fn num_components(&self) -> usize {
        match self {
            PixelType::Gray8 | PixelType::Gray16 => 1,
            PixelType::Rgb32 => 3,
        }
    }

    /// Name written under the `PixelType` metadata key
    pub fn as_str(&self) -> &'static str {
        match self {
            PixelType::Gray8 => "GRAY8",
            PixelType::Gray16 => "GRAY16",
            PixelType::Rgb32 => "RGB32",
        }
    }

    /// ImageJ image type code written under the `IJType` metadata key
    pub fn ij_type(&self) -> u8 {
        match self {
            PixelType::Gray8 => 0,
            PixelType::Gray16 => 1,
            PixelType::Rgb32 => 4,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "GRAY8" => Some(PixelType::Gray8),
            "GRAY16" => Some(PixelType::Gray16),
            "RGB32" => Some(PixelType::Rgb32),
            _ => None,
        }
    }
}

impl fmt::Display for PixelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layouts() {
        assert_eq!(PixelType::from_layout(1, 1).unwrap(), PixelType::Gray8);
        assert_eq!(PixelType::from_layout(2, 1).unwrap(), PixelType::Gray16);
        assert_eq!(PixelType::from_layout(4, 3).unwrap(), PixelType::Rgb32);
        assert!(matches!(
            PixelType::from_layout(4, 1),
            Err(StorageError::UnsupportedPixelLayout {
                bytes_per_pixel: 4,
                num_components: 1
            })
        ));
    }

    #[test]
    fn test_names() {
        for pt in [PixelType::Gray8, PixelType::Gray16, PixelType::Rgb32] {
            assert_eq!(PixelType::from_name(pt.as_str()), Some(pt));
            assert_eq!(
                PixelType::from_layout(pt.bytes_per_pixel(), pt.num_components()).unwrap(),
                pt
            );
        }
        assert_eq!(PixelType::Rgb32.ij_type(), 4);
    }
}
