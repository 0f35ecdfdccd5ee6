//! Image plane value object

use crate::coords::Coords;
use crate::error::{Result, StorageError};
use crate::metadata::Metadata;
use crate::types::PixelType;
use bytes::Bytes;
use serde_json::{Map, Value};

/// One 2D image plane: raw pixels, their layout, coordinates, and metadata
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pixels: Bytes,
    width: usize,
    height: usize,
    pixel_type: PixelType,
    coords: Coords,
    metadata: Option<Metadata>,
}

impl Image {
    /// Create an image, checking the buffer length against the dimensions
    pub fn new(
        pixels: impl Into<Bytes>,
        width: usize,
        height: usize,
        pixel_type: PixelType,
        coords: Coords,
    ) -> Result<Self> {
        let pixels = pixels.into();
        let expected = width
            .checked_mul(height)
            .and_then(|n| n.checked_mul(pixel_type.bytes_per_pixel()))
            .ok_or_else(|| {
                StorageError::InvalidDimensions(format!(
                    "{}x{} {} image is too large",
                    width, height, pixel_type
                ))
            })?;
        if pixels.len() != expected {
            return Err(StorageError::InvalidDimensions(format!(
                "{}x{} {} image needs {} bytes, got {}",
                width,
                height,
                pixel_type,
                expected,
                pixels.len()
            )));
        }
        Ok(Self {
            pixels,
            width,
            height,
            pixel_type,
            coords,
            metadata: None,
        })
    }

    /// Create an image from an untyped (bytes per pixel, components) layout
    pub fn from_raw(
        pixels: impl Into<Bytes>,
        width: usize,
        height: usize,
        bytes_per_pixel: usize,
        num_components: usize,
        coords: Coords,
    ) -> Result<Self> {
        let pixel_type = PixelType::from_layout(bytes_per_pixel, num_components)?;
        Self::new(pixels, width, height, pixel_type, coords)
    }

    /// 16-bit image from samples; stored in native byte order
    pub fn from_u16(samples: &[u16], width: usize, height: usize, coords: Coords) -> Result<Self> {
        let pixels: Vec<u8> = samples.iter().flat_map(|s| s.to_ne_bytes()).collect();
        Self::new(pixels, width, height, PixelType::Gray16, coords)
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_coords(mut self, coords: Coords) -> Self {
        self.coords = coords;
        self
    }

    pub fn pixels(&self) -> &Bytes {
        &self.pixels
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixel_type(&self) -> PixelType {
        self.pixel_type
    }

    pub fn bytes_per_pixel(&self) -> usize {
        self.pixel_type.bytes_per_pixel()
    }

    pub fn num_components(&self) -> usize {
        self.pixel_type.num_components()
    }

    pub fn coords(&self) -> &Coords {
        &self.coords
    }

    pub fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }

    /// Position name from metadata, if the image carries a usable one
    pub fn position_name(&self) -> Option<&str> {
        self.metadata.as_ref().and_then(Metadata::valid_position_name)
    }

    /// 16-bit samples, if this is a GRAY16 image
    pub fn as_u16(&self) -> Option<Vec<u16>> {
        if self.pixel_type != PixelType::Gray16 {
            return None;
        }
        Some(
            self.pixels
                .chunks_exact(2)
                .map(|b| u16::from_ne_bytes([b[0], b[1]]))
                .collect(),
        )
    }

    /// `Width`, `Height`, `PixelType`, `IJType`
    pub fn format_json(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("Width".into(), Value::from(self.width));
        map.insert("Height".into(), Value::from(self.height));
        map.insert("PixelType".into(), Value::from(self.pixel_type.as_str()));
        map.insert("IJType".into(), Value::from(self.pixel_type.ij_type()));
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_length_checked() {
        let coords = Coords::builder().time(0).build();
        assert!(Image::new(vec![0u8; 12], 4, 3, PixelType::Gray8, coords.clone()).is_ok());
        assert!(matches!(
            Image::new(vec![0u8; 12], 4, 3, PixelType::Gray16, coords),
            Err(StorageError::InvalidDimensions(_))
        ));
    }

    #[test]
    fn test_oversized_dimensions_rejected() {
        for (width, height) in [(usize::MAX, 2), (usize::MAX / 2 + 1, 1)] {
            assert!(matches!(
                Image::new(vec![0u8; 4], width, height, PixelType::Gray16, Coords::default()),
                Err(StorageError::InvalidDimensions(_))
            ));
        }
    }

    #[test]
    fn test_from_raw_rejects_unknown_layout() {
        let result = Image::from_raw(vec![0u8; 8], 2, 1, 4, 1, Coords::default());
        assert!(matches!(
            result,
            Err(StorageError::UnsupportedPixelLayout { .. })
        ));
    }

    #[test]
    fn test_u16_samples() {
        let img = Image::from_u16(&[1, 2, 300, 65535], 2, 2, Coords::default()).unwrap();
        assert_eq!(img.bytes_per_pixel(), 2);
        assert_eq!(img.as_u16().unwrap(), vec![1, 2, 300, 65535]);
    }

    #[test]
    fn test_format_json() {
        let img = Image::new(vec![0u8; 16], 2, 2, PixelType::Rgb32, Coords::default()).unwrap();
        let json = img.format_json();
        assert_eq!(json["Width"], 2);
        assert_eq!(json["PixelType"], "RGB32");
        assert_eq!(json["IJType"], 4);
    }
}
