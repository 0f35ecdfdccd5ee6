//! Raster codec - encoding and decoding single-plane image files

use crate::error::{Result, StorageError};
use crate::image::Image;
use crate::types::PixelType;
use std::fs::{self, File};
use std::io::{BufWriter, Cursor, Read, Seek, Write};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::{colortype, DirectoryEncoder, Rational, TiffEncoder, TiffKind};
use tiff::tags::{ResolutionUnit, Tag};
use tiff::ColorType;

/// Micrometres per centimetre, for resolution tags
const UM_PER_CM: f64 = 10_000.0;

/// `ResolutionUnit` tag value for centimetres
const RESOLUTION_UNIT_CM: u32 = 3;

/// ImageJ private tags: block byte counts, then the blocks themselves
const IJ_METADATA_COUNTS: u16 = 50838;
const IJ_METADATA: u16 = 50839;

/// "IJIJ", first word of the IJMetadata header block
const IJ_MAGIC: u32 = 0x494a_494a;

/// "info", the block type holding the image's Info property
const IJ_INFO: u32 = 0x696e_666f;

/// Bounds ImageJ places on the IJMetadata header block
const IJ_HEADER_MIN: usize = 12;
const IJ_HEADER_MAX: usize = 804;

/// Prefix of the ImageJ header that ImageJ keeps in `ImageDescription`
const IMAGEJ_DESCRIPTION_PREFIX: &str = "ImageJ=";

/// One decoded image plane
#[derive(Debug, Clone)]
pub struct DecodedRaster {
    pub width: usize,
    pub height: usize,
    pub pixel_type: PixelType,
    pub pixels: Vec<u8>,
    /// Text property embedded in the file (the per-image JSON), taken from
    /// the ImageJ `info` block or else a non-ImageJ `ImageDescription`
    pub info: Option<String>,
    /// Pixel size recovered from resolution tags
    pub pixel_size_um: Option<f64>,
}

/// Trait for single-plane raster file encoding/decoding
pub trait RasterCodec: Send + Sync {
    /// Write `image` to `path` with `info` attached as a text property
    fn encode(&self, path: &Path, image: &Image, info: &str, pixel_size_um: Option<f64>)
        -> Result<()>;

    /// Read the plane stored at `path`
    fn decode(&self, path: &Path) -> Result<DecodedRaster>;
}

/// TIFF codec.
///
/// The info text is written twice: as ImageJ's `info` block in the
/// IJMetadata tags, and ASCII-escaped in `ImageDescription` for readers that
/// only know baseline tags. Files written by ImageJ carry the info block only,
/// with an `ImageJ=` header in `ImageDescription`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TiffCodec;

impl RasterCodec for TiffCodec {
    fn encode(
        &self,
        path: &Path,
        image: &Image,
        info: &str,
        pixel_size_um: Option<f64>,
    ) -> Result<()> {
        let width = dimension(image.width())?;
        let height = dimension(image.height())?;
        let description = escape_non_ascii(info);
        let (ij_counts, ij_data) = ij_metadata(info)?;
        let resolution = pixel_size_um.and_then(resolution_for_pixel_size);

        let mut writer = BufWriter::new(File::create(path)?);
        {
            let mut encoder = TiffEncoder::new(&mut writer)?;
            match image.pixel_type() {
                PixelType::Gray8 => {
                    let mut plane = encoder.new_image::<colortype::Gray8>(width, height)?;
                    write_info(plane.encoder(), &description, &ij_counts, &ij_data)?;
                    if let Some(res) = resolution {
                        plane.resolution(ResolutionUnit::Centimeter, res);
                    }
                    plane.write_data(&image.pixels()[..])?;
                }
                PixelType::Gray16 => {
                    let samples: Vec<u16> = image
                        .pixels()
                        .chunks_exact(2)
                        .map(|b| u16::from_ne_bytes([b[0], b[1]]))
                        .collect();
                    let mut plane = encoder.new_image::<colortype::Gray16>(width, height)?;
                    write_info(plane.encoder(), &description, &ij_counts, &ij_data)?;
                    if let Some(res) = resolution {
                        plane.resolution(ResolutionUnit::Centimeter, res);
                    }
                    plane.write_data(&samples)?;
                }
                PixelType::Rgb32 => {
                    let rgb = bgrx_to_rgb(image.pixels());
                    let mut plane = encoder.new_image::<colortype::RGB8>(width, height)?;
                    write_info(plane.encoder(), &description, &ij_counts, &ij_data)?;
                    if let Some(res) = resolution {
                        plane.resolution(ResolutionUnit::Centimeter, res);
                    }
                    plane.write_data(&rgb)?;
                }
            }
        }
        writer.flush()?;
        Ok(())
    }

    fn decode(&self, path: &Path) -> Result<DecodedRaster> {
        let bytes = fs::read(path)?;
        let little_endian = bytes.starts_with(b"II");
        let mut decoder = Decoder::new(Cursor::new(bytes))?;
        let (width, height) = decoder.dimensions()?;
        let color = decoder.colortype()?;
        let info = read_info(&mut decoder, little_endian);
        let pixel_size_um = read_pixel_size(&mut decoder);

        let (pixel_type, pixels) = match (color, decoder.read_image()?) {
            (ColorType::Gray(8), DecodingResult::U8(buf)) => (PixelType::Gray8, buf),
            (ColorType::Gray(16), DecodingResult::U16(buf)) => (
                PixelType::Gray16,
                buf.iter().flat_map(|s| s.to_ne_bytes()).collect(),
            ),
            (ColorType::RGB(8), DecodingResult::U8(buf)) => (PixelType::Rgb32, rgb_to_bgrx(&buf)),
            (ColorType::RGBA(8), DecodingResult::U8(buf)) => {
                (PixelType::Rgb32, rgba_to_bgra(&buf))
            }
            (other, _) => {
                return Err(StorageError::Codec(format!(
                    "unrecognized pixel layout {:?} in {}",
                    other,
                    path.display()
                )))
            }
        };

        Ok(DecodedRaster {
            width: width as usize,
            height: height as usize,
            pixel_type,
            pixels,
            info,
            pixel_size_um,
        })
    }
}

fn write_info<W: Write + Seek, K: TiffKind>(
    directory: &mut DirectoryEncoder<'_, W, K>,
    description: &str,
    ij_counts: &[u32],
    ij_data: &[u8],
) -> Result<()> {
    directory.write_tag(Tag::ImageDescription, description)?;
    directory.write_tag(Tag::Unknown(IJ_METADATA_COUNTS), ij_counts)?;
    directory.write_tag(Tag::Unknown(IJ_METADATA), ij_data)?;
    Ok(())
}

/// IJMetadata tag values holding a single `info` block, in native byte
/// order to match the encoder
fn ij_metadata(info: &str) -> Result<(Vec<u32>, Vec<u8>)> {
    let text: Vec<u8> = info.encode_utf16().flat_map(u16::to_ne_bytes).collect();
    let text_len = u32::try_from(text.len())
        .map_err(|_| StorageError::Codec(format!("info text of {} bytes is too long", text.len())))?;

    let mut data = Vec::with_capacity(IJ_HEADER_MIN + text.len());
    for word in [IJ_MAGIC, IJ_INFO, 1] {
        data.extend_from_slice(&word.to_ne_bytes());
    }
    let counts = vec![IJ_HEADER_MIN as u32, text_len];
    data.extend(text);
    Ok((counts, data))
}

fn read_info<R: Read + Seek>(decoder: &mut Decoder<R>, little_endian: bool) -> Option<String> {
    let from_ij = decoder
        .get_tag_u32_vec(Tag::Unknown(IJ_METADATA_COUNTS))
        .ok()
        .zip(decoder.get_tag_u8_vec(Tag::Unknown(IJ_METADATA)).ok())
        .and_then(|(counts, data)| ij_info(&counts, &data, little_endian));
    from_ij.or_else(|| {
        decoder
            .get_tag_ascii_string(Tag::ImageDescription)
            .ok()
            .filter(|text| !text.starts_with(IMAGEJ_DESCRIPTION_PREFIX))
    })
}

/// The `info` block of ImageJ's IJMetadata tags.
///
/// `counts[0]` is the size of the header block, which starts with the magic
/// word and lists `(type, count)` pairs; the remaining counts are the sizes of
/// the data blocks, laid out in header order. Words follow the file's byte
/// order, and so does the UTF-16 info text.
fn ij_info(counts: &[u32], data: &[u8], little_endian: bool) -> Option<String> {
    let header_size = *counts.first()? as usize;
    if !(IJ_HEADER_MIN..=IJ_HEADER_MAX).contains(&header_size) || data.len() < header_size {
        return None;
    }
    let word = |at: usize| -> Option<u32> {
        let raw: [u8; 4] = data.get(at..at + 4)?.try_into().ok()?;
        Some(if little_endian {
            u32::from_le_bytes(raw)
        } else {
            u32::from_be_bytes(raw)
        })
    };
    if word(0)? != IJ_MAGIC {
        return None;
    }

    let mut block = 1;
    let mut offset = header_size;
    for pair in 0..(header_size - 4) / 8 {
        let kind = word(4 + pair * 8)?;
        let count = word(8 + pair * 8)?;
        for _ in 0..count {
            let len = *counts.get(block)? as usize;
            if kind == IJ_INFO {
                let text = data.get(offset..offset.checked_add(len)?)?;
                let units: Vec<u16> = text
                    .chunks_exact(2)
                    .map(|b| {
                        if little_endian {
                            u16::from_le_bytes([b[0], b[1]])
                        } else {
                            u16::from_be_bytes([b[0], b[1]])
                        }
                    })
                    .collect();
                return Some(String::from_utf16_lossy(&units));
            }
            offset = offset.checked_add(len)?;
            block += 1;
        }
    }
    None
}

fn dimension(value: usize) -> Result<u32> {
    u32::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| StorageError::InvalidDimensions(format!("cannot encode dimension {}", value)))
}

/// Pixels per centimetre for a pixel size in micrometres
fn resolution_for_pixel_size(pixel_size_um: f64) -> Option<Rational> {
    if !(pixel_size_um.is_finite() && pixel_size_um > 0.0) {
        return None;
    }
    let per_cm = UM_PER_CM / pixel_size_um;
    let d: u32 = if per_cm * 1000.0 < u32::MAX as f64 { 1000 } else { 1 };
    let n = (per_cm * d as f64).round();
    if n < 1.0 || n > u32::MAX as f64 {
        return None;
    }
    Some(Rational { n: n as u32, d })
}

fn read_pixel_size<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<f64> {
    let unit = decoder.find_tag(Tag::ResolutionUnit).ok()??.into_u32().ok()?;
    if unit != RESOLUTION_UNIT_CM {
        return None;
    }
    match decoder.find_tag(Tag::XResolution).ok()?? {
        tiff::decoder::ifd::Value::Rational(n, d) if n > 0 && d > 0 => {
            Some(UM_PER_CM * d as f64 / n as f64)
        }
        _ => None,
    }
}

/// TIFF ASCII fields cannot hold non-ASCII text; JSON can carry it as
/// `\uXXXX` escapes instead.
fn escape_non_ascii(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    for c in json.chars() {
        if c.is_ascii() && c != '\0' {
            out.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    out
}

fn bgrx_to_rgb(pixels: &[u8]) -> Vec<u8> {
    pixels
        .chunks_exact(4)
        .flat_map(|p| [p[2], p[1], p[0]])
        .collect()
}

fn rgb_to_bgrx(pixels: &[u8]) -> Vec<u8> {
    pixels
        .chunks_exact(3)
        .flat_map(|p| [p[2], p[1], p[0], 0])
        .collect()
}

fn rgba_to_bgra(pixels: &[u8]) -> Vec<u8> {
    pixels
        .chunks_exact(4)
        .flat_map(|p| [p[2], p[1], p[0], p[3]])
        .collect()
}
