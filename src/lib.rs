//! mmtiff - single-plane TIFF series storage for microscopy acquisitions
//!
//! Stores every image plane of a multi-dimensional acquisition (channel,
//! time, z, stage position) as its own TIFF file, with a per-position
//! `metadata.txt` stream recording summary and per-image metadata as it is
//! written. Datasets written by this crate, and by older 1.x writers, can be
//! reopened read-only; the index is rebuilt from the metadata streams and
//! tolerates streams that were never finalized.
//!
//! # Features
//!
//! - Coordinate-addressed image storage with per-axis maxima
//! - One directory and one metadata stream per named stage position
//! - Recovery of truncated metadata streams
//! - Reading of 1.x datasets (`FrameKey-*` records, channel names in file names)
//! - Pixel-size calibration stored in TIFF resolution tags
//!
//! # Example
//!
//! ```rust,no_run
//! use mmtiff::{Coords, Image, PixelType, SinglePlaneTiffStorage};
//!
//! # fn example() -> mmtiff::Result<()> {
//! let storage = SinglePlaneTiffStorage::create("/data/acq_1")?;
//! let coords = Coords::builder().channel(0).time(0).build();
//! storage.put_image(&Image::new(vec![0u8; 64], 8, 8, PixelType::Gray8, coords.clone())?)?;
//! storage.freeze();
//!
//! let reopened = SinglePlaneTiffStorage::open("/data/acq_1")?;
//! let image = reopened.get_image(&coords);
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod coords;
pub mod error;
pub mod image;
pub mod index;
pub mod io;
pub mod layout;
pub mod metadata;
pub mod reader;
pub mod storage;
pub mod types;
pub mod utils;
pub mod writer;

// Re-exports
pub use codec::{DecodedRaster, RasterCodec, TiffCodec};
pub use config::StorageConfig;
pub use coords::{Coords, CoordsBuilder};
pub use error::{Result, StorageError};
pub use image::Image;
pub use metadata::{Metadata, MetadataFormat, SummaryMetadata};
pub use storage::{DatasetState, DatasetStats, SinglePlaneTiffStorage};
pub use types::PixelType;

/// Version of the mmtiff implementation
pub const MMTIFF_VERSION: &str = env!("CARGO_PKG_VERSION");
