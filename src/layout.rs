//! Dataset layout - how image coordinates map to file names on disk
//!
//! Current datasets name each file after every axis the image carries,
//! sorted by axis name: `img_channel000_position001_time000000004_z012.tif`.
//! The time axis gets nine digits, every other axis three.
//!
//! 1.x datasets used `img_<time>_<channel name>_<z>.tif` and never recorded
//! which channel index a name belonged to. [`ChannelTable`] rebuilds that
//! mapping by sorting the channel names found on disk.

use crate::coords::{Coords, TIME};
use crate::error::Result;
use crate::image::Image;
use crate::io::DatasetFs;
use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, error};

/// Extension of every image file
pub const IMAGE_EXTENSION: &str = "tif";

fn legacy_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^img_(\d+)_(.*)_(\d+)\.tif$").expect("valid regex"))
}

/// Current-format file name for `coords`
pub fn encode_current(coords: &Coords) -> String {
    let mut name = String::from("img");
    for (axis, index) in coords.iter() {
        if axis == TIME {
            name.push_str(&format!("_{}{:09}", axis, index));
        } else {
            name.push_str(&format!("_{}{:03}", axis, index));
        }
    }
    name.push('.');
    name.push_str(IMAGE_EXTENSION);
    name
}

/// 1.x file name for `coords`.
///
/// An unknown channel index is logged and encoded with an empty channel name;
/// legacy recovery is best-effort. Missing time or z axes are written as 0.
pub fn encode_legacy(coords: &Coords, channels: &ChannelTable) -> String {
    let channel = match coords.channel() {
        Some(index) => match channels.name(index) {
            Some(name) => name,
            None => {
                error!(
                    channel = index,
                    table = ?channels.names(),
                    "Invalid channel index into channel list"
                );
                ""
            }
        },
        None => {
            error!(coords = %coords, "Legacy file name requested for image without channel");
            ""
        }
    };
    format!(
        "img_{:09}_{}_{:03}.{}",
        coords.time().unwrap_or(0),
        channel,
        coords.z().unwrap_or(0),
        IMAGE_EXTENSION
    )
}

/// Fields of a 1.x file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyFileName {
    pub time: usize,
    pub channel: String,
    pub z: usize,
}

/// Parse a 1.x file name, or `None` if it does not follow the pattern
pub fn parse_legacy(file_name: &str) -> Option<LegacyFileName> {
    let caps = legacy_pattern().captures(file_name)?;
    Some(LegacyFileName {
        time: caps[1].parse().ok()?,
        channel: caps[2].to_string(),
        z: caps[3].parse().ok()?,
    })
}

/// Directory (relative to the dataset root) holding an image's file and
/// metadata stream: the position name for images on the stage-position
/// axis, the root otherwise.
pub fn position_directory(image: &Image) -> String {
    if image.coords().stage_position().is_none() {
        return String::new();
    }
    image.position_name().unwrap_or_default().to_string()
}

/// Ordered, de-duplicated channel names; array position is the channel index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelTable {
    names: Vec<String>,
}

impl ChannelTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table directly from names; duplicates are dropped and the
    /// result sorted
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = names.into_iter().map(Into::into).collect();
        names.sort();
        names.dedup();
        Self { names }
    }

    /// Populate from the 1.x file names in `dir`.
    ///
    /// Once the table is non-empty this is a no-op: the first successful scan
    /// fixes the channel order for the lifetime of the dataset.
    pub fn scan(&mut self, fs: &DatasetFs, dir: &str) -> Result<()> {
        if !self.names.is_empty() {
            return Ok(());
        }
        let found = fs
            .list_files(dir)?
            .into_iter()
            .filter_map(|name| parse_legacy(&name))
            .map(|parsed| parsed.channel);
        *self = Self::from_names(found);
        debug!(dir, channels = ?self.names, "Assigned legacy channel indices");
        Ok(())
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(|s| s.as_str())
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
