//! Single-plane TIFF series storage - the main API for writing and reading datasets
//!
//! A dataset is a directory holding one TIFF file per image plane plus one
//! `metadata.txt` stream per stage position. A dataset is created writable
//! (the directory must not exist yet) or opened read-only, in which case the
//! whole index is rebuilt from the metadata streams before `open` returns.
//! Pixel data is only read when an image is requested.

use crate::codec::{RasterCodec, TiffCodec};
use crate::config::StorageConfig;
use crate::coords::{Coords, ALLOWED_AXES};
use crate::error::{Result, StorageError};
use crate::image::Image;
use crate::index::DatasetIndex;
use crate::io::{join_relative, DatasetFs};
use crate::layout::{encode_current, encode_legacy, position_directory};
use crate::metadata::{start_date_from_received_time, Metadata, MetadataFormat, SummaryMetadata};
use crate::reader::{parse_stream, ParseAttempt, ParsedStream, Record, StreamParse};
use crate::utils::{format_bytes, json_string};
use crate::writer::MetadataStreams;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Lifecycle state of a dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetState {
    /// Created by this process; accepting images
    Writable,
    /// Index being rebuilt from disk
    Recovering,
    /// Opened from disk, or finalized after writing
    ReadOnly,
}

/// Where a recovered record's image lives, and what it claims about its position
#[derive(Debug)]
struct ResolvedRecord {
    coords: Coords,
    file_name: String,
    position_name: Option<String>,
}

/// Storage backed by a directory of single-plane TIFF files
pub struct SinglePlaneTiffStorage {
    fs: DatasetFs,
    config: StorageConfig,
    codec: Box<dyn RasterCodec>,
    state: RwLock<DatasetState>,
    index: RwLock<DatasetIndex>,
    summary: RwLock<SummaryMetadata>,
    streams: MetadataStreams,
}

impl SinglePlaneTiffStorage {
    /// Create a new, writable dataset at `path`
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::create_with(path, StorageConfig::default(), Box::new(TiffCodec))
    }

    /// Create a new dataset with explicit configuration and codec.
    ///
    /// Fails if anything already exists at `path`. Directories are created
    /// lazily as images arrive.
    pub fn create_with(
        path: impl AsRef<Path>,
        config: StorageConfig,
        codec: Box<dyn RasterCodec>,
    ) -> Result<Self> {
        config.validate()?;
        let fs = DatasetFs::new(path);
        if fs.root_exists() {
            return Err(StorageError::AlreadyExists(fs.root().to_path_buf()));
        }
        info!(path = %fs.root().display(), "Creating single-plane TIFF dataset");
        Ok(Self::new(fs, config, codec, DatasetState::Writable))
    }

    /// Open an existing dataset read-only
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, StorageConfig::default(), Box::new(TiffCodec))
    }

    /// Open an existing dataset with explicit configuration and codec.
    ///
    /// Fails only if the directory holds neither a root metadata stream nor
    /// any position subdirectory. Unreadable streams and missing files are
    /// logged and skipped.
    pub fn open_with(
        path: impl AsRef<Path>,
        config: StorageConfig,
        codec: Box<dyn RasterCodec>,
    ) -> Result<Self> {
        config.validate()?;
        let storage = Self::new(DatasetFs::new(path), config, codec, DatasetState::Recovering);
        storage.recover()?;
        *storage.state.write() = DatasetState::ReadOnly;
        info!(
            path = %storage.root().display(),
            images = storage.num_images(),
            "Opened single-plane TIFF dataset"
        );
        Ok(storage)
    }

    fn new(
        fs: DatasetFs,
        config: StorageConfig,
        codec: Box<dyn RasterCodec>,
        state: DatasetState,
    ) -> Self {
        Self {
            fs,
            config,
            codec,
            state: RwLock::new(state),
            index: RwLock::new(DatasetIndex::new()),
            summary: RwLock::new(SummaryMetadata::default()),
            streams: MetadataStreams::new(),
        }
    }

    pub fn root(&self) -> &Path {
        self.fs.root()
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn state(&self) -> DatasetState {
        *self.state.read()
    }

    pub fn is_writable(&self) -> bool {
        self.state() == DatasetState::Writable
    }

    // ------------------------------------------------------------------
    // Write path
    // ------------------------------------------------------------------

    /// Store one image.
    ///
    /// Rejected without any state change if the image carries an axis other
    /// than channel/time/z/position, or if the dataset is read-only. An image
    /// at stage position > 0 must carry a position name, and a position index
    /// can never be renamed; both are fatal. I/O failures while writing the
    /// TIFF or the metadata stream are logged and the image is still indexed.
    pub fn put_image(&self, image: &Image) -> Result<()> {
        let coords = image.coords();
        if let Some(axis) = coords.disallowed_axis() {
            let err = StorageError::DisallowedAxis {
                axis: axis.to_string(),
                allowed: format!("{:?}", ALLOWED_AXES),
            };
            error!(coords = %coords, "{}", err);
            return Err(err);
        }
        if self.state() != DatasetState::Writable {
            error!(coords = %coords, "Attempted to add an image to a read-only dataset");
            return Err(StorageError::ReadOnly);
        }
        if coords.stage_position().unwrap_or(0) > 0 && image.position_name().is_none() {
            return Err(StorageError::MissingPositionName(coords.to_string()));
        }

        let position = coords.stage_position().unwrap_or(0);
        let directory = position_directory(image);
        if let Some(stage) = coords.stage_position() {
            self.index.write().bind_position(stage, &directory)?;
        }

        let file_name = join_relative(&directory, &encode_current(coords));
        self.ensure_stream(position, &directory, image);

        let image_json = match self.image_json(image, &file_name) {
            Ok(json) => json,
            Err(e) => {
                error!(file = %file_name, error = %e, "Unable to serialize image metadata");
                return Err(e);
            }
        };
        self.save_image_file(image, &file_name, &image_json);
        self.write_frame_metadata(position, coords, &file_name, &image_json);

        let mut index = self.index.write();
        if !index.insert(coords.clone(), file_name.clone()) {
            debug!(coords = %coords, file = %file_name, "Overwrote existing image");
        }
        Ok(())
    }

    /// Open the metadata stream for `position` if this is its first image
    fn ensure_stream(&self, position: usize, directory: &str, image: &Image) {
        if self.streams.contains(position) {
            return;
        }
        if let Err(e) = self.fs.create_dir_all(directory) {
            let dir = self.fs.full_path(directory);
            error!(dir = %dir.display(), error = %e, "Unable to create save directory");
            return;
        }
        let path = self
            .fs
            .full_path(&join_relative(directory, &self.config.metadata_file_name));
        let opened = self.summary_record(image).and_then(|summary| {
            self.streams
                .open_with(position, &path, |stream| stream.append("Summary", &summary))
        });
        match opened {
            Ok(true) => debug!(position, path = %path.display(), "Opened metadata stream"),
            Ok(false) => {}
            Err(e) => error!(position, path = %path.display(), error = %e, "Unable to open metadata stream"),
        }
    }

    /// Summary record for a new stream: the current summary, with a start
    /// date taken from the image if none is set, plus the image's pixel type
    fn summary_record(&self, image: &Image) -> Result<String> {
        let mut summary = self.summary.read().clone();
        if summary.start_date.is_none() {
            summary.start_date = image
                .metadata()
                .and_then(|m| m.received_time.as_deref())
                .and_then(start_date_from_received_time);
        }
        let mut json = summary.to_json()?;
        json.insert("PixelType".into(), Value::from(image.pixel_type().as_str()));
        json.insert("IJType".into(), Value::from(image.pixel_type().ij_type()));
        self.config.render_json(&Value::Object(json))
    }

    /// Format, coordinates, and metadata as one JSON object
    fn image_json(&self, image: &Image, file_name: &str) -> Result<String> {
        let mut metadata = image.metadata().cloned().unwrap_or_default();
        if metadata.uuid.is_none() {
            metadata.uuid = Some(Uuid::new_v4());
        }
        let metadata = metadata.with_file_name(file_name);

        let mut json = image.format_json();
        json.extend(image.coords().to_json());
        json.extend(metadata.to_json()?);
        self.config.render_json(&Value::Object(json))
    }

    fn save_image_file(&self, image: &Image, file_name: &str, image_json: &str) {
        let path = self.fs.full_path(file_name);
        let pixel_size = if self.config.write_calibration {
            image.metadata().and_then(|m| m.pixel_size_um)
        } else {
            None
        };
        if let Err(e) = self.codec.encode(&path, image, image_json, pixel_size) {
            error!(path = %path.display(), error = %e, "Unable to save image file");
        }
    }

    fn write_frame_metadata(&self, position: usize, coords: &Coords, file_name: &str, image_json: &str) {
        let result = self
            .config
            .render_json(&Value::Object(coords.to_json()))
            .and_then(|coords_json| {
                self.streams
                    .append(position, &format!("Coords-{}", file_name), &coords_json)
            })
            .and_then(|_| {
                self.streams
                    .append(position, &format!("Metadata-{}", file_name), image_json)
            });
        if let Err(e) = result {
            error!(position, file = %file_name, error = %e, "Unable to write image metadata");
        }
    }

    /// Finalize the dataset: terminate and release every metadata stream and
    /// stop accepting images. Idempotent; a no-op for read-only datasets.
    pub fn freeze(&self) {
        let mut state = self.state.write();
        if *state != DatasetState::Writable {
            return;
        }
        let failures = self.streams.close_all();
        if failures > 0 {
            warn!(failures, path = %self.root().display(), "Some metadata streams failed to close");
        }
        *state = DatasetState::ReadOnly;
        info!(path = %self.root().display(), images = self.num_images(), "Finalized dataset");
    }

    /// Release the dataset. Finalizes unless recovery is in progress.
    pub fn close(&self) {
        if self.state() != DatasetState::Recovering {
            self.freeze();
        }
    }

    // ------------------------------------------------------------------
    // Read path
    // ------------------------------------------------------------------

    /// Load the image stored at `coords`.
    ///
    /// Returns `None`, after logging why, if the coordinates are unknown, the
    /// file cannot be decoded, its pixel layout is not recognized, or its
    /// embedded info text is not metadata JSON. A file without info text
    /// yields an image without metadata.
    pub fn get_image(&self, coords: &Coords) -> Option<Image> {
        let file_name = self.index.read().file_name(coords).map(str::to_string);
        let Some(file_name) = file_name else {
            error!(coords = %coords, "Asked for image that we don't know about");
            return None;
        };

        let path = self.fs.full_path(&file_name);
        let raster = match self.codec.decode(&path) {
            Ok(raster) => raster,
            Err(e) => {
                error!(path = %path.display(), error = %e, "Unable to load image");
                return None;
            }
        };

        let mut metadata = match raster.info.as_deref().map(Metadata::from_json_str) {
            Some(Ok((metadata, format))) => {
                if format == MetadataFormat::Legacy {
                    debug!(path = %path.display(), "Read 1.x image metadata");
                }
                Some(metadata)
            }
            Some(Err(e)) => {
                error!(path = %path.display(), error = %e, "Unable to extract metadata from image info");
                return None;
            }
            None => {
                warn!(coords = %coords, "Unable to reconstruct metadata for image");
                None
            }
        };
        if let (Some(md), Some(size)) = (metadata.as_mut(), raster.pixel_size_um) {
            md.pixel_size_um.get_or_insert(size);
        }

        match Image::new(raster.pixels, raster.width, raster.height, raster.pixel_type, coords.clone()) {
            Ok(image) => Some(match metadata {
                Some(md) => image.with_metadata(md),
                None => image,
            }),
            Err(e) => {
                error!(path = %path.display(), error = %e, "Decoded image is inconsistent");
                None
            }
        }
    }

    /// Every stored image agreeing with `partial` on the axes it specifies.
    /// Images that fail to load are left out.
    pub fn get_images_matching(&self, partial: &Coords) -> Vec<Image> {
        let matches = self.index.read().matching(partial);
        matches
            .iter()
            .filter_map(|coords| self.get_image(coords))
            .collect()
    }

    /// Some stored image, if there are any
    pub fn get_any_image(&self) -> Option<Image> {
        let coords = self.index.read().coords().next().cloned()?;
        self.get_image(&coords)
    }

    pub fn get_unordered_image_coords(&self) -> Vec<Coords> {
        self.index.read().coords().cloned().collect()
    }

    pub fn has_image(&self, coords: &Coords) -> bool {
        self.index.read().contains(coords)
    }

    /// Largest index seen along `axis`, or `None` if no image carries it
    pub fn get_max_index(&self, axis: &str) -> Option<usize> {
        self.index.read().max_index(axis)
    }

    pub fn get_max_indices(&self) -> Coords {
        self.index.read().max_indices().clone()
    }

    pub fn num_images(&self) -> usize {
        self.index.read().len()
    }

    /// Axis order from the summary metadata, or the axes seen so far in
    /// lexicographic order if the summary has none
    pub fn get_axes(&self) -> Vec<String> {
        if let Some(axes) = self.summary.read().ordered_axes() {
            if !axes.is_empty() {
                return axes.to_vec();
            }
        }
        self.index
            .read()
            .max_indices()
            .axes()
            .map(str::to_string)
            .collect()
    }

    /// Relative file name stored for `coords`
    pub fn file_name(&self, coords: &Coords) -> Option<String> {
        self.index.read().file_name(coords).map(str::to_string)
    }

    pub fn summary_metadata(&self) -> SummaryMetadata {
        self.summary.read().clone()
    }

    /// Replace the summary metadata. Streams opened afterwards record the
    /// new summary; already open streams keep the one they started with.
    pub fn set_summary_metadata(&self, summary: SummaryMetadata) {
        *self.summary.write() = summary;
    }

    pub fn position_names(&self) -> BTreeMap<usize, String> {
        self.index.read().position_names().clone()
    }

    /// Channel names assigned to indices while reading a 1.x dataset
    pub fn legacy_channel_names(&self) -> Vec<String> {
        self.index.read().channels().names().to_vec()
    }

    pub fn stats(&self) -> DatasetStats {
        let index = self.index.read();
        let bytes_on_disk = index
            .entries()
            .filter_map(|(_, file)| self.fs.size(file).ok())
            .sum();
        DatasetStats {
            num_images: index.len(),
            num_positions: index.position_names().len(),
            max_indices: index.max_indices().clone(),
            bytes_on_disk,
            state: self.state(),
        }
    }

    // ------------------------------------------------------------------
    // Recovery
    // ------------------------------------------------------------------

    /// Rebuild the index from the dataset's metadata streams
    fn recover(&self) -> Result<()> {
        let positions = if self.fs.is_file(&self.config.metadata_file_name) {
            vec![String::new()]
        } else {
            self.fs.list_dirs("").unwrap_or_default()
        };
        if positions.is_empty() {
            return Err(StorageError::DatasetNotFound(self.root().to_path_buf()));
        }
        debug!(positions = ?positions, "Recovering dataset");

        let mut index = self.index.write();
        for position in &positions {
            let Some(stream) = self.read_stream(position) else {
                continue;
            };
            if let Some(summary) = stream.summary() {
                self.adopt_summary(summary);
            }

            for record in stream.records() {
                let resolved = match record {
                    Record::Coords { file, value } => {
                        self.resolve_current(&mut index, &stream, position, file, value)
                    }
                    Record::FrameKey {
                        key,
                        time,
                        channel,
                        z,
                        value,
                    } => self.resolve_legacy(&mut index, position, key, (time, channel, z), value),
                    Record::MalformedFrameKey(key) => {
                        error!(key, position = %position, "Unparsable 1.x frame key");
                        continue;
                    }
                    Record::Summary(_) | Record::Metadata { .. } | Record::Other(_) => continue,
                };
                Self::register_recovered(&mut index, resolved);
            }
        }
        Ok(())
    }

    /// Read and parse one position's stream; failures are logged
    fn read_stream(&self, position: &str) -> Option<ParsedStream> {
        let relative = join_relative(position, &self.config.metadata_file_name);
        let path = self.fs.full_path(&relative);
        let text = match self.fs.read_to_string(&relative) {
            Ok(text) => text,
            Err(e) => {
                error!(path = %path.display(), error = %e, "Unable to read text file");
                return None;
            }
        };
        match parse_stream(&text) {
            StreamParse::Parsed(stream) => {
                if stream.attempt() != ParseAttempt::Strict {
                    warn!(
                        path = %path.display(),
                        repair = %stream.attempt(),
                        "Recovered damaged metadata stream"
                    );
                }
                Some(stream)
            }
            StreamParse::Unreadable(failures) => {
                error!(
                    position = %position,
                    path = %path.display(),
                    attempts = ?failures,
                    "Couldn't load metadata for position"
                );
                None
            }
        }
    }

    fn adopt_summary(&self, value: &Value) {
        match SummaryMetadata::from_json(value) {
            Ok((summary, _)) => *self.summary.write() = summary,
            Err(e) => warn!(error = %e, "Ignoring unreadable summary metadata"),
        }
    }

    /// `Coords-*` record: the file name is derived from the coordinates
    fn resolve_current(
        &self,
        index: &mut DatasetIndex,
        stream: &ParsedStream,
        position: &str,
        record_file: &str,
        value: &Value,
    ) -> ResolvedRecord {
        let coords = Coords::from_json(value);
        let position_name = stream
            .metadata_for(record_file)
            .and_then(|md| Metadata::from_json(md).ok())
            .and_then(|(md, _)| md.valid_position_name().map(str::to_string))
            .or_else(|| non_empty(position));

        let current = encode_current(&coords);
        let file_name = match self.locate(position, &current) {
            Some(found) => found,
            None if self.config.legacy_fallback && coords.channel().is_some() => {
                self.scan_channels(index, position);
                let legacy = encode_legacy(&coords, index.channels());
                self.locate(position, &legacy)
                    .unwrap_or_else(|| self.missing_file(record_file, position, &current))
            }
            None => self.missing_file(record_file, position, &current),
        };

        ResolvedRecord {
            coords,
            file_name,
            position_name,
        }
    }

    /// `FrameKey-*` record: 1.x layout with channel names in file names
    fn resolve_legacy(
        &self,
        index: &mut DatasetIndex,
        position: &str,
        key: &str,
        (time, channel, z): (usize, usize, usize),
        value: &Value,
    ) -> ResolvedRecord {
        if let Some(summary) = value.get("Summary") {
            self.adopt_summary(summary);
        }

        let embedded = Coords::from_json(value);
        let mut builder = Coords::builder().time(time).channel(channel).z(z);
        if let Some(stage) = embedded.stage_position() {
            builder = builder.stage_position(stage);
        }
        let coords = builder.build();

        let position_name = value
            .get("PositionName")
            .and_then(json_string)
            .filter(|name| !name.is_empty())
            .or_else(|| non_empty(position));

        self.scan_channels(index, position);
        let legacy = encode_legacy(&coords, index.channels());
        let file_name = self
            .locate(position, &legacy)
            .unwrap_or_else(|| self.missing_file(key, position, &legacy));

        ResolvedRecord {
            coords,
            file_name,
            position_name,
        }
    }

    fn scan_channels(&self, index: &mut DatasetIndex, position: &str) {
        if let Err(e) = index.channels_mut().scan(&self.fs, position) {
            error!(position = %position, error = %e, "Unable to scan for 1.x channel names");
        }
    }

    /// Find `name` at the dataset root, then in the position directory
    fn locate(&self, position: &str, name: &str) -> Option<String> {
        if self.fs.is_file(name) {
            return Some(name.to_string());
        }
        let nested = join_relative(position, name);
        if !position.is_empty() && self.fs.is_file(&nested) {
            return Some(nested);
        }
        None
    }

    fn missing_file(&self, key: &str, position: &str, name: &str) -> String {
        let expected = join_relative(position, name);
        error!(key, file = %expected, "Tried to find image file but it did not exist");
        expected
    }

    /// Update the index exactly as a live write would, except that a
    /// recovered mapping replaces any earlier one for the same coordinates
    fn register_recovered(index: &mut DatasetIndex, resolved: ResolvedRecord) {
        let ResolvedRecord {
            coords,
            file_name,
            position_name,
        } = resolved;
        if let Some(stage) = coords.stage_position() {
            let name = position_name.unwrap_or_default();
            if let Err(e) = index.bind_position(stage, &name) {
                error!(coords = %coords, file = %file_name, error = %e, "Skipping recovered image");
                return;
            }
        }
        index.replace(coords, file_name);
    }
}

impl Drop for SinglePlaneTiffStorage {
    fn drop(&mut self) {
        self.close();
    }
}

fn non_empty(name: &str) -> Option<String> {
    (!name.is_empty()).then(|| name.to_string())
}

/// Dataset statistics
#[derive(Debug, Clone)]
pub struct DatasetStats {
    pub num_images: usize,
    pub num_positions: usize,
    pub max_indices: Coords,
    pub bytes_on_disk: usize,
    pub state: DatasetState,
}

impl DatasetStats {
    pub fn summary(&self) -> String {
        format!(
            "{} images across {} positions, max indices {}, {} on disk ({:?})",
            self.num_images,
            self.num_positions,
            self.max_indices,
            format_bytes(self.bytes_on_disk),
            self.state,
        )
    }
}

/// Path of the metadata stream for a position directory
pub fn metadata_stream_path(root: &Path, position: &str, config: &StorageConfig) -> PathBuf {
    DatasetFs::new(root).full_path(&join_relative(position, &config.metadata_file_name))
}
