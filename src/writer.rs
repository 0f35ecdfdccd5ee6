//! Metadata stream writer
//!
//! Each stage position gets one append-only `metadata.txt` holding a JSON
//! object assembled record by record:
//!
//! ```text
//! {
//! "Summary": {...},
//! "Coords-Pos0/img_channel000_position000_time000000000_z000.tif": {...},
//! "Metadata-Pos0/img_channel000_position000_time000000000_z000.tif": {...}
//! }
//! ```
//!
//! The closing brace is only written when the dataset is finalized, so an
//! interrupted acquisition leaves a stream the reader must repair.

use crate::error::{Result, StorageError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error};

/// One open metadata stream
#[derive(Debug)]
pub struct MetadataStream {
    writer: BufWriter<File>,
    path: PathBuf,
    records: usize,
    finished: bool,
}

impl MetadataStream {
    /// Create the stream file and write the opening brace
    pub fn open(path: &Path) -> Result<Self> {
        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_all(b"{\n")?;
        writer.flush()?;
        Ok(Self {
            writer,
            path: path.to_path_buf(),
            records: 0,
            finished: false,
        })
    }

    /// Append a `"title": json` record; every record but the first is
    /// comma-prefixed. The stream is flushed after each record.
    pub fn append(&mut self, title: &str, json: &str) -> Result<()> {
        if self.finished {
            return Err(StorageError::Metadata(format!(
                "metadata stream {} is already closed",
                self.path.display()
            )));
        }
        if self.records > 0 {
            self.writer.write_all(b",\n")?;
        }
        self.writer.write_all(serde_json::to_string(title)?.as_bytes())?;
        self.writer.write_all(b": ")?;
        self.writer.write_all(json.as_bytes())?;
        self.writer.flush()?;
        self.records += 1;
        Ok(())
    }

    /// Write the terminator. Further appends fail; the file is released
    /// when the stream is dropped.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.writer.write_all(b"\n}\n")?;
        self.writer.flush()?;
        self.finished = true;
        debug!(path = %self.path.display(), records = self.records, "Closed metadata stream");
        Ok(())
    }

    /// Write the terminator and release the file
    pub fn close(mut self) -> Result<()> {
        self.finish()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> usize {
        self.records
    }
}

/// Metadata streams keyed by stage position index.
///
/// Streams for different positions lock independently; the map lock is only
/// held while a stream is looked up or registered.
#[derive(Debug, Default)]
pub struct MetadataStreams {
    streams: Mutex<HashMap<usize, Arc<Mutex<MetadataStream>>>>,
}

impl MetadataStreams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, position: usize) -> bool {
        self.streams.lock().contains_key(&position)
    }

    pub fn len(&self) -> usize {
        self.streams.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.lock().is_empty()
    }

    /// Open a stream for `position` at `path` and write its first record.
    ///
    /// Returns `Ok(false)` without touching disk if the position already has
    /// a stream.
    pub fn open_with<F>(&self, position: usize, path: &Path, first_record: F) -> Result<bool>
    where
        F: FnOnce(&mut MetadataStream) -> Result<()>,
    {
        let mut streams = self.streams.lock();
        if streams.contains_key(&position) {
            return Ok(false);
        }
        let mut stream = MetadataStream::open(path)?;
        first_record(&mut stream)?;
        streams.insert(position, Arc::new(Mutex::new(stream)));
        Ok(true)
    }

    /// Append a record to the stream for `position`
    pub fn append(&self, position: usize, title: &str, json: &str) -> Result<()> {
        let stream = self.streams.lock().get(&position).cloned();
        match stream {
            Some(stream) => stream.lock().append(title, json),
            None => Err(StorageError::Metadata(format!(
                "Failed to make a stream for location {}",
                position
            ))),
        }
    }

    /// Close every open stream. A failure on one stream is logged and the
    /// rest are still closed; the number of failures is returned.
    pub fn close_all(&self) -> usize {
        let drained: Vec<_> = self.streams.lock().drain().collect();
        let mut failures = 0;
        for (position, stream) in drained {
            let mut stream = stream.lock();
            if let Err(e) = stream.finish() {
                error!(
                    position,
                    path = %stream.path().display(),
                    error = %e,
                    "Failed to close metadata stream"
                );
                failures += 1;
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_stream_shape() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("metadata.txt");

        let mut stream = MetadataStream::open(&path).unwrap();
        stream.append("Summary", "{\"Prefix\": \"acq\"}").unwrap();
        stream.append("Coords-img.tif", "{\"FrameIndex\": 0}").unwrap();
        assert_eq!(stream.records(), 2);

        let unterminated = fs::read_to_string(&path).unwrap();
        assert!(serde_json::from_str::<Value>(&unterminated).is_err());

        stream.close().unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "{\n\"Summary\": {\"Prefix\": \"acq\"},\n\"Coords-img.tif\": {\"FrameIndex\": 0}\n}\n"
        );
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["Summary"]["Prefix"], "acq");
    }

    #[test]
    fn test_streams_per_position() {
        let temp_dir = TempDir::new().unwrap();
        let streams = MetadataStreams::new();
        let p0 = temp_dir.path().join("p0.txt");
        let p1 = temp_dir.path().join("p1.txt");

        assert!(streams
            .open_with(0, &p0, |s| s.append("Summary", "{}"))
            .unwrap());
        assert!(!streams
            .open_with(0, &p0, |s| s.append("Summary", "{}"))
            .unwrap());
        streams.open_with(1, &p1, |s| s.append("Summary", "{}")).unwrap();
        streams.append(1, "Coords-a.tif", "{}").unwrap();
        assert!(streams.append(7, "Coords-b.tif", "{}").is_err());

        assert_eq!(streams.close_all(), 0);
        assert!(streams.is_empty());
        for path in [p0, p1] {
            let text = fs::read_to_string(path).unwrap();
            assert!(serde_json::from_str::<Value>(&text).is_ok());
        }
        // Closing again is a no-op
        assert_eq!(streams.close_all(), 0);
    }
}
