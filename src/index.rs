//! Dataset index - the in-memory map from coordinates to image files

use crate::coords::Coords;
use crate::error::{Result, StorageError};
use crate::layout::ChannelTable;
use std::collections::{BTreeMap, HashMap};

/// In-memory index of a dataset.
///
/// Holds the coordinates→relative file name map, the running maximum index
/// along every axis seen, the stage position names, and (for 1.x datasets)
/// the channel name table.
#[derive(Debug, Clone, Default)]
pub struct DatasetIndex {
    files: HashMap<Coords, String>,
    max_indices: Coords,
    position_names: BTreeMap<usize, String>,
    channels: ChannelTable,
}

impl DatasetIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check that binding `index` to `name` would not rebind an existing
    /// position to a different name
    pub fn check_position(&self, index: usize, name: &str) -> Result<()> {
        match self.position_names.get(&index) {
            Some(existing) if existing != name => Err(StorageError::PositionNameConflict {
                index,
                existing: existing.clone(),
                requested: name.to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Bind a stage position index to its name. The first binding is final.
    pub fn bind_position(&mut self, index: usize, name: &str) -> Result<()> {
        self.check_position(index, name)?;
        self.position_names
            .entry(index)
            .or_insert_with(|| name.to_string());
        Ok(())
    }

    /// Record `coords` → `file` unless `coords` is already present.
    /// Returns true if the entry was added.
    pub fn insert(&mut self, coords: Coords, file: impl Into<String>) -> bool {
        if self.files.contains_key(&coords) {
            return false;
        }
        self.observe(&coords);
        self.files.insert(coords, file.into());
        true
    }

    /// Record `coords` → `file`, replacing any earlier mapping
    pub fn replace(&mut self, coords: Coords, file: impl Into<String>) -> Option<String> {
        self.observe(&coords);
        self.files.insert(coords, file.into())
    }

    /// Fold `coords` into the running per-axis maxima
    pub fn observe(&mut self, coords: &Coords) {
        self.max_indices = self.max_indices.max_with(coords);
    }

    pub fn file_name(&self, coords: &Coords) -> Option<&str> {
        self.files.get(coords).map(|s| s.as_str())
    }

    pub fn contains(&self, coords: &Coords) -> bool {
        self.files.contains_key(coords)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Stored coordinates, in no particular order
    pub fn coords(&self) -> impl Iterator<Item = &Coords> {
        self.files.keys()
    }

    /// (coords, file name) pairs, in no particular order
    pub fn entries(&self) -> impl Iterator<Item = (&Coords, &str)> {
        self.files.iter().map(|(c, f)| (c, f.as_str()))
    }

    /// Every stored key agreeing with `partial` on the axes it specifies
    pub fn matching(&self, partial: &Coords) -> Vec<Coords> {
        self.files
            .keys()
            .filter(|coords| coords.matches(partial))
            .cloned()
            .collect()
    }

    pub fn max_index(&self, axis: &str) -> Option<usize> {
        self.max_indices.index(axis)
    }

    pub fn max_indices(&self) -> &Coords {
        &self.max_indices
    }

    pub fn position_name(&self, index: usize) -> Option<&str> {
        self.position_names.get(&index).map(|s| s.as_str())
    }

    pub fn position_names(&self) -> &BTreeMap<usize, String> {
        &self.position_names
    }

    pub fn channels(&self) -> &ChannelTable {
        &self.channels
    }

    pub fn channels_mut(&mut self) -> &mut ChannelTable {
        &mut self.channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(c: usize, t: usize) -> Coords {
        Coords::builder().channel(c).time(t).build()
    }

    #[test]
    fn test_insert_keeps_first() {
        let mut index = DatasetIndex::new();
        assert!(index.insert(key(0, 0), "a.tif"));
        assert!(!index.insert(key(0, 0), "b.tif"));
        assert_eq!(index.file_name(&key(0, 0)), Some("a.tif"));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_replace_last_wins() {
        let mut index = DatasetIndex::new();
        index.replace(key(0, 0), "a.tif");
        assert_eq!(index.replace(key(0, 0), "b.tif").as_deref(), Some("a.tif"));
        assert_eq!(index.file_name(&key(0, 0)), Some("b.tif"));
    }

    #[test]
    fn test_maxima_monotonic() {
        let mut index = DatasetIndex::new();
        let mut previous = 0;
        for (c, t) in [(2, 5), (0, 1), (3, 0), (1, 9), (0, 0)] {
            index.insert(key(c, t), format!("{}-{}", c, t));
            let max_t = index.max_index("time").unwrap();
            assert!(max_t >= previous);
            previous = max_t;
        }
        assert_eq!(index.max_index("channel"), Some(3));
        assert_eq!(index.max_index("time"), Some(9));
        assert_eq!(index.max_index("z"), None);
    }

    #[test]
    fn test_position_binding() {
        let mut index = DatasetIndex::new();
        index.bind_position(2, "A").unwrap();
        index.bind_position(2, "A").unwrap();
        let err = index.bind_position(2, "B").unwrap_err();
        assert!(matches!(
            err,
            StorageError::PositionNameConflict { index: 2, .. }
        ));
        assert_eq!(index.position_name(2), Some("A"));
        index.bind_position(3, "B").unwrap();
        assert_eq!(index.position_names().len(), 2);
    }

    #[test]
    fn test_matching() {
        let mut index = DatasetIndex::new();
        for c in 0..3 {
            for t in 0..4 {
                index.insert(key(c, t), format!("{}-{}", c, t));
            }
        }
        assert_eq!(index.matching(&Coords::builder().channel(1).build()).len(), 4);
        assert_eq!(index.matching(&Coords::builder().time(2).build()).len(), 3);
        assert_eq!(index.matching(&Coords::default()).len(), 12);
        assert!(index.matching(&Coords::builder().z(0).build()).is_empty());
    }
}
