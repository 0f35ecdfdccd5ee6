//! Coordinate keys identifying one 2D image plane within a dataset

use crate::utils::json_index;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Channel axis
pub const CHANNEL: &str = "channel";
/// Time point axis
pub const TIME: &str = "time";
/// Z-slice axis
pub const Z: &str = "z";
/// Stage position axis
pub const STAGE_POSITION: &str = "position";

/// The only axes a single-plane TIFF series can store.
pub const ALLOWED_AXES: [&str; 4] = [CHANNEL, TIME, Z, STAGE_POSITION];

/// Axis name to JSON key, as written in `Coords-*` records and TIFF metadata.
const LEGACY_KEYS: [(&str, &str); 4] = [
    (CHANNEL, "ChannelIndex"),
    (TIME, "FrameIndex"),
    (Z, "SliceIndex"),
    (STAGE_POSITION, "PositionIndex"),
];

/// Immutable mapping from axis name to index.
///
/// Axes that are absent are unset, not zero: `{time: 0}` and
/// `{time: 0, z: 0}` are different keys. Axes iterate in lexicographic
/// order, which is also the order used for file names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Coords {
    indices: BTreeMap<String, usize>,
}

impl Coords {
    /// Start building a new key
    pub fn builder() -> CoordsBuilder {
        CoordsBuilder::default()
    }

    /// Copy this key into a builder for copy-on-write modification
    pub fn copy_builder(&self) -> CoordsBuilder {
        CoordsBuilder {
            indices: self.indices.clone(),
        }
    }

    /// Index along `axis`, if the axis is present
    pub fn index(&self, axis: &str) -> Option<usize> {
        self.indices.get(axis).copied()
    }

    pub fn channel(&self) -> Option<usize> {
        self.index(CHANNEL)
    }

    pub fn time(&self) -> Option<usize> {
        self.index(TIME)
    }

    pub fn z(&self) -> Option<usize> {
        self.index(Z)
    }

    pub fn stage_position(&self) -> Option<usize> {
        self.index(STAGE_POSITION)
    }

    pub fn has_axis(&self, axis: &str) -> bool {
        self.indices.contains_key(axis)
    }

    /// Axis names in lexicographic order
    pub fn axes(&self) -> impl Iterator<Item = &str> {
        self.indices.keys().map(|s| s.as_str())
    }

    /// (axis, index) pairs in lexicographic axis order
    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.indices.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// First axis not in [`ALLOWED_AXES`], if any
    pub fn disallowed_axis(&self) -> Option<&str> {
        self.axes().find(|axis| !ALLOWED_AXES.contains(axis))
    }

    /// True if `self` agrees with `partial` on every axis `partial` specifies.
    /// Axes `partial` omits are unconstrained.
    pub fn matches(&self, partial: &Coords) -> bool {
        partial
            .iter()
            .all(|(axis, index)| self.index(axis) == Some(index))
    }

    /// Per-axis maximum of `self` and `other`, over the union of their axes
    pub fn max_with(&self, other: &Coords) -> Coords {
        let mut indices = self.indices.clone();
        for (axis, index) in other.iter() {
            let entry = indices.entry(axis.to_string()).or_insert(index);
            if index > *entry {
                *entry = index;
            }
        }
        Coords { indices }
    }

    /// Coordinates as a JSON object using the `ChannelIndex`/`FrameIndex`/
    /// `SliceIndex`/`PositionIndex` schema. Axes outside that schema are dropped.
    pub fn to_json(&self) -> Map<String, Value> {
        let mut map = Map::new();
        for (axis, key) in LEGACY_KEYS {
            if let Some(index) = self.index(axis) {
                map.insert(key.to_string(), Value::from(index));
            }
        }
        map
    }

    /// Recover coordinates from any JSON object carrying the index keys.
    ///
    /// Other keys are ignored, so this works on `Coords-*` records, on full
    /// per-image metadata objects, and on 1.x `FrameKey-*` objects alike.
    /// Negative or non-numeric indices leave the axis unset.
    pub fn from_json(value: &Value) -> Coords {
        let mut builder = Coords::builder();
        if let Some(object) = value.as_object() {
            for (axis, key) in LEGACY_KEYS {
                if let Some(index) = object.get(key).and_then(json_index) {
                    builder = builder.index(axis, index);
                }
            }
        }
        builder.build()
    }
}

impl fmt::Display for Coords {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<")?;
        for (i, (axis, index)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", axis, index)?;
        }
        write!(f, ">")
    }
}

/// Builder for [`Coords`]
#[derive(Debug, Clone, Default)]
pub struct CoordsBuilder {
    indices: BTreeMap<String, usize>,
}

impl CoordsBuilder {
    pub fn index(mut self, axis: impl Into<String>, index: usize) -> Self {
        self.indices.insert(axis.into(), index);
        self
    }

    pub fn remove_axis(mut self, axis: &str) -> Self {
        self.indices.remove(axis);
        self
    }

    pub fn channel(self, index: usize) -> Self {
        self.index(CHANNEL, index)
    }

    pub fn time(self, index: usize) -> Self {
        self.index(TIME, index)
    }

    pub fn z(self, index: usize) -> Self {
        self.index(Z, index)
    }

    pub fn stage_position(self, index: usize) -> Self {
        self.index(STAGE_POSITION, index)
    }

    pub fn build(self) -> Coords {
        Coords {
            indices: self.indices,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_absent_axis_is_not_zero() {
        let a = Coords::builder().time(0).build();
        let b = Coords::builder().time(0).z(0).build();
        assert_ne!(a, b);
        assert_eq!(a.z(), None);
        assert_eq!(b.z(), Some(0));
    }

    #[test]
    fn test_copy_builder_leaves_original() {
        let a = Coords::builder().channel(1).time(2).build();
        let b = a.copy_builder().time(5).build();
        assert_eq!(a.time(), Some(2));
        assert_eq!(b.time(), Some(5));
        assert_eq!(b.channel(), Some(1));
    }

    #[test]
    fn test_axes_sorted() {
        let c = Coords::builder().z(1).time(2).channel(0).stage_position(3).build();
        let axes: Vec<_> = c.axes().collect();
        assert_eq!(axes, vec!["channel", "position", "time", "z"]);
    }

    #[test]
    fn test_matches_partial() {
        let c = Coords::builder().channel(1).time(2).z(3).build();
        assert!(c.matches(&Coords::builder().channel(1).build()));
        assert!(c.matches(&Coords::default()));
        assert!(!c.matches(&Coords::builder().channel(0).build()));
        assert!(!c.matches(&Coords::builder().stage_position(0).build()));
    }

    #[test]
    fn test_max_with_unions_axes() {
        let a = Coords::builder().channel(3).time(1).build();
        let b = Coords::builder().time(4).z(2).build();
        let max = a.max_with(&b);
        assert_eq!(max.channel(), Some(3));
        assert_eq!(max.time(), Some(4));
        assert_eq!(max.z(), Some(2));
    }

    #[test]
    fn test_disallowed_axis() {
        let ok = Coords::builder().channel(0).stage_position(1).build();
        assert_eq!(ok.disallowed_axis(), None);
        let bad = Coords::builder().channel(0).index("angle", 2).build();
        assert_eq!(bad.disallowed_axis(), Some("angle"));
    }

    #[test]
    fn test_json_schema() {
        let c = Coords::builder().channel(1).time(7).build();
        let json = Value::Object(c.to_json());
        assert_eq!(json, json!({"ChannelIndex": 1, "FrameIndex": 7}));
        assert_eq!(Coords::from_json(&json), c);
    }

    #[test]
    fn test_from_json_tolerates_legacy_values() {
        let value = json!({
            "FrameIndex": "3",
            "SliceIndex": 2,
            "PositionIndex": -1,
            "Channel": "DAPI"
        });
        let c = Coords::from_json(&value);
        assert_eq!(c, Coords::builder().time(3).z(2).build());
    }

    #[test]
    fn test_display() {
        let c = Coords::builder().time(2).channel(1).build();
        assert_eq!(c.to_string(), "<channel=1, time=2>");
    }
}
