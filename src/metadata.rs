//! Per-image and summary metadata, with their JSON schemas
//!
//! Both structures round-trip through the key spellings used in
//! `metadata.txt` streams and embedded TIFF descriptions. Files written by
//! 1.x acquisitions use a few different spellings and store most numbers as
//! strings; [`Metadata::from_json`] and [`SummaryMetadata::from_json`] accept
//! both and report which one they saw.

use crate::error::{Result, StorageError};
use crate::utils::{json_string, lenient_f64, lenient_string};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Keys that describe image format or coordinates rather than metadata.
/// They are stripped when metadata is recovered from a full image record.
const RESERVED_IMAGE_KEYS: &[&str] = &[
    "Width",
    "Height",
    "PixelType",
    "IJType",
    "ChannelIndex",
    "FrameIndex",
    "SliceIndex",
    "PositionIndex",
    "Summary",
];

/// Which on-disk dialect a metadata object was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataFormat {
    /// Written by the current writer
    Current,
    /// 1.x spelling (`Time` instead of `ReceivedTime`/`StartTime`)
    Legacy,
}

/// Metadata attached to a single image plane
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Human-readable stage position name
    #[serde(
        rename = "PositionName",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_string"
    )]
    pub position_name: Option<String>,

    /// Physical pixel size in micrometres
    #[serde(
        rename = "PixelSizeUm",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_f64"
    )]
    pub pixel_size_um: Option<f64>,

    /// Timestamp at which the image was received, e.g. `2015-06-02 10:49:52.123 -0700`
    #[serde(
        rename = "ReceivedTime",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_string"
    )]
    pub received_time: Option<String>,

    #[serde(
        rename = "ElapsedTime-ms",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_f64"
    )]
    pub elapsed_time_ms: Option<f64>,

    #[serde(
        rename = "Exposure-ms",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_f64"
    )]
    pub exposure_ms: Option<f64>,

    #[serde(
        rename = "Camera",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_string"
    )]
    pub camera: Option<String>,

    #[serde(
        rename = "UUID",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_uuid"
    )]
    pub uuid: Option<Uuid>,

    /// Relative path of the file holding the image, set by the writer
    #[serde(
        rename = "FileName",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_string"
    )]
    pub file_name: Option<String>,

    /// Everything else, preserved verbatim
    #[serde(flatten)]
    pub user_data: Map<String, Value>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_position_name(mut self, name: impl Into<String>) -> Self {
        self.position_name = Some(name.into());
        self
    }

    pub fn with_pixel_size_um(mut self, size: f64) -> Self {
        self.pixel_size_um = Some(size);
        self
    }

    pub fn with_received_time(mut self, time: impl Into<String>) -> Self {
        self.received_time = Some(time.into());
        self
    }

    pub fn with_uuid(mut self, uuid: Uuid) -> Self {
        self.uuid = Some(uuid);
        self
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    /// Position name, ignoring empty strings and the literal `"null"`
    pub fn valid_position_name(&self) -> Option<&str> {
        self.position_name
            .as_deref()
            .filter(|name| !name.is_empty() && *name != "null")
    }

    /// Serialize to a JSON object
    pub fn to_json(&self) -> Result<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(StorageError::Metadata(format!(
                "metadata serialized to non-object {}",
                other
            ))),
        }
    }

    /// Parse metadata from a JSON object, trying the current schema first and
    /// falling back to 1.x spellings.
    pub fn from_json(value: &Value) -> Result<(Self, MetadataFormat)> {
        let mut object = value
            .as_object()
            .cloned()
            .ok_or_else(|| StorageError::Metadata("image metadata is not a JSON object".into()))?;
        for key in RESERVED_IMAGE_KEYS {
            object.remove(*key);
        }

        let legacy_time = if object.contains_key("ReceivedTime") {
            None
        } else {
            object.remove("Time").as_ref().and_then(json_string)
        };

        let mut metadata: Metadata = serde_json::from_value(Value::Object(object))?;
        match legacy_time {
            Some(time) => {
                metadata.received_time = Some(time);
                Ok((metadata, MetadataFormat::Legacy))
            }
            None => Ok((metadata, MetadataFormat::Current)),
        }
    }

    /// Parse metadata from a JSON string, as embedded in a TIFF file
    pub fn from_json_str(json: &str) -> Result<(Self, MetadataFormat)> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_json(&value)
    }
}

/// Dataset-wide metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryMetadata {
    #[serde(
        rename = "Prefix",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_string"
    )]
    pub prefix: Option<String>,

    #[serde(
        rename = "UserName",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_string"
    )]
    pub user_name: Option<String>,

    #[serde(
        rename = "MicroManagerVersion",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_string"
    )]
    pub software_version: Option<String>,

    #[serde(
        rename = "ChNames",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_string_list"
    )]
    pub channel_names: Option<Vec<String>>,

    /// Axis names in display order
    #[serde(
        rename = "AxisOrder",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_string_list"
    )]
    pub axis_order: Option<Vec<String>>,

    /// Acquisition start date (`YYYY-MM-DD`)
    #[serde(
        rename = "StartTime",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_string"
    )]
    pub start_date: Option<String>,

    #[serde(
        rename = "z-step_um",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_f64"
    )]
    pub z_step_um: Option<f64>,

    /// Interval between time points in milliseconds
    #[serde(
        rename = "Interval_ms",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_f64"
    )]
    pub wait_interval_ms: Option<f64>,

    #[serde(flatten)]
    pub user_data: Map<String, Value>,
}

impl SummaryMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_axis_order<I, S>(mut self, axes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.axis_order = Some(axes.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_channel_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.channel_names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_start_date(mut self, date: impl Into<String>) -> Self {
        self.start_date = Some(date.into());
        self
    }

    pub fn with_z_step_um(mut self, step: f64) -> Self {
        self.z_step_um = Some(step);
        self
    }

    pub fn with_wait_interval_ms(mut self, interval: f64) -> Self {
        self.wait_interval_ms = Some(interval);
        self
    }

    pub fn ordered_axes(&self) -> Option<&[String]> {
        self.axis_order.as_deref()
    }

    pub fn to_json(&self) -> Result<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(StorageError::Metadata(format!(
                "summary metadata serialized to non-object {}",
                other
            ))),
        }
    }

    /// Parse summary metadata, accepting the 1.x `Time` key for the start date.
    /// Pixel format keys added for backward compatibility are dropped.
    pub fn from_json(value: &Value) -> Result<(Self, MetadataFormat)> {
        let mut object = value
            .as_object()
            .cloned()
            .ok_or_else(|| StorageError::Metadata("summary metadata is not a JSON object".into()))?;
        object.remove("PixelType");
        object.remove("IJType");

        let legacy_time = if object.contains_key("StartTime") {
            None
        } else {
            object.remove("Time").as_ref().and_then(json_string)
        };

        let mut summary: SummaryMetadata = serde_json::from_value(Value::Object(object))?;
        match legacy_time {
            Some(time) => {
                summary.start_date = start_date_from_received_time(&time).or(Some(time));
                Ok((summary, MetadataFormat::Legacy))
            }
            None => Ok((summary, MetadataFormat::Current)),
        }
    }
}

/// Date portion of a received-time stamp.
///
/// Accepts `YYYY-MM-DD hh:mm:ss[.fff] [zone]` and RFC 3339; anything else
/// falls back to the first whitespace-separated token.
pub fn start_date_from_received_time(time: &str) -> Option<String> {
    let first = time.split_whitespace().next()?;
    if let Ok(date) = NaiveDate::parse_from_str(first, "%Y-%m-%d") {
        return Some(date.format("%Y-%m-%d").to_string());
    }
    if let Ok(stamp) = DateTime::parse_from_rfc3339(time.trim()) {
        return Some(stamp.date_naive().format("%Y-%m-%d").to_string());
    }
    if let Ok(stamp) = NaiveDateTime::parse_from_str(first, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(stamp.date().format("%Y-%m-%d").to_string());
    }
    Some(first.to_string())
}

fn lenient_uuid<'de, D>(deserializer: D) -> std::result::Result<Option<Uuid>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value
        .as_ref()
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok()))
}

fn lenient_string_list<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Array(items)) => Some(items.iter().filter_map(json_string).collect()),
        Some(Value::String(s)) if !s.is_empty() && s != "null" => Some(vec![s]),
        _ => None,
    })
}
