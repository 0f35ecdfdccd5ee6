//! Utility functions

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Format byte size in human-readable form
pub fn format_bytes(bytes: usize) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];

    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

/// Read a non-negative index from a JSON number or numeric string.
///
/// 1.x metadata wrote most values as strings, so both spellings occur.
pub fn json_index(value: &Value) -> Option<usize> {
    match value {
        Value::Number(n) => n.as_u64().map(|v| v as usize),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Read a float from a JSON number or numeric string
pub fn json_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Read a string, treating JSON null and the literal "null" as absent
pub fn json_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if s != "null" => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// serde adapter for optional floats stored as number or string
pub(crate) fn lenient_f64<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(json_f64))
}

/// serde adapter for optional strings that may be null, "null", or a number
pub(crate) fn lenient_string<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(json_string))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
        assert_eq!(format_bytes(1073741824), "1.00 GB");
    }

    #[test]
    fn test_json_index() {
        assert_eq!(json_index(&json!(4)), Some(4));
        assert_eq!(json_index(&json!("12")), Some(12));
        assert_eq!(json_index(&json!(-1)), None);
        assert_eq!(json_index(&json!("DAPI")), None);
        assert_eq!(json_index(&json!(null)), None);
    }

    #[test]
    fn test_json_f64_and_string() {
        assert_eq!(json_f64(&json!("0.65")), Some(0.65));
        assert_eq!(json_f64(&json!(2)), Some(2.0));
        assert_eq!(json_string(&json!("null")), None);
        assert_eq!(json_string(&json!("Pos0")), Some("Pos0".to_string()));
    }
}
