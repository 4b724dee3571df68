//! Event Decoder
//!
//! Turns a raw transport payload (JSON object) plus the unit id derived from
//! its topic into a validated [`Reading`]. Anything that does not describe a
//! physically plausible sample is rejected with [`DecodeError`] and never
//! reaches the classifiers or the store.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::path::PathBuf;

use crate::config::defaults::CHANNEL_SEGMENTS;
use crate::types::{ColorChannels, ImageRef, Reading};

/// Physical range accepted for panel temperature (°C).
pub const TEMPERATURE_RANGE: RangeInclusive<f64> = -60.0..=100.0;
/// Physical range accepted for relative humidity (%).
pub const HUMIDITY_RANGE: RangeInclusive<f64> = 0.0..=100.0;
/// Physical range accepted for ambient light (lux).
pub const LIGHT_RANGE: RangeInclusive<f64> = 0.0..=200_000.0;

/// Longest unit id accepted, in bytes.
pub const MAX_UNIT_ID_LEN: usize = 256;

/// Bare `image` values longer than this are treated as inline base64.
const INLINE_IMAGE_MIN_LEN: usize = 512;

/// Epoch values above this are taken as milliseconds.
const EPOCH_MILLIS_THRESHOLD: f64 = 1e11;

const IMAGE_FIELDS: [&str; 3] = ["image", "image_path", "image_base64"];
const TIMESTAMP_FIELD: &str = "timestamp";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed reading from unit '{unit_id}': {reason}")]
    MalformedReading { unit_id: String, reason: String },
}

impl DecodeError {
    fn malformed(unit_id: &str, reason: impl Into<String>) -> Self {
        Self::MalformedReading {
            unit_id: unit_id.to_string(),
            reason: reason.into(),
        }
    }
}

/// Derive the unit id from a delivery topic.
///
/// `<prefix>/<unit>/...` yields `<unit>`. Any other topic yields its last
/// segment, or the one before it when the last names a channel
/// (`data`, `status`, `command`). Returns `None` when nothing usable remains.
pub fn unit_id_from_topic(topic: &str, prefix: &str) -> Option<String> {
    let prefix = prefix.trim_matches('/');
    let topic = topic.trim_matches('/');

    if let Some(rest) = topic.strip_prefix(prefix).and_then(|r| r.strip_prefix('/')) {
        return rest
            .split('/')
            .next()
            .filter(|s| !s.is_empty())
            .map(str::to_string);
    }

    let segments: Vec<&str> = topic.split('/').filter(|s| !s.is_empty()).collect();
    let last = segments.last()?;
    let candidate = if CHANNEL_SEGMENTS.contains(last) {
        segments.iter().rev().nth(1)?
    } else {
        last
    };
    Some((*candidate).to_string())
}

/// Decode a payload, defaulting the capture time to now.
pub fn decode(unit_id: &str, payload: &[u8]) -> Result<Reading, DecodeError> {
    decode_at(unit_id, payload, Utc::now())
}

/// Decode a payload, defaulting the capture time to `received_at`.
pub fn decode_at(
    unit_id: &str,
    payload: &[u8],
    received_at: DateTime<Utc>,
) -> Result<Reading, DecodeError> {
    let unit_id = unit_id.trim();
    if unit_id.is_empty() {
        return Err(DecodeError::malformed(unit_id, "empty unit id"));
    }
    if unit_id.len() > MAX_UNIT_ID_LEN {
        let shown: String = unit_id.chars().take(32).collect();
        return Err(DecodeError::malformed(
            &shown,
            format!("unit id is {} bytes, limit is {MAX_UNIT_ID_LEN}", unit_id.len()),
        ));
    }

    let value: Value = serde_json::from_slice(payload)
        .map_err(|e| DecodeError::malformed(unit_id, format!("invalid JSON: {e}")))?;
    let Value::Object(mut fields) = value else {
        return Err(DecodeError::malformed(unit_id, "payload is not a JSON object"));
    };

    let temperature = scalar(unit_id, &fields, "temperature", &TEMPERATURE_RANGE)?;
    let humidity = scalar(unit_id, &fields, "humidity", &HUMIDITY_RANGE)?;
    let light = scalar(unit_id, &fields, "light", &LIGHT_RANGE)?;
    let color = ColorChannels::new(
        channel(unit_id, &fields, "R")?,
        channel(unit_id, &fields, "G")?,
        channel(unit_id, &fields, "B")?,
    );

    let captured_at = match fields.get(TIMESTAMP_FIELD) {
        None | Some(Value::Null) => received_at,
        Some(v) => parse_timestamp(v)
            .ok_or_else(|| DecodeError::malformed(unit_id, format!("unparseable timestamp {v}")))?,
    };

    let image = image_ref(&fields);

    for key in ["temperature", "humidity", "light", "R", "G", "B", "r", "g", "b", TIMESTAMP_FIELD]
        .into_iter()
        .chain(IMAGE_FIELDS)
    {
        fields.remove(key);
    }
    let status: BTreeMap<String, Value> = fields.into_iter().collect();

    Ok(Reading {
        unit_id: unit_id.to_string(),
        captured_at,
        temperature,
        humidity,
        light,
        color,
        image,
        status,
    })
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn scalar(
    unit_id: &str,
    fields: &Map<String, Value>,
    name: &str,
    range: &RangeInclusive<f64>,
) -> Result<f64, DecodeError> {
    let raw = fields
        .get(name)
        .ok_or_else(|| DecodeError::malformed(unit_id, format!("missing field '{name}'")))?;
    let value = number(raw)
        .ok_or_else(|| DecodeError::malformed(unit_id, format!("'{name}' is not numeric")))?;
    if !value.is_finite() {
        return Err(DecodeError::malformed(unit_id, format!("'{name}' is not finite")));
    }
    if !range.contains(&value) {
        return Err(DecodeError::malformed(
            unit_id,
            format!(
                "'{name}' = {value} outside [{}, {}]",
                range.start(),
                range.end()
            ),
        ));
    }
    Ok(value)
}

fn channel(unit_id: &str, fields: &Map<String, Value>, name: &str) -> Result<u8, DecodeError> {
    let raw = fields
        .get(name)
        .or_else(|| fields.get(&name.to_ascii_lowercase()))
        .ok_or_else(|| DecodeError::malformed(unit_id, format!("missing colour channel '{name}'")))?;
    let value = number(raw)
        .ok_or_else(|| DecodeError::malformed(unit_id, format!("'{name}' is not numeric")))?;
    if !value.is_finite() || value.fract() != 0.0 || !(0.0..=255.0).contains(&value) {
        return Err(DecodeError::malformed(
            unit_id,
            format!("colour channel '{name}' = {value} is not an integer in [0, 255]"),
        ));
    }
    // Range checked above, the cast is exact.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Ok(value as u8)
}

/// RFC 3339 / naive ISO-8601 strings (taken as UTC) or Unix epoch seconds
/// or milliseconds.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
                return Some(Utc.from_utc_datetime(&naive));
            }
            s.parse::<f64>().ok().and_then(from_epoch)
        }
        Value::Number(n) => n.as_f64().and_then(from_epoch),
        _ => None,
    }
}

#[allow(clippy::cast_possible_truncation)]
fn from_epoch(value: f64) -> Option<DateTime<Utc>> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    let millis = if value > EPOCH_MILLIS_THRESHOLD {
        value
    } else {
        value * 1000.0
    };
    DateTime::from_timestamp_millis(millis.round() as i64)
}

/// Whether the payload's image field resolves to a local file path.
///
/// Payloads that are not JSON objects answer `false`; decoding rejects them
/// later anyway.
pub fn references_local_file(payload: &[u8]) -> bool {
    match serde_json::from_slice::<Value>(payload) {
        Ok(Value::Object(fields)) => matches!(image_ref(&fields), Some(ImageRef::Path(_))),
        _ => false,
    }
}

fn image_ref(fields: &Map<String, Value>) -> Option<ImageRef> {
    let (field, raw) = IMAGE_FIELDS.iter().find_map(|f| {
        fields
            .get(*f)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| (*f, s))
    })?;

    if let Some(rest) = raw.strip_prefix("data:") {
        let (_, data) = rest.split_once(',')?;
        return Some(ImageRef::Base64(data.to_string()));
    }
    if raw.starts_with("http://") || raw.starts_with("https://") {
        return Some(ImageRef::Url(raw.to_string()));
    }
    match field {
        "image_base64" => Some(ImageRef::Base64(raw.to_string())),
        "image_path" => Some(ImageRef::Path(PathBuf::from(raw))),
        _ if raw.len() > INLINE_IMAGE_MIN_LEN => Some(ImageRef::Base64(raw.to_string())),
        _ => Some(ImageRef::Path(PathBuf::from(raw))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(v: &Value) -> Vec<u8> {
        serde_json::to_vec(v).unwrap()
    }

    fn panel1() -> Value {
        json!({"temperature": 24.1, "humidity": 60, "light": 200, "R": 120, "G": 110, "B": 90})
    }

    #[test]
    fn test_topic_with_prefix() {
        assert_eq!(unit_id_from_topic("solar/panel/panel1/data", "solar/panel").as_deref(), Some("panel1"));
        assert_eq!(unit_id_from_topic("solar/panel/panel7", "solar/panel/").as_deref(), Some("panel7"));
    }

    #[test]
    fn test_topic_without_prefix() {
        assert_eq!(unit_id_from_topic("site/roof/p3", "solar/panel").as_deref(), Some("p3"));
        assert_eq!(unit_id_from_topic("site/roof/p3/status", "solar/panel").as_deref(), Some("p3"));
        assert_eq!(unit_id_from_topic("data", "solar/panel"), None);
        assert_eq!(unit_id_from_topic("", "solar/panel"), None);
    }

    #[test]
    fn test_decode_valid_reading() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let mut body = panel1();
        body["battery"] = json!(87);
        let reading = decode_at("panel1", &payload(&body), now).unwrap();
        assert_eq!(reading.unit_id, "panel1");
        assert_eq!(reading.captured_at, now);
        assert_eq!(reading.color, ColorChannels::new(120, 110, 90));
        assert_eq!(reading.status.get("battery"), Some(&json!(87)));
        assert!(reading.image.is_none());
    }

    #[test]
    fn test_negative_humidity_rejected() {
        let mut body = panel1();
        body["humidity"] = json!(-5);
        let err = decode("panel1", &payload(&body)).unwrap_err();
        let DecodeError::MalformedReading { unit_id, reason } = err;
        assert_eq!(unit_id, "panel1");
        assert!(reason.contains("humidity"));
    }

    #[test]
    fn test_missing_and_non_numeric_fields_rejected() {
        let mut body = panel1();
        body.as_object_mut().unwrap().remove("light");
        assert!(decode("p", &payload(&body)).is_err());

        let mut body = panel1();
        body["temperature"] = json!("warm");
        assert!(decode("p", &payload(&body)).is_err());

        assert!(decode("p", b"not json").is_err());
        assert!(decode("p", b"[1,2,3]").is_err());
    }

    #[test]
    fn test_colour_channel_bounds() {
        let mut body = panel1();
        body["G"] = json!(256);
        assert!(decode("p", &payload(&body)).is_err());

        let mut body = panel1();
        body["B"] = json!(12.5);
        assert!(decode("p", &payload(&body)).is_err());
    }

    #[test]
    fn test_empty_unit_rejected() {
        assert!(decode("  ", &payload(&panel1())).is_err());
    }

    #[test]
    fn test_oversized_unit_id_rejected() {
        let at_limit = "p".repeat(MAX_UNIT_ID_LEN);
        assert!(decode(&at_limit, &payload(&panel1())).is_ok());

        let oversized = "p".repeat(70_000);
        let err = decode(&oversized, &payload(&panel1())).unwrap_err();
        let DecodeError::MalformedReading { unit_id, reason } = err;
        assert_eq!(unit_id.len(), 32);
        assert!(reason.contains("70000 bytes"));
    }

    #[test]
    fn test_timestamp_formats() {
        let expected = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        for ts in [
            json!("2023-11-14T22:13:20Z"),
            json!("2023-11-14T22:13:20"),
            json!(1_700_000_000),
            json!(1_700_000_000_000_i64),
        ] {
            let mut body = panel1();
            body["timestamp"] = ts.clone();
            let reading = decode("p", &payload(&body)).unwrap();
            assert_eq!(reading.captured_at, expected, "timestamp {ts}");
        }

        let mut body = panel1();
        body["timestamp"] = json!("yesterday");
        assert!(decode("p", &payload(&body)).is_err());
    }

    #[test]
    fn test_image_reference_kinds() {
        let mut body = panel1();
        body["image"] = json!("data:image/png;base64,iVBORw0KGgo=");
        let r = decode("p", &payload(&body)).unwrap();
        assert_eq!(r.image, Some(ImageRef::Base64("iVBORw0KGgo=".into())));

        let mut body = panel1();
        body["image_path"] = json!("/var/cam/p.jpg");
        let r = decode("p", &payload(&body)).unwrap();
        assert_eq!(r.image, Some(ImageRef::Path("/var/cam/p.jpg".into())));

        let mut body = panel1();
        body["image"] = json!("https://cdn.example.com/p.jpg");
        let r = decode("p", &payload(&body)).unwrap();
        assert!(matches!(r.image, Some(ImageRef::Url(_))));

        let mut body = panel1();
        body["image"] = json!("A".repeat(600));
        let r = decode("p", &payload(&body)).unwrap();
        assert!(matches!(r.image, Some(ImageRef::Base64(_))));
        assert!(!r.status.contains_key("image"));
    }

    #[test]
    fn test_local_file_detection() {
        let mut body = panel1();
        body["image_path"] = json!("/etc/passwd");
        assert!(references_local_file(&payload(&body)));

        let mut body = panel1();
        body["image"] = json!("../secrets.jpg");
        assert!(references_local_file(&payload(&body)));

        let mut body = panel1();
        body["image"] = json!("https://cdn.example.com/p.jpg");
        assert!(!references_local_file(&payload(&body)));
        assert!(!references_local_file(&payload(&panel1())));
        assert!(!references_local_file(b"not json"));
    }
}
