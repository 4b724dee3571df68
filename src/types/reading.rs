//! Sensor reading types
//!
//! A [`Reading`] is one decoded sample from a panel's sensor unit. It is
//! produced by the event decoder and never mutated afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// RGB colour sensor output, each channel in 0..=255.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorChannels {
    #[serde(rename = "R")]
    pub r: u8,
    #[serde(rename = "G")]
    pub g: u8,
    #[serde(rename = "B")]
    pub b: u8,
}

impl ColorChannels {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Channels as floats in R, G, B order.
    pub fn as_f64(&self) -> [f64; 3] {
        [f64::from(self.r), f64::from(self.g), f64::from(self.b)]
    }
}

/// Where the image attached to a reading can be found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ImageRef {
    /// Inline base64 payload (any `data:` URI prefix already stripped)
    Base64(String),
    /// Path on the ingest host's filesystem
    Path(PathBuf),
    /// Remote URL the content store can fetch by reference
    Url(String),
}

impl ImageRef {
    /// Short description for logs; never includes inline payloads.
    pub fn describe(&self) -> String {
        match self {
            Self::Base64(data) => format!("inline base64 ({} chars)", data.len()),
            Self::Path(path) => format!("path {}", path.display()),
            Self::Url(url) => format!("url {url}"),
        }
    }
}

/// One decoded sensor sample for a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Unit identifier taken from the delivery topic
    pub unit_id: String,
    /// Sensor-assigned capture time (decode time when the sensor sent none)
    pub captured_at: DateTime<Utc>,
    /// Panel surface temperature (°C)
    pub temperature: f64,
    /// Relative humidity (%)
    pub humidity: f64,
    /// Ambient light (lux)
    pub light: f64,
    /// Colour sensor channels
    pub color: ColorChannels,
    /// Attached image, if the unit sent one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageRef>,
    /// Free-form auxiliary fields (battery, firmware, status text...)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub status: BTreeMap<String, serde_json::Value>,
}
