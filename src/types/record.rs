//! Persisted record types and read-side projections

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ClassificationResult, Label, Reading};

/// Placeholder image shown for units that never archived an artifact.
pub const PLACEHOLDER_THUMBNAIL: &str = "https://via.placeholder.com/400x300?text=";

/// The unit of persistence: one reading with everything learned about it.
///
/// Built by the record assembler; `persisted_at` and `sequence` stay `None`
/// until the event store writer appends it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub unit_id: String,
    pub captured_at: DateTime<Utc>,
    pub reading: Reading,
    pub primary: ClassificationResult,
    /// Whether the escalation policy asked for a secondary pass
    #[serde(default)]
    pub escalated: bool,
    /// Present only when escalation happened and the secondary model answered
    #[serde(default)]
    pub secondary: Option<ClassificationResult>,
    #[serde(default)]
    pub artifact_url: Option<String>,
    /// Assigned by the event store writer
    #[serde(default)]
    pub persisted_at: Option<DateTime<Utc>>,
    /// Monotonic append sequence, assigned by the event store writer
    #[serde(default)]
    pub sequence: Option<u64>,
}

impl EnrichedRecord {
    /// Whether the writer has stamped this record.
    pub fn is_persisted(&self) -> bool {
        self.persisted_at.is_some() && self.sequence.is_some()
    }

    /// Whether the secondary model disagreed with the primary label.
    pub fn models_disagree(&self) -> bool {
        self.secondary
            .as_ref()
            .is_some_and(|s| s.label != Label::Unknown && s.label != self.primary.label)
    }
}

/// Row of the "latest state per unit" listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSummary {
    pub unit_id: String,
    pub last_status: Label,
    pub last_confidence: f64,
    pub thumbnail: String,
    pub last_update: DateTime<Utc>,
    pub temperature: f64,
    pub humidity: f64,
    pub light: f64,
}

impl From<&EnrichedRecord> for UnitSummary {
    fn from(record: &EnrichedRecord) -> Self {
        Self {
            unit_id: record.unit_id.clone(),
            last_status: record.primary.label,
            last_confidence: record.primary.confidence,
            thumbnail: record
                .artifact_url
                .clone()
                .unwrap_or_else(|| format!("{PLACEHOLDER_THUMBNAIL}{}", record.unit_id)),
            last_update: record.captured_at,
            temperature: record.reading.temperature,
            humidity: record.reading.humidity,
            light: record.reading.light,
        }
    }
}
