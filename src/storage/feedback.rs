//! Classification feedback persistence
//!
//! Stores user assessments of a unit's classification in a named sled tree
//! ("feedback") beside the event log. Feedback is kept for later review and
//! never alters stored records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::RwLock;

use super::event_log::{SledEventStore, StoreError};
use crate::types::Label;

const FEEDBACK_TREE: &str = "feedback";

/// A feedback submission as received.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedbackSubmission {
    pub unit_id: String,
    pub is_correct: bool,
    #[serde(default)]
    pub predicted_label: Option<Label>,
    #[serde(default)]
    pub corrected_label: Option<Label>,
    #[serde(default)]
    pub confidence: Option<f64>,
    /// Sequence of the record being rated
    #[serde(default)]
    pub record_sequence: Option<u64>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub submitted_by: Option<String>,
}

/// A stored feedback record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub feedback_id: String,
    pub unit_id: String,
    pub is_correct: bool,
    pub predicted_label: Option<Label>,
    /// Only kept when the prediction was marked incorrect
    pub corrected_label: Option<Label>,
    pub confidence: Option<f64>,
    pub record_sequence: Option<u64>,
    pub reason: Option<String>,
    pub submitted_by: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

impl FeedbackRecord {
    pub fn from_submission(submission: FeedbackSubmission, submitted_at: DateTime<Utc>) -> Self {
        Self {
            feedback_id: uuid::Uuid::new_v4().to_string(),
            corrected_label: if submission.is_correct {
                None
            } else {
                submission.corrected_label
            },
            unit_id: submission.unit_id,
            is_correct: submission.is_correct,
            predicted_label: submission.predicted_label,
            confidence: submission.confidence,
            record_sequence: submission.record_sequence,
            reason: submission.reason,
            submitted_by: submission.submitted_by,
            submitted_at,
        }
    }

    /// Key: submission time in nanoseconds, then the id for uniqueness.
    fn key(&self) -> Vec<u8> {
        let nanos = self.submitted_at.timestamp_nanos_opt().unwrap_or(i64::MAX);
        #[allow(clippy::cast_sign_loss)]
        let mut key = ((nanos as u64) ^ (1 << 63)).to_be_bytes().to_vec();
        key.extend_from_slice(self.feedback_id.as_bytes());
        key
    }
}

/// Feedback persistence.
pub trait FeedbackStore: Send + Sync {
    fn submit(&self, record: &FeedbackRecord) -> Result<(), StoreError>;

    /// Newest first, optionally for one unit.
    fn list(&self, unit_id: Option<&str>, limit: usize) -> Result<Vec<FeedbackRecord>, StoreError>;
}

/// Feedback tree inside the event store's database.
#[derive(Clone)]
pub struct SledFeedbackStore {
    tree: sled::Tree,
}

impl SledFeedbackStore {
    pub fn open(store: &SledEventStore) -> Result<Self, StoreError> {
        Ok(Self {
            tree: store.db().open_tree(FEEDBACK_TREE)?,
        })
    }
}

impl FeedbackStore for SledFeedbackStore {
    fn submit(&self, record: &FeedbackRecord) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(record)?;
        self.tree.insert(record.key(), bytes)?;
        Ok(())
    }

    fn list(&self, unit_id: Option<&str>, limit: usize) -> Result<Vec<FeedbackRecord>, StoreError> {
        let mut out = Vec::new();
        for item in self.tree.iter().rev() {
            if out.len() >= limit {
                break;
            }
            let (_, value) = item?;
            let Ok(record) = serde_json::from_slice::<FeedbackRecord>(&value) else {
                continue;
            };
            if unit_id.map_or(true, |u| u == record.unit_id) {
                out.push(record);
            }
        }
        Ok(out)
    }
}

/// Volatile feedback store paired with the in-memory event store.
#[derive(Default)]
pub struct InMemoryFeedbackStore {
    records: RwLock<Vec<FeedbackRecord>>,
}

impl FeedbackStore for InMemoryFeedbackStore {
    fn submit(&self, record: &FeedbackRecord) -> Result<(), StoreError> {
        let mut records = self
            .records
            .write()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let at = records.partition_point(|r| r.key() <= record.key());
        records.insert(at, record.clone());
        Ok(())
    }

    fn list(&self, unit_id: Option<&str>, limit: usize) -> Result<Vec<FeedbackRecord>, StoreError> {
        let records = self
            .records
            .read()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(records
            .iter()
            .rev()
            .filter(|r| unit_id.map_or(true, |u| u == r.unit_id))
            .take(limit)
            .cloned()
            .collect())
    }
}
