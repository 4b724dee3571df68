//! Append-only event log of enriched records
//!
//! Records are keyed by `(capture time, append sequence)` so a forward scan
//! is chronological and the newest record for equal capture times is the
//! later append. A per-unit index is written in the same transaction as the
//! record, which makes [`EventStore::latest_for_unit`] exact.
//!
//! Key layout (big-endian, 20 bytes):
//! `[seconds since epoch, sign bit flipped: u64][subsec nanos: u32][sequence: u64]`
//!
//! Index key: `[unit id length: u16][unit id bytes][record key]`, value is
//! the record key.

use chrono::{DateTime, TimeZone, Utc};
use sled::transaction::{ConflictableTransactionError, TransactionError, Transactional};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use crate::types::EnrichedRecord;

const RECORDS_TREE: &str = "records";
const UNIT_INDEX_TREE: &str = "unit_index";
const META_TREE: &str = "meta";

/// Event store errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        Self::Unavailable(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Position of a record in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordKey {
    pub captured_at: DateTime<Utc>,
    pub sequence: u64,
}

impl RecordKey {
    pub const LEN: usize = 20;

    #[allow(clippy::cast_sign_loss)]
    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let secs = (self.captured_at.timestamp() as u64) ^ (1 << 63);
        let mut out = [0u8; Self::LEN];
        out[..8].copy_from_slice(&secs.to_be_bytes());
        out[8..12].copy_from_slice(&self.captured_at.timestamp_subsec_nanos().to_be_bytes());
        out[12..].copy_from_slice(&self.sequence.to_be_bytes());
        out
    }

    #[allow(clippy::cast_possible_wrap)]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::LEN {
            return None;
        }
        let secs = u64::from_be_bytes(bytes[..8].try_into().ok()?) ^ (1 << 63);
        let nanos = u32::from_be_bytes(bytes[8..12].try_into().ok()?);
        let sequence = u64::from_be_bytes(bytes[12..].try_into().ok()?);
        let captured_at = Utc.timestamp_opt(secs as i64, nanos).single()?;
        Some(Self { captured_at, sequence })
    }

    /// Smallest key at or after `at`.
    pub fn lower_bound(at: DateTime<Utc>) -> Self {
        Self { captured_at: at, sequence: 0 }
    }
}

fn unit_prefix(unit_id: &str) -> Vec<u8> {
    let bytes = unit_id.as_bytes();
    let len = u16::try_from(bytes.len()).unwrap_or(u16::MAX);
    let mut out = Vec::with_capacity(2 + bytes.len() + RecordKey::LEN);
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(&bytes[..usize::from(len)]);
    out
}

fn index_key(unit_id: &str, key: &RecordKey) -> Vec<u8> {
    let mut out = unit_prefix(unit_id);
    out.extend_from_slice(&key.to_bytes());
    out
}

/// Durable, append-only store of enriched records.
///
/// Implementations must be safe for concurrent appends.
pub trait EventStore: Send + Sync {
    /// Stamp the record with a persistence time and sequence and append it.
    fn append(&self, record: EnrichedRecord) -> Result<EnrichedRecord, StoreError>;

    /// Records in descending `(capture time, sequence)` order, at most
    /// `limit`, optionally stopping at capture times before `since`.
    fn scan_recent(
        &self,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<EnrichedRecord>, StoreError>;

    /// The unit's record with the greatest `(capture time, sequence)`.
    fn latest_for_unit(&self, unit_id: &str) -> Result<Option<EnrichedRecord>, StoreError>;

    /// The unit's records newest first, at most `limit`.
    fn unit_history(&self, unit_id: &str, limit: usize) -> Result<Vec<EnrichedRecord>, StoreError>;

    /// Total number of records.
    fn record_count(&self) -> Result<usize, StoreError>;

    /// Remove records captured before `cutoff`, with their index entries.
    fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Cheap read/write check for health monitoring.
    fn ping(&self) -> Result<(), StoreError>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

// ============================================================================
// Sled backend
// ============================================================================

/// sled-backed event store.
#[derive(Clone)]
pub struct SledEventStore {
    db: sled::Db,
    records: sled::Tree,
    unit_index: sled::Tree,
    meta: sled::Tree,
}

impl SledEventStore {
    /// Open or create the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Wrap an already-open database.
    pub fn from_db(db: sled::Db) -> Result<Self, StoreError> {
        Ok(Self {
            records: db.open_tree(RECORDS_TREE)?,
            unit_index: db.open_tree(UNIT_INDEX_TREE)?,
            meta: db.open_tree(META_TREE)?,
            db,
        })
    }

    /// Underlying database, for sibling trees (feedback).
    pub fn db(&self) -> &sled::Db {
        &self.db
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    fn decode(value: &[u8]) -> Option<EnrichedRecord> {
        match serde_json::from_slice::<EnrichedRecord>(value) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping undecodable record");
                None
            }
        }
    }

    fn get_record(&self, key: &[u8]) -> Result<Option<EnrichedRecord>, StoreError> {
        Ok(self.records.get(key)?.and_then(|v| Self::decode(&v)))
    }

    fn remove_pair(&self, record_key: &[u8], index_key: &[u8]) -> Result<(), StoreError> {
        (&self.records, &self.unit_index)
            .transaction(|(records, index)| {
                records.remove(record_key)?;
                index.remove(index_key)?;
                Ok::<(), ConflictableTransactionError<()>>(())
            })
            .map_err(|e: TransactionError<()>| StoreError::Unavailable(format!("{e:?}")))
    }
}

impl EventStore for SledEventStore {
    fn append(&self, mut record: EnrichedRecord) -> Result<EnrichedRecord, StoreError> {
        let sequence = self.db.generate_id()?;
        record.sequence = Some(sequence);
        record.persisted_at = Some(Utc::now());

        let key = RecordKey {
            captured_at: record.captured_at,
            sequence,
        };
        let key_bytes = key.to_bytes();
        let index_bytes = index_key(&record.unit_id, &key);
        let value = serde_json::to_vec(&record)?;

        (&self.records, &self.unit_index)
            .transaction(|(records, index)| {
                records.insert(&key_bytes[..], value.as_slice())?;
                index.insert(index_bytes.as_slice(), &key_bytes[..])?;
                Ok::<(), ConflictableTransactionError<()>>(())
            })
            .map_err(|e: TransactionError<()>| StoreError::Unavailable(format!("{e:?}")))?;

        Ok(record)
    }

    fn scan_recent(
        &self,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<EnrichedRecord>, StoreError> {
        let lower = since.map_or([0u8; RecordKey::LEN], |at| RecordKey::lower_bound(at).to_bytes());
        let mut out = Vec::with_capacity(limit.min(1024));
        for item in self.records.range(lower..).rev() {
            if out.len() >= limit {
                break;
            }
            let (_, value) = item?;
            if let Some(record) = Self::decode(&value) {
                out.push(record);
            }
        }
        Ok(out)
    }

    fn latest_for_unit(&self, unit_id: &str) -> Result<Option<EnrichedRecord>, StoreError> {
        match self.unit_index.scan_prefix(unit_prefix(unit_id)).next_back() {
            Some(item) => {
                let (_, record_key) = item?;
                self.get_record(&record_key)
            }
            None => Ok(None),
        }
    }

    fn unit_history(&self, unit_id: &str, limit: usize) -> Result<Vec<EnrichedRecord>, StoreError> {
        let mut out = Vec::with_capacity(limit.min(1024));
        for item in self.unit_index.scan_prefix(unit_prefix(unit_id)).rev() {
            if out.len() >= limit {
                break;
            }
            let (_, record_key) = item?;
            if let Some(record) = self.get_record(&record_key)? {
                out.push(record);
            }
        }
        Ok(out)
    }

    fn record_count(&self) -> Result<usize, StoreError> {
        Ok(self.records.len())
    }

    fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let upper = RecordKey::lower_bound(cutoff).to_bytes();
        let mut doomed = Vec::new();
        for item in self.records.range(..upper) {
            let (key, value) = item?;
            let unit_id = serde_json::from_slice::<EnrichedRecord>(&value)
                .map(|r| r.unit_id)
                .ok();
            doomed.push((key, unit_id));
        }

        let mut removed = 0;
        for (key, unit_id) in doomed {
            match (unit_id, RecordKey::from_bytes(&key)) {
                (Some(unit_id), Some(record_key)) => {
                    self.remove_pair(&key, &index_key(&unit_id, &record_key))?;
                }
                _ => {
                    self.records.remove(&key)?;
                }
            }
            removed += 1;
        }
        if removed > 0 {
            self.db.flush()?;
        }
        Ok(removed)
    }

    fn ping(&self) -> Result<(), StoreError> {
        let now = Utc::now().timestamp().to_be_bytes();
        self.meta.insert("health_check", &now[..])?;
        self.meta.get("health_check")?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "sled"
    }
}

// ============================================================================
// In-memory backend
// ============================================================================

/// Volatile event store for tests and demos. Thread-safe via `RwLock`.
#[derive(Default)]
pub struct InMemoryEventStore {
    records: RwLock<BTreeMap<RecordKey, EnrichedRecord>>,
    unit_index: RwLock<BTreeMap<String, BTreeSet<RecordKey>>>,
    next_sequence: AtomicU64,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(e: std::sync::PoisonError<T>) -> StoreError {
    StoreError::Unavailable(format!("lock poisoned: {e}"))
}

impl EventStore for InMemoryEventStore {
    fn append(&self, mut record: EnrichedRecord) -> Result<EnrichedRecord, StoreError> {
        // Both locks held together so readers never see a record without its index entry.
        let mut records = self.records.write().map_err(poisoned)?;
        let mut index = self.unit_index.write().map_err(poisoned)?;

        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        record.sequence = Some(sequence);
        record.persisted_at = Some(Utc::now());
        let key = RecordKey {
            captured_at: record.captured_at,
            sequence,
        };

        index.entry(record.unit_id.clone()).or_default().insert(key);
        records.insert(key, record.clone());
        Ok(record)
    }

    fn scan_recent(
        &self,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<EnrichedRecord>, StoreError> {
        let records = self.records.read().map_err(poisoned)?;
        let iter: Box<dyn DoubleEndedIterator<Item = (&RecordKey, &EnrichedRecord)>> = match since {
            Some(at) => Box::new(records.range(RecordKey::lower_bound(at)..)),
            None => Box::new(records.iter()),
        };
        Ok(iter.rev().take(limit).map(|(_, r)| r.clone()).collect())
    }

    fn latest_for_unit(&self, unit_id: &str) -> Result<Option<EnrichedRecord>, StoreError> {
        Ok(self.unit_history(unit_id, 1)?.into_iter().next())
    }

    fn unit_history(&self, unit_id: &str, limit: usize) -> Result<Vec<EnrichedRecord>, StoreError> {
        let records = self.records.read().map_err(poisoned)?;
        let index = self.unit_index.read().map_err(poisoned)?;
        Ok(index
            .get(unit_id)
            .map(|keys| {
                keys.iter()
                    .rev()
                    .take(limit)
                    .filter_map(|k| records.get(k).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn record_count(&self) -> Result<usize, StoreError> {
        Ok(self.records.read().map_err(poisoned)?.len())
    }

    fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut records = self.records.write().map_err(poisoned)?;
        let mut index = self.unit_index.write().map_err(poisoned)?;

        let kept = records.split_off(&RecordKey::lower_bound(cutoff));
        let removed = std::mem::replace(&mut *records, kept);
        for (key, record) in &removed {
            if let Some(keys) = index.get_mut(&record.unit_id) {
                keys.remove(key);
                if keys.is_empty() {
                    index.remove(&record.unit_id);
                }
            }
        }
        Ok(removed.len())
    }

    fn ping(&self) -> Result<(), StoreError> {
        self.records.read().map_err(poisoned).map(|_| ())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
