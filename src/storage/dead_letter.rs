//! Dead-letter queue for records the event store rejected
//!
//! Each failed record is written as a zstd-compressed JSON file named by a
//! deterministic id, so re-queuing the same record is a no-op. The queue is
//! bounded: when full, the oldest entry is dropped. [`run_retry`] drains it
//! back into the store on an interval and survives restarts by rescanning
//! the directory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::event_log::EventStore;
use crate::archiver::sanitize_segment;
use crate::types::EnrichedRecord;

const ENTRY_SUFFIX: &str = ".json.zst";
const ZSTD_LEVEL: i32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A record waiting to be re-appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub id: String,
    pub record: EnrichedRecord,
    pub failed_at: DateTime<Utc>,
    pub error: String,
}

impl DeadLetter {
    pub fn new(record: EnrichedRecord, error: impl Into<String>) -> Self {
        Self {
            id: Self::id_for(&record),
            record,
            failed_at: Utc::now(),
            error: error.into(),
        }
    }

    /// Unit, capture time and a hash of the record content.
    pub fn id_for(record: &EnrichedRecord) -> String {
        let content = serde_json::to_vec(record).unwrap_or_default();
        let digest = format!("{:x}", md5::compute(content));
        format!(
            "{}_{}_{}",
            sanitize_segment(&record.unit_id),
            record.captured_at.format("%Y%m%dT%H%M%S%.9f").to_string().replace('.', "_"),
            &digest[..12]
        )
    }
}

/// Directory-backed dead-letter queue.
pub struct DeadLetterQueue {
    dir: PathBuf,
    max_entries: usize,
}

impl DeadLetterQueue {
    pub fn open<P: AsRef<Path>>(dir: P, max_entries: usize) -> Result<Self, QueueError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let queue = Self { dir, max_entries };

        match queue.pending_count()? {
            0 => debug!("Dead-letter queue opened (empty)"),
            pending => info!(pending, "Dead-letter queue opened with pending records"),
        }
        Ok(queue)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Queue a record. Already-queued ids are skipped.
    pub fn enqueue(&self, letter: &DeadLetter) -> Result<(), QueueError> {
        let path = self.entry_path(&letter.id);
        if path.exists() {
            debug!(id = %letter.id, "Record already dead-lettered");
            return Ok(());
        }

        let current = self.pending_count()?;
        if current >= self.max_entries {
            warn!(max = self.max_entries, current, "Dead-letter queue full, dropping oldest record");
            self.drop_oldest()?;
        }

        let json = serde_json::to_vec(letter)?;
        let compressed = zstd::encode_all(json.as_slice(), ZSTD_LEVEL)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &compressed)?;
        fs::rename(&tmp, &path)?;

        debug!(id = %letter.id, bytes = compressed.len(), "Record dead-lettered");
        Ok(())
    }

    /// All queued records, oldest failure first. Entries stay on disk until
    /// [`Self::remove`].
    pub fn drain(&self) -> Result<Vec<DeadLetter>, QueueError> {
        let mut letters = Vec::new();
        for path in self.entry_paths()? {
            let decoded = fs::read(&path)
                .and_then(|bytes| zstd::decode_all(bytes.as_slice()))
                .map_err(QueueError::from)
                .and_then(|json| serde_json::from_slice::<DeadLetter>(&json).map_err(QueueError::from));
            match decoded {
                Ok(letter) => letters.push(letter),
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Corrupted dead-letter entry, removing");
                    let _ = fs::remove_file(&path);
                }
            }
        }
        letters.sort_by_key(|l| l.failed_at);
        Ok(letters)
    }

    pub fn remove(&self, id: &str) -> Result<(), QueueError> {
        let path = self.entry_path(id);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    pub fn pending_count(&self) -> Result<usize, QueueError> {
        Ok(self.entry_paths()?.len())
    }

    fn entry_paths(&self) -> Result<Vec<PathBuf>, QueueError> {
        Ok(fs::read_dir(&self.dir)?
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.to_str().is_some_and(|s| s.ends_with(ENTRY_SUFFIX)))
            .collect())
    }

    fn drop_oldest(&self) -> Result<(), QueueError> {
        let oldest = self
            .entry_paths()?
            .into_iter()
            .filter_map(|p| {
                let modified = fs::metadata(&p).and_then(|m| m.modified()).ok()?;
                Some((modified, p))
            })
            .min();
        if let Some((_, path)) = oldest {
            fs::remove_file(&path)?;
            debug!(path = %path.display(), "Dropped oldest dead-letter entry");
        }
        Ok(())
    }

    fn entry_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}{ENTRY_SUFFIX}", sanitize_segment(id)))
    }
}

/// One retry pass: re-append queued records oldest first, stopping at the
/// first store failure. Returns how many were re-appended.
pub fn retry_once(queue: &DeadLetterQueue, store: &dyn EventStore) -> Result<usize, QueueError> {
    let mut recovered = 0;
    for letter in queue.drain()? {
        match store.append(letter.record.clone()) {
            Ok(stored) => {
                queue.remove(&letter.id)?;
                recovered += 1;
                info!(id = %letter.id, sequence = ?stored.sequence, "Dead-lettered record appended");
            }
            Err(e) => {
                warn!(id = %letter.id, error = %e, "Store still unavailable, retrying next cycle");
                break;
            }
        }
    }
    Ok(recovered)
}

/// Background retry loop.
pub async fn run_retry(
    queue: Arc<DeadLetterQueue>,
    store: Arc<dyn EventStore>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!("Dead-letter retry task stopping");
                return;
            }
            _ = ticker.tick() => {}
        }

        let (queue, store) = (Arc::clone(&queue), Arc::clone(&store));
        let outcome = tokio::task::spawn_blocking(move || retry_once(&queue, store.as_ref())).await;
        match outcome {
            Ok(Ok(0)) => {}
            Ok(Ok(n)) => info!(recovered = n, "Dead-letter retry cycle complete"),
            Ok(Err(e)) => warn!(error = %e, "Dead-letter retry cycle failed"),
            Err(e) => error!(error = %e, "Dead-letter retry task panicked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::event_log::{InMemoryEventStore, StoreError};
    use crate::types::fixtures::panel_reading;
    use crate::types::ClassificationResult;

    fn record(unit: &str, secs: i64) -> EnrichedRecord {
        let reading = panel_reading(unit, secs);
        EnrichedRecord {
            unit_id: unit.to_string(),
            captured_at: reading.captured_at,
            reading,
            primary: ClassificationResult::unknown("primary"),
            escalated: false,
            secondary: None,
            artifact_url: None,
            persisted_at: None,
            sequence: None,
        }
    }

    struct DownStore;

    impl EventStore for DownStore {
        fn append(&self, _: EnrichedRecord) -> Result<EnrichedRecord, StoreError> {
            Err(StoreError::Unavailable("disk detached".into()))
        }
        fn scan_recent(&self, _: usize, _: Option<DateTime<Utc>>) -> Result<Vec<EnrichedRecord>, StoreError> {
            Err(StoreError::Unavailable("disk detached".into()))
        }
        fn latest_for_unit(&self, _: &str) -> Result<Option<EnrichedRecord>, StoreError> {
            Err(StoreError::Unavailable("disk detached".into()))
        }
        fn unit_history(&self, _: &str, _: usize) -> Result<Vec<EnrichedRecord>, StoreError> {
            Err(StoreError::Unavailable("disk detached".into()))
        }
        fn record_count(&self) -> Result<usize, StoreError> {
            Err(StoreError::Unavailable("disk detached".into()))
        }
        fn prune_before(&self, _: DateTime<Utc>) -> Result<usize, StoreError> {
            Err(StoreError::Unavailable("disk detached".into()))
        }
        fn ping(&self) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("disk detached".into()))
        }
        fn backend_name(&self) -> &'static str {
            "down"
        }
    }

    #[test]
    fn test_enqueue_is_idempotent_and_compressed() {
        let dir = tempfile::tempdir().unwrap();
        let queue = DeadLetterQueue::open(dir.path(), 10).unwrap();
        let letter = DeadLetter::new(record("panel1", 100), "store unavailable");

        queue.enqueue(&letter).unwrap();
        queue.enqueue(&letter).unwrap();
        assert_eq!(queue.pending_count().unwrap(), 1);

        let drained = queue.drain().unwrap();
        assert_eq!(drained[0].record.unit_id, "panel1");
        assert_eq!(drained[0].error, "store unavailable");
    }

    #[test]
    fn test_bounded_queue_drops_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let queue = DeadLetterQueue::open(dir.path(), 2).unwrap();
        for secs in [1, 2, 3] {
            queue.enqueue(&DeadLetter::new(record("p", secs), "x")).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        assert_eq!(queue.pending_count().unwrap(), 2);
    }

    #[test]
    fn test_retry_moves_records_into_store() {
        let dir = tempfile::tempdir().unwrap();
        let queue = DeadLetterQueue::open(dir.path(), 10).unwrap();
        queue.enqueue(&DeadLetter::new(record("a", 1), "x")).unwrap();
        queue.enqueue(&DeadLetter::new(record("b", 2), "x")).unwrap();

        assert_eq!(retry_once(&queue, &DownStore).unwrap(), 0);
        assert_eq!(queue.pending_count().unwrap(), 2);

        let store = InMemoryEventStore::new();
        assert_eq!(retry_once(&queue, &store).unwrap(), 2);
        assert_eq!(queue.pending_count().unwrap(), 0);
        assert!(store.latest_for_unit("b").unwrap().unwrap().is_persisted());
    }

    #[test]
    fn test_corrupt_entry_removed() {
        let dir = tempfile::tempdir().unwrap();
        let queue = DeadLetterQueue::open(dir.path(), 10).unwrap();
        fs::write(dir.path().join(format!("junk{ENTRY_SUFFIX}")), b"not zstd").unwrap();
        assert!(queue.drain().unwrap().is_empty());
        assert_eq!(queue.pending_count().unwrap(), 0);
    }
}
