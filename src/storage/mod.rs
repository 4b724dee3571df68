//! Persistence
//!
//! The append-only event log (sled or in-memory), the latest-state
//! aggregator and history queries over it, feedback capture, the
//! dead-letter queue for failed appends and the data directory lock.
//!
//! Data directory layout:
//! - `events.db/`: sled database (`records`, `unit_index`, `feedback`, `meta` trees)
//! - `dead_letter/`: zstd-compressed records awaiting re-append
//! - `artifacts/`: local archiver output (see [`crate::archiver`])
//! - `.sentinel.lock`: PID lock

pub mod aggregator;
pub mod dead_letter;
pub mod event_log;
pub mod feedback;
pub mod history;
pub mod lockfile;

pub use aggregator::{LatestStateAggregator, QueryError};
pub use dead_letter::{DeadLetter, DeadLetterQueue, QueueError};
pub use event_log::{EventStore, InMemoryEventStore, RecordKey, SledEventStore, StoreError};
pub use feedback::{FeedbackRecord, FeedbackStore, FeedbackSubmission, InMemoryFeedbackStore, SledFeedbackStore};
pub use lockfile::ProcessLock;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{StoreBackend, StoreConfig};

const EVENTS_DB_DIR: &str = "events.db";
const DEAD_LETTER_DIR: &str = "dead_letter";

/// Open stores sharing one backend.
#[derive(Clone)]
pub struct Stores {
    pub events: Arc<dyn EventStore>,
    pub feedback: Arc<dyn FeedbackStore>,
}

impl Stores {
    /// Open the configured backend under `config.data_dir`.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        match config.backend {
            StoreBackend::Memory => {
                tracing::warn!("Using in-memory event store, records are lost on restart");
                Ok(Self::in_memory())
            }
            StoreBackend::Sled => {
                let path = events_db_path(&config.data_dir);
                let events = SledEventStore::open(&path)
                    .with_context(|| format!("Failed to open event store at {}", path.display()))?;
                let feedback = SledFeedbackStore::open(&events).context("Failed to open feedback tree")?;
                tracing::info!(
                    path = %path.display(),
                    records = events.record_count().unwrap_or(0),
                    "Event store opened"
                );
                Ok(Self {
                    events: Arc::new(events),
                    feedback: Arc::new(feedback),
                })
            }
        }
    }

    pub fn in_memory() -> Self {
        Self {
            events: Arc::new(InMemoryEventStore::new()),
            feedback: Arc::new(InMemoryFeedbackStore::default()),
        }
    }
}

pub fn events_db_path(data_dir: &Path) -> PathBuf {
    data_dir.join(EVENTS_DB_DIR)
}

pub fn dead_letter_dir(data_dir: &Path) -> PathBuf {
    data_dir.join(DEAD_LETTER_DIR)
}
