//! Pipeline state and counters
//!
//! Shared between the ingest workers, the health monitor and API handlers.
//! Counters are atomics so concurrent workers never contend on a lock; the
//! last message time and status sit behind a short-held `RwLock`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Instant;

/// Coarse lifecycle of the ingest side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemStatus {
    /// Started, no message seen yet
    Initializing,
    /// Receiving messages
    Ingesting,
    /// Last append failed; records are being dead-lettered
    Degraded,
    /// Source ended or shutdown requested
    Stopped,
}

impl std::fmt::Display for SystemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initializing => write!(f, "Initializing"),
            Self::Ingesting => write!(f, "Ingesting"),
            Self::Degraded => write!(f, "Degraded"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Live pipeline counters.
#[derive(Debug)]
pub struct PipelineStats {
    started: Instant,
    started_at: DateTime<Utc>,
    received: AtomicU64,
    malformed: AtomicU64,
    rejected: AtomicU64,
    persisted: AtomicU64,
    escalated: AtomicU64,
    secondary_failures: AtomicU64,
    archive_failures: AtomicU64,
    dead_lettered: AtomicU64,
    last_message_at: RwLock<Option<DateTime<Utc>>>,
    status: RwLock<SystemStatus>,
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self {
            started: Instant::now(),
            started_at: Utc::now(),
            received: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            persisted: AtomicU64::new(0),
            escalated: AtomicU64::new(0),
            secondary_failures: AtomicU64::new(0),
            archive_failures: AtomicU64::new(0),
            dead_lettered: AtomicU64::new(0),
            last_message_at: RwLock::new(None),
            status: RwLock::new(SystemStatus::Initializing),
        }
    }
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self, at: DateTime<Utc>) {
        self.received.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = self.last_message_at.write() {
            if last.map_or(true, |prev| at > prev) {
                *last = Some(at);
            }
        }
        self.set_status_if(SystemStatus::Initializing, SystemStatus::Ingesting);
    }

    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    /// Decoded but refused by the assembler.
    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persisted(&self) {
        self.persisted.fetch_add(1, Ordering::Relaxed);
        self.set_status_if(SystemStatus::Degraded, SystemStatus::Ingesting);
    }

    pub fn record_escalated(&self) {
        self.escalated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_secondary_failure(&self) {
        self.secondary_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_archive_failure(&self) {
        self.archive_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dead_lettered(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
        self.set_status(SystemStatus::Degraded);
    }

    pub fn last_message_at(&self) -> Option<DateTime<Utc>> {
        self.last_message_at.read().ok().and_then(|g| *g)
    }

    pub fn status(&self) -> SystemStatus {
        self.status.read().map_or(SystemStatus::Degraded, |g| *g)
    }

    pub fn set_status(&self, status: SystemStatus) {
        if let Ok(mut current) = self.status.write() {
            *current = status;
        }
    }

    fn set_status_if(&self, from: SystemStatus, to: SystemStatus) {
        if let Ok(mut current) = self.status.write() {
            if *current == from {
                *current = to;
            }
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            status: self.status(),
            started_at: self.started_at,
            uptime_secs: self.uptime_secs(),
            received: self.received.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            escalated: self.escalated.load(Ordering::Relaxed),
            secondary_failures: self.secondary_failures.load(Ordering::Relaxed),
            archive_failures: self.archive_failures.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            last_message_at: self.last_message_at(),
        }
    }
}

/// Point-in-time copy of [`PipelineStats`] for the status endpoint and logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub status: SystemStatus,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
    pub received: u64,
    pub malformed: u64,
    pub rejected: u64,
    pub persisted: u64,
    pub escalated: u64,
    pub secondary_failures: u64,
    pub archive_failures: u64,
    pub dead_lettered: u64,
    pub last_message_at: Option<DateTime<Utc>>,
}

impl std::fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Pipeline: {} received, {} persisted, {} malformed, {} escalated ({} secondary failures), {} dead-lettered",
            self.received,
            self.persisted,
            self.malformed,
            self.escalated,
            self.secondary_failures,
            self.dead_lettered
        )
    }
}
