//! API route handlers
//!
//! - units: latest state per unit and per-unit history
//! - history: cross-unit history and statistics
//! - feedback: classification feedback capture
//! - ingest: HTTP bridge onto the in-process message channel
//! - status: counters, health and Prometheus metrics
//! - upload: direct image upload to the artifact archiver

mod feedback;
mod history;
mod ingest;
mod status;
mod units;
mod upload;

pub use feedback::*;
pub use history::*;
pub use ingest::*;
pub use status::*;
pub use units::*;
pub use upload::*;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::archiver::ArtifactArchiver;
use crate::background::SystemHealth;
use crate::config::defaults::ARCHIVE_TIMEOUT_MS;
use crate::pipeline::{IngestSender, PipelineStats};
use crate::storage::{DeadLetterQueue, LatestStateAggregator, Stores};

// ============================================================================
// API State
// ============================================================================

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub stores: Stores,
    pub aggregator: LatestStateAggregator,
    pub stats: Arc<PipelineStats>,
    /// Latest health monitor cycle
    pub health: Arc<RwLock<SystemHealth>>,
    /// Present when HTTP ingest is enabled
    pub ingest: Option<IngestSender>,
    pub dead_letters: Option<Arc<DeadLetterQueue>>,
    /// Local archiver output served under `/artifacts`
    pub artifacts_dir: Option<PathBuf>,
    /// Target of `POST /upload/image`
    pub archiver: Option<Arc<dyn ArtifactArchiver>>,
    pub archive_timeout: Duration,
    pub scan_limit: usize,
}

impl ApiState {
    pub fn new(stores: Stores, stats: Arc<PipelineStats>, scan_limit: usize) -> Self {
        Self {
            aggregator: LatestStateAggregator::new(Arc::clone(&stores.events), scan_limit),
            stores,
            stats,
            health: Arc::new(RwLock::new(SystemHealth::default())),
            ingest: None,
            dead_letters: None,
            artifacts_dir: None,
            archiver: None,
            archive_timeout: Duration::from_millis(ARCHIVE_TIMEOUT_MS),
            scan_limit,
        }
    }

    pub fn with_health(mut self, health: Arc<RwLock<SystemHealth>>) -> Self {
        self.health = health;
        self
    }

    pub fn with_ingest(mut self, ingest: IngestSender) -> Self {
        self.ingest = Some(ingest);
        self
    }

    pub fn with_dead_letters(mut self, queue: Arc<DeadLetterQueue>) -> Self {
        self.dead_letters = Some(queue);
        self
    }

    pub fn with_artifacts_dir(mut self, dir: PathBuf) -> Self {
        self.artifacts_dir = Some(dir);
        self
    }

    pub fn with_archiver(mut self, archiver: Arc<dyn ArtifactArchiver>, timeout: Duration) -> Self {
        self.archiver = Some(archiver);
        self.archive_timeout = timeout;
        self
    }
}

/// Clamp an optional query limit into `1..=max`.
pub(crate) fn clamp_limit(requested: Option<usize>, default: usize, max: usize) -> usize {
    requested.unwrap_or(default).clamp(1, max)
}
