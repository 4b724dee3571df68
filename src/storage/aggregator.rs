//! Latest-state aggregation
//!
//! Answers "current state of every unit" from the append-only log without a
//! separately maintained table. The list view walks the newest `scan_limit`
//! records keeping the first seen per unit, so a unit whose newest record
//! falls outside that window is omitted until it reports again. Single-unit
//! lookups go through the per-unit index and are exact.

use std::collections::HashSet;
use std::sync::Arc;

use super::event_log::{EventStore, StoreError};
use crate::types::{EnrichedRecord, UnitSummary};

#[derive(Debug, Clone, thiserror::Error)]
pub enum QueryError {
    #[error("no records for unit '{0}'")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Read-side view over an [`EventStore`]. Takes no locks of its own.
#[derive(Clone)]
pub struct LatestStateAggregator {
    store: Arc<dyn EventStore>,
    scan_limit: usize,
}

impl LatestStateAggregator {
    pub fn new(store: Arc<dyn EventStore>, scan_limit: usize) -> Self {
        Self { store, scan_limit }
    }

    pub const fn scan_limit(&self) -> usize {
        self.scan_limit
    }

    /// Newest record per unit among the last `scan_limit` records, ordered
    /// by capture time descending.
    pub fn list_latest_per_unit(&self) -> Result<Vec<EnrichedRecord>, StoreError> {
        let recent = self.store.scan_recent(self.scan_limit, None)?;
        let mut seen: HashSet<String> = HashSet::new();
        Ok(recent
            .into_iter()
            .filter(|r| seen.insert(r.unit_id.clone()))
            .collect())
    }

    /// Summary rows for the listing endpoint.
    pub fn unit_summaries(&self) -> Result<Vec<UnitSummary>, StoreError> {
        Ok(self
            .list_latest_per_unit()?
            .iter()
            .map(UnitSummary::from)
            .collect())
    }

    /// Exact latest record for one unit.
    pub fn latest_for_unit(&self, unit_id: &str) -> Result<EnrichedRecord, QueryError> {
        self.store
            .latest_for_unit(unit_id)?
            .ok_or_else(|| QueryError::NotFound(unit_id.to_string()))
    }
}
