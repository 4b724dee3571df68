//! Record history queries and statistics
//!
//! Newest-first listings across units or for one unit, and aggregate
//! statistics over a recent window of the log.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use super::event_log::{EventStore, StoreError};
use crate::types::{ConfidenceBand, EnrichedRecord, Label};

/// One page of history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryPage {
    pub records: Vec<EnrichedRecord>,
    pub total_count: usize,
    pub has_more: bool,
}

/// Filter for cross-unit history.
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub unit_id: Option<String>,
    /// Only records captured within the last `days` days
    pub days: Option<i64>,
    pub limit: usize,
}

/// Newest-first records matching `filter`.
///
/// `has_more` is set when at least one further record matched.
pub fn query(
    store: &dyn EventStore,
    filter: &HistoryFilter,
    now: DateTime<Utc>,
) -> Result<HistoryPage, StoreError> {
    let fetch = filter.limit.saturating_add(1);
    let since = filter.days.map(|d| now - Duration::days(d));

    let mut records = match filter.unit_id.as_deref() {
        Some(unit) => {
            let mut rows = store.unit_history(unit, fetch)?;
            if let Some(since) = since {
                rows.retain(|r| r.captured_at >= since);
            }
            rows
        }
        None => store.scan_recent(fetch, since)?,
    };

    let has_more = records.len() > filter.limit;
    records.truncate(filter.limit);
    Ok(HistoryPage {
        total_count: records.len(),
        records,
        has_more,
    })
}

/// Count of records per confidence band.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfidenceLevels {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

/// Per-day record counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyTrend {
    pub date: NaiveDate,
    pub total: usize,
    pub by_label: BTreeMap<Label, usize>,
}

/// Aggregate statistics over recent records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryStats {
    pub period_days: i64,
    pub unit_id: Option<String>,
    pub total_records: usize,
    pub unit_count: usize,
    pub label_distribution: BTreeMap<Label, usize>,
    pub confidence_levels: ConfidenceLevels,
    pub escalated: usize,
    /// Escalated records whose secondary call produced nothing
    pub secondary_missing: usize,
    pub model_disagreements: usize,
    pub average_confidence: f64,
    pub average_inference_ms: f64,
    /// Oldest day first
    pub daily_trend: Vec<DailyTrend>,
}

/// Statistics over at most `scan_limit` records from the last `days` days.
#[allow(clippy::cast_precision_loss)]
pub fn stats(
    store: &dyn EventStore,
    days: i64,
    unit_id: Option<&str>,
    scan_limit: usize,
    now: DateTime<Utc>,
) -> Result<HistoryStats, StoreError> {
    let since = now - Duration::days(days);
    let records: Vec<EnrichedRecord> = match unit_id {
        Some(unit) => store
            .unit_history(unit, scan_limit)?
            .into_iter()
            .filter(|r| r.captured_at >= since)
            .collect(),
        None => store.scan_recent(scan_limit, Some(since))?,
    };

    let mut label_distribution: BTreeMap<Label, usize> = Label::ALL.iter().map(|l| (*l, 0)).collect();
    let mut confidence_levels = ConfidenceLevels::default();
    let mut daily: BTreeMap<NaiveDate, DailyTrend> = BTreeMap::new();
    let mut units = HashSet::new();
    let (mut escalated, mut secondary_missing, mut disagreements) = (0, 0, 0);
    let (mut confidence_sum, mut inference_sum) = (0.0, 0.0);

    for record in &records {
        units.insert(record.unit_id.as_str());
        *label_distribution.entry(record.primary.label).or_default() += 1;
        match ConfidenceBand::of(record.primary.confidence) {
            ConfidenceBand::High => confidence_levels.high += 1,
            ConfidenceBand::Medium => confidence_levels.medium += 1,
            ConfidenceBand::Low => confidence_levels.low += 1,
        }
        if record.escalated {
            escalated += 1;
            if record.secondary.is_none() {
                secondary_missing += 1;
            }
        }
        if record.models_disagree() {
            disagreements += 1;
        }
        confidence_sum += record.primary.confidence;
        inference_sum += record.primary.inference_ms as f64;

        let date = record.captured_at.date_naive();
        let day = daily.entry(date).or_insert_with(|| DailyTrend {
            date,
            total: 0,
            by_label: BTreeMap::new(),
        });
        day.total += 1;
        *day.by_label.entry(record.primary.label).or_default() += 1;
    }

    let n = records.len();
    let mean = |sum: f64| if n == 0 { 0.0 } else { sum / n as f64 };

    Ok(HistoryStats {
        period_days: days,
        unit_id: unit_id.map(str::to_string),
        total_records: n,
        unit_count: units.len(),
        label_distribution,
        confidence_levels,
        escalated,
        secondary_missing,
        model_disagreements: disagreements,
        average_confidence: mean(confidence_sum),
        average_inference_ms: mean(inference_sum),
        daily_trend: daily.into_values().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::event_log::InMemoryEventStore;
    use crate::types::fixtures::panel_reading;
    use crate::types::ClassificationResult;

    fn record(unit: &str, at: DateTime<Utc>, label: Label, confidence: f64) -> EnrichedRecord {
        let mut reading = panel_reading(unit, 0);
        reading.captured_at = at;
        let raw = BTreeMap::from([(label, confidence), (Label::Unknown, 1.0 - confidence)]);
        EnrichedRecord {
            unit_id: unit.to_string(),
            captured_at: at,
            reading,
            primary: ClassificationResult::from_probabilities("primary", &raw, 10),
            escalated: label == Label::Dirty,
            secondary: None,
            artifact_url: None,
            persisted_at: None,
            sequence: None,
        }
    }

    fn seeded(now: DateTime<Utc>) -> InMemoryEventStore {
        let store = InMemoryEventStore::new();
        store.append(record("a", now - Duration::days(40), Label::Clean, 0.95)).unwrap();
        store.append(record("a", now - Duration::days(2), Label::Dirty, 0.8)).unwrap();
        store.append(record("b", now - Duration::days(1), Label::Clean, 0.95)).unwrap();
        store.append(record("b", now - Duration::hours(1), Label::Clean, 0.6)).unwrap();
        store
    }

    #[test]
    fn test_query_pages_and_filters() {
        let now = Utc::now();
        let store = seeded(now);

        let page = query(&store, &HistoryFilter { limit: 2, ..Default::default() }, now).unwrap();
        assert_eq!(page.total_count, 2);
        assert!(page.has_more);
        assert!(page.records[0].captured_at > page.records[1].captured_at);

        let filter = HistoryFilter { unit_id: Some("a".into()), days: Some(30), limit: 10 };
        let page = query(&store, &filter, now).unwrap();
        assert_eq!(page.total_count, 1);
        assert!(!page.has_more);
    }

    #[test]
    fn test_stats_window() {
        let now = Utc::now();
        let store = seeded(now);
        let s = stats(&store, 30, None, 500, now).unwrap();

        assert_eq!(s.total_records, 3);
        assert_eq!(s.unit_count, 2);
        assert_eq!(s.label_distribution[&Label::Clean], 2);
        assert_eq!(s.label_distribution[&Label::Dirty], 1);
        assert_eq!(s.confidence_levels, ConfidenceLevels { high: 1, medium: 1, low: 1 });
        assert_eq!(s.escalated, 1);
        assert_eq!(s.secondary_missing, 1);
        assert!((s.average_confidence - (0.95 + 0.8 + 0.6) / 3.0).abs() < 1e-9);
        assert_eq!(s.daily_trend.iter().map(|d| d.total).sum::<usize>(), 3);
    }

    #[test]
    fn test_stats_empty_store() {
        let s = stats(&InMemoryEventStore::new(), 30, Some("none"), 500, Utc::now()).unwrap();
        assert_eq!(s.total_records, 0);
        assert_eq!(s.average_confidence, 0.0);
        assert!(s.daily_trend.is_empty());
    }
}
