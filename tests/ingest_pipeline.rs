//! Ingest Pipeline Integration Tests
//!
//! Drives whole messages through `IngestPipeline` with stub classifiers and
//! archivers, asserting on what ends up in the event store.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

use panel_sentinel::acquisition::InboundMessage;
use panel_sentinel::archiver::{ArchiveError, ArtifactArchiver};
use panel_sentinel::classifier::{Classifier, ClassifierAdapter, ClassifierError};
use panel_sentinel::pipeline::{handle_message, PipelineError, PipelineStats, ProcessingLoop, ReplaySource, SystemStatus};
use panel_sentinel::storage::dead_letter::retry_once;
use panel_sentinel::storage::{
    DeadLetterQueue, EventStore, InMemoryEventStore, LatestStateAggregator, QueryError, SledEventStore, StoreError,
};
use panel_sentinel::types::{ImageRef, Label, Reading};
use panel_sentinel::{EnrichedRecord, IngestPipeline};

// ============================================================================
// Stubs
// ============================================================================

/// Answers `label` with `confidence`, the remainder going to one other label.
struct FixedClassifier {
    name: &'static str,
    label: Label,
    confidence: f64,
    delay: Duration,
}

impl FixedClassifier {
    fn new(name: &'static str, label: Label, confidence: f64) -> Self {
        Self {
            name,
            label,
            confidence,
            delay: Duration::ZERO,
        }
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl Classifier for FixedClassifier {
    fn name(&self) -> &str {
        self.name
    }

    async fn predict(&self, _: &Reading) -> Result<BTreeMap<Label, f64>, ClassifierError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let other = if self.label == Label::Clean { Label::Dirty } else { Label::Clean };
        Ok(BTreeMap::from([(self.label, self.confidence), (other, 1.0 - self.confidence)]))
    }
}

struct FailingArchiver;

#[async_trait]
impl ArtifactArchiver for FailingArchiver {
    fn backend(&self) -> &'static str {
        "failing"
    }

    async fn archive(&self, _: &str, _: DateTime<Utc>, _: &ImageRef) -> Result<String, ArchiveError> {
        Err(ArchiveError::Upload("content store returned 500".to_string()))
    }
}

struct FixedUrlArchiver;

#[async_trait]
impl ArtifactArchiver for FixedUrlArchiver {
    fn backend(&self) -> &'static str {
        "fixed"
    }

    async fn archive(&self, unit_id: &str, captured_at: DateTime<Utc>, _: &ImageRef) -> Result<String, ArchiveError> {
        Ok(format!("https://artifacts.example.com/{unit_id}/{}.jpg", captured_at.timestamp()))
    }
}

/// Takes `delay` before handing back a URL.
struct SlowUrlArchiver {
    delay: Duration,
}

#[async_trait]
impl ArtifactArchiver for SlowUrlArchiver {
    fn backend(&self) -> &'static str {
        "slow"
    }

    async fn archive(&self, unit_id: &str, _: DateTime<Utc>, _: &ImageRef) -> Result<String, ArchiveError> {
        tokio::time::sleep(self.delay).await;
        Ok(format!("https://artifacts.example.com/{unit_id}/slow.jpg"))
    }
}

/// A store whose backend has gone away.
struct DownStore;

fn down() -> StoreError {
    StoreError::Unavailable("disk detached".to_string())
}

impl EventStore for DownStore {
    fn append(&self, _: EnrichedRecord) -> Result<EnrichedRecord, StoreError> {
        Err(down())
    }
    fn scan_recent(&self, _: usize, _: Option<DateTime<Utc>>) -> Result<Vec<EnrichedRecord>, StoreError> {
        Err(down())
    }
    fn latest_for_unit(&self, _: &str) -> Result<Option<EnrichedRecord>, StoreError> {
        Err(down())
    }
    fn unit_history(&self, _: &str, _: usize) -> Result<Vec<EnrichedRecord>, StoreError> {
        Err(down())
    }
    fn record_count(&self) -> Result<usize, StoreError> {
        Err(down())
    }
    fn prune_before(&self, _: DateTime<Utc>) -> Result<usize, StoreError> {
        Err(down())
    }
    fn ping(&self) -> Result<(), StoreError> {
        Err(down())
    }
    fn backend_name(&self) -> &'static str {
        "down"
    }
}

// ============================================================================
// Helpers
// ============================================================================

const T1: i64 = 1_700_000_100;
const T2: i64 = 1_700_000_200;

fn panel_payload(timestamp: i64) -> Vec<u8> {
    format!(r#"{{"temperature":24.1,"humidity":60,"light":200,"R":120,"G":110,"B":90,"timestamp":{timestamp}}}"#)
        .into_bytes()
}

fn panel_message(unit: &str, timestamp: i64) -> InboundMessage {
    InboundMessage::new(format!("solar/panel/{unit}/data"), panel_payload(timestamp))
}

fn adapter(classifier: FixedClassifier, timeout: Duration) -> ClassifierAdapter {
    ClassifierAdapter::new(Arc::new(classifier), timeout)
}

fn dirty_pipeline(store: Arc<dyn EventStore>) -> IngestPipeline {
    let primary = adapter(FixedClassifier::new("primary", Label::Dirty, 0.993), Duration::from_secs(2));
    IngestPipeline::new(primary, store, Arc::new(PipelineStats::new()))
}

fn clean_pipeline(store: Arc<dyn EventStore>) -> IngestPipeline {
    let primary = adapter(FixedClassifier::new("primary", Label::Clean, 0.91), Duration::from_secs(2));
    IngestPipeline::new(primary, store, Arc::new(PipelineStats::new()))
}

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

// ============================================================================
// Tests
// ============================================================================

/// Dirty at 0.993 escalates; a secondary that never answers in time leaves
/// the record stored with `escalated` set and no secondary result.
#[tokio::test(start_paused = true)]
async fn slow_secondary_still_persists_escalated_record() {
    let store = Arc::new(InMemoryEventStore::new());
    let secondary = adapter(
        FixedClassifier::new("secondary", Label::Clean, 0.8).slow(Duration::from_secs(60)),
        Duration::from_secs(2),
    );
    let pipeline = dirty_pipeline(store.clone()).with_secondary(Some(secondary));

    let stored = pipeline.process(panel_message("panel1", T1)).await.unwrap();

    assert_eq!(stored.unit_id, "panel1");
    assert_eq!(stored.primary.label, Label::Dirty);
    assert!((stored.primary.confidence - 0.993).abs() < 1e-9);
    assert!(stored.escalated);
    assert!(stored.secondary.is_none());
    assert!(stored.is_persisted());

    let snapshot = pipeline.stats().snapshot();
    assert_eq!(snapshot.escalated, 1);
    assert_eq!(snapshot.secondary_failures, 1);
    assert_eq!(store.latest_for_unit("panel1").unwrap().unwrap(), stored);
}

#[tokio::test]
async fn answering_secondary_is_recorded() {
    let store = Arc::new(InMemoryEventStore::new());
    let secondary = adapter(FixedClassifier::new("secondary", Label::Clean, 0.8), Duration::from_secs(2));
    let pipeline = dirty_pipeline(store).with_secondary(Some(secondary));

    let stored = pipeline.process(panel_message("panel1", T1)).await.unwrap();
    let secondary = stored.secondary.as_ref().expect("secondary result");
    assert_eq!(secondary.label, Label::Clean);
    assert_eq!(secondary.model, "secondary");
    assert!(stored.models_disagree());
}

#[tokio::test]
async fn confident_clean_is_not_escalated() {
    let store = Arc::new(InMemoryEventStore::new());
    let secondary = adapter(FixedClassifier::new("secondary", Label::Dirty, 0.8), Duration::from_secs(2));
    let pipeline = clean_pipeline(store).with_secondary(Some(secondary));

    let stored = pipeline.process(panel_message("panel1", T1)).await.unwrap();
    assert!(!stored.escalated);
    assert!(stored.secondary.is_none());
    assert_eq!(pipeline.stats().snapshot().escalated, 0);
}

#[tokio::test]
async fn latest_follows_capture_time_not_arrival() {
    let store = Arc::new(InMemoryEventStore::new());
    let pipeline = clean_pipeline(store.clone());

    pipeline.process(panel_message("panel1", T2)).await.unwrap();
    pipeline.process(panel_message("panel1", T1)).await.unwrap();

    let aggregator = LatestStateAggregator::new(store, 1000);
    let latest = aggregator.latest_for_unit("panel1").unwrap();
    assert_eq!(latest.captured_at, at(T2));

    let listed = aggregator.list_latest_per_unit().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].captured_at, at(T2));
}

#[tokio::test(start_paused = true)]
async fn secondary_and_archival_run_concurrently() {
    let store = Arc::new(InMemoryEventStore::new());
    let secondary = adapter(
        FixedClassifier::new("secondary", Label::Clean, 0.8).slow(Duration::from_secs(1)),
        Duration::from_secs(2),
    );
    let archiver = SlowUrlArchiver { delay: Duration::from_secs(1) };
    let pipeline = dirty_pipeline(store.clone())
        .with_secondary(Some(secondary))
        .with_archiver(Some(Arc::new(archiver)), Duration::from_secs(2));

    let payload = format!(
        r#"{{"temperature":24.1,"humidity":60,"light":200,"R":120,"G":110,"B":90,"timestamp":{T1},"image":"https://cam.example.com/p1.jpg"}}"#
    );
    let started = tokio::time::Instant::now();
    let stored = pipeline
        .process(InboundMessage::new("solar/panel/panel1/data", payload.into_bytes()))
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert!(stored.escalated);
    assert_eq!(stored.secondary.as_ref().map(|s| s.label), Some(Label::Clean));
    assert_eq!(stored.artifact_url.as_deref(), Some("https://artifacts.example.com/panel1/slow.jpg"));
    // Sequential calls would need two seconds.
    assert!(elapsed >= Duration::from_secs(1), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(1500), "elapsed {elapsed:?}");
    assert_eq!(store.record_count().unwrap(), 1);
}

#[tokio::test]
async fn failed_archival_keeps_record_without_url() {
    let store = Arc::new(InMemoryEventStore::new());
    let pipeline =
        clean_pipeline(store.clone()).with_archiver(Some(Arc::new(FailingArchiver)), Duration::from_secs(1));

    let payload = br#"{"temperature":24.1,"humidity":60,"light":200,"R":120,"G":110,"B":90,"image":"https://cam.example.com/p1.jpg"}"#;
    let stored = pipeline
        .process(InboundMessage::new("solar/panel/panel1/data", payload.to_vec()))
        .await
        .unwrap();

    assert!(stored.artifact_url.is_none());
    assert_eq!(store.record_count().unwrap(), 1);
    assert_eq!(pipeline.stats().snapshot().archive_failures, 1);
}

#[tokio::test]
async fn archived_url_is_recorded() {
    let store = Arc::new(InMemoryEventStore::new());
    let pipeline = clean_pipeline(store).with_archiver(Some(Arc::new(FixedUrlArchiver)), Duration::from_secs(1));

    let payload = format!(
        r#"{{"temperature":24.1,"humidity":60,"light":200,"R":120,"G":110,"B":90,"timestamp":{T1},"image_path":"/var/cam/p1.jpg"}}"#
    );
    let stored = pipeline
        .process(InboundMessage::new("solar/panel/panel1/data", payload.into_bytes()))
        .await
        .unwrap();

    assert_eq!(
        stored.artifact_url.as_deref(),
        Some(format!("https://artifacts.example.com/panel1/{T1}.jpg").as_str())
    );
}

#[tokio::test]
async fn readings_without_image_skip_archiver() {
    let store = Arc::new(InMemoryEventStore::new());
    let pipeline =
        clean_pipeline(store).with_archiver(Some(Arc::new(FailingArchiver)), Duration::from_secs(1));

    let stored = pipeline.process(panel_message("panel1", T1)).await.unwrap();
    assert!(stored.artifact_url.is_none());
    assert_eq!(pipeline.stats().snapshot().archive_failures, 0);
}

#[tokio::test]
async fn negative_humidity_stores_nothing() {
    let store = Arc::new(InMemoryEventStore::new());
    let pipeline = clean_pipeline(store.clone());

    let payload = br#"{"temperature":24.1,"humidity":-5,"light":200,"R":120,"G":110,"B":90}"#;
    let err = assert_err!(
        pipeline
            .process(InboundMessage::new("solar/panel/panel1/data", payload.to_vec()))
            .await
    );

    assert!(matches!(err, PipelineError::Malformed(_)));
    assert_eq!(store.record_count().unwrap(), 0);
    assert!(store.latest_for_unit("panel1").unwrap().is_none());
}

#[tokio::test]
async fn duplicate_messages_are_two_records() {
    let store = Arc::new(InMemoryEventStore::new());
    let pipeline = clean_pipeline(store.clone());

    let first = assert_ok!(pipeline.process(panel_message("panel1", T1)).await);
    let second = assert_ok!(pipeline.process(panel_message("panel1", T1)).await);

    assert_eq!(store.record_count().unwrap(), 2);
    assert_ne!(first.sequence, second.sequence);
    // Equal capture times: the later append wins.
    assert_eq!(store.latest_for_unit("panel1").unwrap().unwrap().sequence, second.sequence);
}

#[tokio::test]
async fn empty_store_then_single_record() {
    let store = Arc::new(InMemoryEventStore::new());
    let aggregator = LatestStateAggregator::new(store.clone(), 1000);

    assert!(matches!(aggregator.latest_for_unit("panel1"), Err(QueryError::NotFound(_))));
    assert!(aggregator.list_latest_per_unit().unwrap().is_empty());

    let stored = clean_pipeline(store).process(panel_message("panel1", T1)).await.unwrap();
    assert_eq!(aggregator.latest_for_unit("panel1").unwrap(), stored);
    assert_eq!(aggregator.list_latest_per_unit().unwrap(), vec![stored]);
}

#[tokio::test]
async fn store_outage_dead_letters_and_retry_recovers() {
    let dir = tempfile::tempdir().unwrap();
    let queue = DeadLetterQueue::open(dir.path().join("dead_letter"), 100).unwrap();
    let pipeline = clean_pipeline(Arc::new(DownStore));

    handle_message(&pipeline, Some(&queue), panel_message("panel1", T1)).await;
    handle_message(&pipeline, Some(&queue), panel_message("panel2", T2)).await;

    let snapshot = pipeline.stats().snapshot();
    assert_eq!(snapshot.persisted, 0);
    assert_eq!(snapshot.dead_lettered, 2);
    assert_eq!(snapshot.status, SystemStatus::Degraded);
    assert_eq!(queue.pending_count().unwrap(), 2);

    let recovered = InMemoryEventStore::new();
    assert_eq!(retry_once(&queue, &recovered).unwrap(), 2);
    assert_eq!(queue.pending_count().unwrap(), 0);
    assert_eq!(recovered.latest_for_unit("panel2").unwrap().unwrap().captured_at, at(T2));
}

#[tokio::test]
async fn replay_into_sled_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.db");

    {
        let store = Arc::new(SledEventStore::open(&path).unwrap());
        let pipeline = Arc::new(clean_pipeline(store.clone()));
        let messages = (0..12)
            .map(|i| panel_message(&format!("panel{}", i % 3), T1 + i))
            .collect();
        let mut source = ReplaySource::new(messages, 0);

        let snapshot = ProcessingLoop::new(pipeline, 4, CancellationToken::new())
            .run(&mut source)
            .await;
        assert_eq!(snapshot.persisted, 12);
        store.flush().unwrap();
    }

    let reopened = SledEventStore::open(&path).unwrap();
    assert_eq!(reopened.record_count().unwrap(), 12);
    // panel2 got offsets 2, 5, 8, 11.
    assert_eq!(reopened.latest_for_unit("panel2").unwrap().unwrap().captured_at, at(T1 + 11));
}
