//! Per-message ingest pipeline
//!
//! decode → primary → escalation → (secondary ∥ archive) → assemble → append.
//!
//! Classifier and archiver failures are absorbed into `unknown`/`None` and
//! counted; only decode, assembly and store failures reach the caller.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::assembler::{assemble, AssemblyError};
use super::escalation::EscalationPolicy;
use super::state::PipelineStats;
use crate::acquisition::{decode_at, unit_id_from_topic, DecodeError, InboundMessage};
use crate::archiver::{self, archive_best_effort, ArtifactArchiver};
use crate::classifier::{self, ClassifierAdapter};
use crate::config::ServiceConfig;
use crate::storage::{EventStore, StoreError};
use crate::types::{ClassificationResult, EnrichedRecord, Label, Reading};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Malformed(#[from] DecodeError),
    #[error("record for unit '{unit_id}' rejected: {source}")]
    Assembly {
        unit_id: String,
        #[source]
        source: AssemblyError,
    },
    #[error("event store unavailable for unit '{}': {source}", .record.unit_id)]
    StoreUnavailable {
        record: Box<EnrichedRecord>,
        #[source]
        source: StoreError,
    },
}

/// Everything needed to turn one inbound message into a stored record.
///
/// Cheap to share: workers hold it behind an `Arc` and call
/// [`process`](IngestPipeline::process) concurrently.
pub struct IngestPipeline {
    primary: ClassifierAdapter,
    secondary: Option<ClassifierAdapter>,
    archiver: Option<Arc<dyn ArtifactArchiver>>,
    archive_timeout: Duration,
    escalation: EscalationPolicy,
    store: Arc<dyn EventStore>,
    topic_prefix: String,
    stats: Arc<PipelineStats>,
}

impl IngestPipeline {
    pub fn new(primary: ClassifierAdapter, store: Arc<dyn EventStore>, stats: Arc<PipelineStats>) -> Self {
        Self {
            primary,
            secondary: None,
            archiver: None,
            archive_timeout: Duration::from_millis(crate::config::defaults::ARCHIVE_TIMEOUT_MS),
            escalation: EscalationPolicy::default(),
            store,
            topic_prefix: crate::config::defaults::TOPIC_PREFIX.to_string(),
            stats,
        }
    }

    pub fn with_secondary(mut self, secondary: Option<ClassifierAdapter>) -> Self {
        self.secondary = secondary;
        self
    }

    pub fn with_archiver(mut self, archiver: Option<Arc<dyn ArtifactArchiver>>, timeout: Duration) -> Self {
        self.archiver = archiver;
        self.archive_timeout = timeout;
        self
    }

    pub fn with_escalation(mut self, escalation: EscalationPolicy) -> Self {
        self.escalation = escalation;
        self
    }

    pub fn with_topic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.topic_prefix = prefix.into();
        self
    }

    /// Build classifiers and archiver from config.
    pub fn from_config(
        config: &ServiceConfig,
        store: Arc<dyn EventStore>,
        stats: Arc<PipelineStats>,
    ) -> anyhow::Result<Self> {
        use anyhow::Context;

        let primary = classifier::primary_from_config(&config.classifier).context("Failed to build primary classifier")?;
        let secondary =
            classifier::secondary_from_config(&config.classifier).context("Failed to build secondary classifier")?;
        let archiver = archiver::from_config(&config.archiver, &config.store.data_dir)
            .context("Failed to build artifact archiver")?;

        info!(
            primary = primary.model_name(),
            secondary = secondary.as_ref().map_or("disabled", ClassifierAdapter::model_name),
            archiver = archiver.as_ref().map_or("disabled", |a| a.backend()),
            threshold = config.classifier.escalation_threshold,
            "Ingest pipeline configured"
        );

        Ok(Self::new(primary, store, stats)
            .with_secondary(secondary)
            .with_archiver(archiver, Duration::from_millis(config.archiver.timeout_ms))
            .with_escalation(EscalationPolicy::new(config.classifier.escalation_threshold))
            .with_topic_prefix(config.transport.topic_prefix.clone()))
    }

    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    pub fn archiver(&self) -> Option<&Arc<dyn ArtifactArchiver>> {
        self.archiver.as_ref()
    }

    pub const fn archive_timeout(&self) -> Duration {
        self.archive_timeout
    }

    /// Full path for one message. Returns the stored record.
    pub async fn process(&self, message: InboundMessage) -> Result<EnrichedRecord, PipelineError> {
        self.stats.record_received(message.received_at);

        let unit_id = unit_id_from_topic(&message.topic, &self.topic_prefix).unwrap_or_default();
        let reading = decode_at(&unit_id, &message.payload, message.received_at).map_err(|e| {
            self.stats.record_malformed();
            warn!(topic = %message.topic, error = %e, "Dropping malformed reading");
            e
        })?;

        let record = self.enrich(reading).await?;
        self.append(record)
    }

    /// Classify, escalate and archive a decoded reading into an unpersisted record.
    pub async fn enrich(&self, reading: Reading) -> Result<EnrichedRecord, PipelineError> {
        let primary = self.primary.classify_or_unknown(&reading).await;
        let escalated = self.escalation.should_escalate(&primary);
        if escalated {
            self.stats.record_escalated();
        }

        let (secondary, artifact_url) =
            tokio::join!(self.run_secondary(escalated, &reading), self.run_archive(&reading));

        debug!(
            unit = %reading.unit_id,
            label = %primary.label,
            confidence = primary.confidence,
            escalated,
            secondary = ?secondary.as_ref().map(|s| s.label),
            artifact = artifact_url.is_some(),
            "Reading classified"
        );

        let unit_id = reading.unit_id.clone();
        assemble(reading, primary, escalated, secondary, artifact_url).map_err(|source| {
            self.stats.record_rejected();
            PipelineError::Assembly { unit_id, source }
        })
    }

    async fn run_secondary(&self, escalated: bool, reading: &Reading) -> Option<ClassificationResult> {
        if !escalated {
            return None;
        }
        let secondary = self.secondary.as_ref()?;
        match secondary.classify(reading).await {
            Ok(result) if result.label == Label::Unknown => {
                self.stats.record_secondary_failure();
                warn!(unit = %reading.unit_id, model = %result.model, "Secondary returned no usable probabilities");
                None
            }
            Ok(result) => Some(result),
            Err(e) => {
                self.stats.record_secondary_failure();
                warn!(unit = %reading.unit_id, error = %e, "Secondary classification failed, storing without it");
                None
            }
        }
    }

    async fn run_archive(&self, reading: &Reading) -> Option<String> {
        let archiver = self.archiver.as_ref()?;
        reading.image.as_ref()?;
        let url = archive_best_effort(archiver.as_ref(), self.archive_timeout, reading).await;
        if url.is_none() {
            self.stats.record_archive_failure();
        }
        url
    }

    fn append(&self, record: EnrichedRecord) -> Result<EnrichedRecord, PipelineError> {
        match self.store.append(record.clone()) {
            Ok(stored) => {
                self.stats.record_persisted();
                info!(
                    unit = %stored.unit_id,
                    label = %stored.primary.label,
                    confidence = stored.primary.confidence,
                    escalated = stored.escalated,
                    sequence = ?stored.sequence,
                    "Record persisted"
                );
                Ok(stored)
            }
            Err(source) => Err(PipelineError::StoreUnavailable {
                record: Box::new(record),
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{Classifier, ClassifierError};
    use crate::storage::InMemoryEventStore;
    use crate::types::Label;
    use async_trait::async_trait;
    use std::collections::BTreeMap;

    struct Fixed(Label, f64);

    #[async_trait]
    impl Classifier for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }
        async fn predict(&self, _: &Reading) -> Result<BTreeMap<Label, f64>, ClassifierError> {
            let rest = if self.0 == Label::Clean { Label::Dirty } else { Label::Clean };
            Ok(BTreeMap::from([(self.0, self.1), (rest, 1.0 - self.1)]))
        }
    }

    /// Answers with an empty probability map.
    struct Empty;

    #[async_trait]
    impl Classifier for Empty {
        fn name(&self) -> &str {
            "empty"
        }
        async fn predict(&self, _: &Reading) -> Result<BTreeMap<Label, f64>, ClassifierError> {
            Ok(BTreeMap::new())
        }
    }

    fn pipeline(label: Label, confidence: f64) -> (IngestPipeline, Arc<InMemoryEventStore>) {
        let store = Arc::new(InMemoryEventStore::new());
        let primary = ClassifierAdapter::new(Arc::new(Fixed(label, confidence)), Duration::from_secs(1));
        let pipeline = IngestPipeline::new(primary, store.clone(), Arc::new(PipelineStats::new()));
        (pipeline, store)
    }

    const PANEL1: &[u8] = br#"{"temperature":24.1,"humidity":60,"light":200,"R":120,"G":110,"B":90}"#;

    #[tokio::test]
    async fn test_process_persists_record() {
        let (pipeline, store) = pipeline(Label::Clean, 0.9);
        let stored = pipeline
            .process(InboundMessage::new("solar/panel/panel1/data", PANEL1.to_vec()))
            .await
            .unwrap();

        assert!(stored.is_persisted());
        assert!(!stored.escalated);
        assert_eq!(store.latest_for_unit("panel1").unwrap().unwrap(), stored);
        assert_eq!(pipeline.stats().snapshot().persisted, 1);
    }

    #[tokio::test]
    async fn test_escalated_without_secondary_records_decision() {
        let (pipeline, _) = pipeline(Label::Dirty, 0.95);
        let stored = pipeline
            .process(InboundMessage::new("solar/panel/panel1", PANEL1.to_vec()))
            .await
            .unwrap();
        assert!(stored.escalated);
        assert!(stored.secondary.is_none());
        assert_eq!(pipeline.stats().snapshot().secondary_failures, 0);
    }

    #[tokio::test]
    async fn test_unknown_secondary_is_dropped_and_counted() {
        let (pipeline, store) = pipeline(Label::Dirty, 0.95);
        let secondary = ClassifierAdapter::new(Arc::new(Empty), Duration::from_secs(1));
        let pipeline = pipeline.with_secondary(Some(secondary));

        let stored = pipeline
            .process(InboundMessage::new("solar/panel/panel1/data", PANEL1.to_vec()))
            .await
            .unwrap();

        assert!(stored.escalated);
        assert!(stored.secondary.is_none());
        assert!(store.latest_for_unit("panel1").unwrap().unwrap().secondary.is_none());
        assert_eq!(pipeline.stats().snapshot().secondary_failures, 1);
    }

    #[tokio::test]
    async fn test_malformed_never_reaches_store() {
        let (pipeline, store) = pipeline(Label::Clean, 0.9);
        let payload = br#"{"temperature":24.1,"humidity":-5,"light":200,"R":1,"G":2,"B":3}"#;
        let err = pipeline
            .process(InboundMessage::new("solar/panel/panel1/data", payload.to_vec()))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Malformed(_)));
        assert_eq!(store.record_count().unwrap(), 0);
        assert_eq!(pipeline.stats().snapshot().malformed, 1);
    }

    #[tokio::test]
    async fn test_unusable_topic_is_malformed() {
        let (pipeline, _) = pipeline(Label::Clean, 0.9);
        let err = pipeline
            .process(InboundMessage::new("/", PANEL1.to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Malformed(_)));
    }
}
