//! Bounded concurrent processing loop shared by every message source.
//!
//! Each message becomes an independent task in a `JoinSet`; a semaphore caps
//! how many are in flight. Records the store refused are handed to the
//! dead-letter queue instead of being lost.

use futures::FutureExt;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::processor::{IngestPipeline, PipelineError};
use super::source::{MessageSource, SourceEvent};
use super::state::{StatsSnapshot, SystemStatus};
use crate::acquisition::InboundMessage;
use crate::storage::{DeadLetter, DeadLetterQueue};

/// Drives one [`MessageSource`] through the shared [`IngestPipeline`].
pub struct ProcessingLoop {
    pipeline: Arc<IngestPipeline>,
    dead_letters: Option<Arc<DeadLetterQueue>>,
    workers: usize,
    cancel_token: CancellationToken,
}

impl ProcessingLoop {
    pub fn new(pipeline: Arc<IngestPipeline>, workers: usize, cancel_token: CancellationToken) -> Self {
        Self {
            pipeline,
            dead_letters: None,
            workers: workers.max(1),
            cancel_token,
        }
    }

    pub fn with_dead_letters(mut self, queue: Arc<DeadLetterQueue>) -> Self {
        self.dead_letters = Some(queue);
        self
    }

    /// Run until the source is exhausted or cancellation, then wait for
    /// in-flight messages. Returns the pipeline counters at exit.
    pub async fn run<S: MessageSource>(self, source: &mut S) -> StatsSnapshot {
        let permits = Arc::new(Semaphore::new(self.workers));
        let mut tasks: JoinSet<()> = JoinSet::new();
        let mut dispatched = 0u64;

        info!(source = source.source_name(), workers = self.workers, "Processing messages");

        loop {
            reap_finished(&mut tasks);

            let event = tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(source = source.source_name(), "Shutdown signal received");
                    break;
                }
                result = source.next_message() => match result {
                    Ok(ev) => ev,
                    Err(e) => {
                        warn!(source = source.source_name(), error = %e, "Source failed");
                        break;
                    }
                }
            };

            let message = match event {
                SourceEvent::Message(m) => m,
                SourceEvent::Eof => {
                    info!(source = source.source_name(), dispatched, "Source reached end");
                    break;
                }
            };

            let permit = tokio::select! {
                () = self.cancel_token.cancelled() => break,
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break,
                }
            };

            dispatched += 1;
            let pipeline = Arc::clone(&self.pipeline);
            let dead_letters = self.dead_letters.clone();
            tasks.spawn(async move {
                handle_message(&pipeline, dead_letters.as_deref(), message).await;
                drop(permit);
            });
        }

        let in_flight = tasks.len();
        if in_flight > 0 {
            debug!(in_flight, "Waiting for in-flight messages");
        }
        while let Some(joined) = tasks.join_next().await {
            log_join_error(joined);
        }

        if self.cancel_token.is_cancelled() {
            self.pipeline.stats().set_status(SystemStatus::Stopped);
        }
        let snapshot = self.pipeline.stats().snapshot();
        info!(source = source.source_name(), "{snapshot}");
        snapshot
    }
}

/// Process one message, dead-lettering it when the store is down.
pub async fn handle_message(pipeline: &IngestPipeline, dead_letters: Option<&DeadLetterQueue>, message: InboundMessage) {
    match pipeline.process(message).await {
        Ok(_) | Err(PipelineError::Malformed(_)) => {}
        Err(e @ PipelineError::Assembly { .. }) => warn!(error = %e, "Record dropped"),
        Err(PipelineError::StoreUnavailable { record, source }) => {
            error!(unit = %record.unit_id, error = %source, "Append failed");
            let Some(queue) = dead_letters else {
                error!(unit = %record.unit_id, "No dead-letter queue configured, record lost");
                return;
            };
            match queue.enqueue(&DeadLetter::new(*record, source.to_string())) {
                Ok(()) => pipeline.stats().record_dead_lettered(),
                Err(e) => error!(error = %e, "Dead-letter enqueue failed, record lost"),
            }
        }
    }
}

fn reap_finished(tasks: &mut JoinSet<()>) {
    while let Some(Some(joined)) = tasks.join_next().now_or_never() {
        log_join_error(joined);
    }
}

fn log_join_error(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "Ingest task panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{ClassifierAdapter, FeatureModel};
    use crate::pipeline::source::ReplaySource;
    use crate::pipeline::state::PipelineStats;
    use crate::storage::{EventStore, InMemoryEventStore};
    use std::time::Duration;

    fn message(unit: &str, ts: i64) -> InboundMessage {
        let payload = format!(
            r#"{{"temperature":24.1,"humidity":60,"light":200,"R":120,"G":110,"B":90,"timestamp":{ts}}}"#
        );
        InboundMessage::new(format!("solar/panel/{unit}/data"), payload.into_bytes())
    }

    #[tokio::test]
    async fn test_replay_processes_every_message() {
        let store = Arc::new(InMemoryEventStore::new());
        let primary = ClassifierAdapter::new(Arc::new(FeatureModel::builtin("primary")), Duration::from_secs(2));
        let pipeline = Arc::new(IngestPipeline::new(primary, store.clone(), Arc::new(PipelineStats::new())));

        let mut messages: Vec<InboundMessage> =
            (0..20).map(|i| message(&format!("panel{}", i % 4), 1_700_000_000 + i)).collect();
        messages.push(InboundMessage::new("solar/panel/bad/data", b"{}".to_vec()));
        let mut source = ReplaySource::new(messages, 0);

        let snapshot = ProcessingLoop::new(pipeline, 3, CancellationToken::new())
            .run(&mut source)
            .await;

        assert_eq!(snapshot.received, 21);
        assert_eq!(snapshot.persisted, 20);
        assert_eq!(snapshot.malformed, 1);
        assert_eq!(store.record_count().unwrap(), 20);
    }

    #[tokio::test]
    async fn test_cancelled_loop_stops() {
        let store = Arc::new(InMemoryEventStore::new());
        let primary = ClassifierAdapter::new(Arc::new(FeatureModel::builtin("primary")), Duration::from_secs(2));
        let pipeline = Arc::new(IngestPipeline::new(primary, store, Arc::new(PipelineStats::new())));
        let (_sender, mut source) = crate::pipeline::source::ChannelSource::new(4, "solar/panel");

        let token = CancellationToken::new();
        token.cancel();
        let snapshot = ProcessingLoop::new(pipeline, 2, token).run(&mut source).await;
        assert_eq!(snapshot.status, SystemStatus::Stopped);
        assert_eq!(snapshot.received, 0);
    }
}
