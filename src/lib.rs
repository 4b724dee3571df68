//! Panel Sentinel: solar panel telemetry ingestion and cleanliness classification
//!
//! ## Architecture
//!
//! - **Acquisition**: topic → unit id, payload → typed [`Reading`]
//! - **Classifier**: primary model on every reading, secondary model on escalation
//! - **Archiver**: best-effort image upload producing an artifact URL
//! - **Pipeline**: bounded concurrent ingest from any [`pipeline::MessageSource`]
//! - **Storage**: append-only sled event log with a per-unit index, latest-state
//!   aggregation, history, feedback and a dead-letter queue
//! - **API**: pull-only REST surface under `/api/v1`

pub mod acquisition;
pub mod api;
pub mod archiver;
pub mod background;
pub mod classifier;
pub mod config;
pub mod pipeline;
pub mod storage;
pub mod types;

pub use config::ServiceConfig;
pub use types::{ClassificationResult, EnrichedRecord, Label, Reading, UnitSummary};

pub use pipeline::{IngestPipeline, PipelineError, ProcessingLoop};
pub use storage::{EventStore, LatestStateAggregator, Stores};

pub use api::{create_app, ApiState};
