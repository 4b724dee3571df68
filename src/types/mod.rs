//! Core data types shared by the ingest and read paths.

mod classification;
mod reading;
mod record;

pub use classification::{ClassificationResult, ConfidenceBand, Label};
pub use reading::{ColorChannels, ImageRef, Reading};
pub use record::{EnrichedRecord, UnitSummary, PLACEHOLDER_THUMBNAIL};

#[cfg(test)]
pub(crate) use reading::fixtures;
