//! Classifier adapters
//!
//! A [`Classifier`] is an opaque predictor mapping a reading to a probability
//! per label. [`ClassifierAdapter`] bounds each call with a timeout, measures
//! inference time and normalises the output into a [`ClassificationResult`].
//!
//! Failure policy differs by role and is applied by the caller:
//! - primary: [`ClassifierAdapter::classify_or_unknown`] never fails
//! - secondary: [`ClassifierAdapter::classify`] errors become a null result

pub mod feature_model;
pub mod remote;

pub use feature_model::{FeatureModel, SoftmaxWeights, FEATURE_COUNT, FEATURE_NAMES};
pub use remote::RemoteClassifier;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::config::{ClassifierConfig, PrimaryKind, SecondaryKind};
use crate::config::defaults::{PRIMARY_MODEL_NAME, SECONDARY_MODEL_NAME};
use crate::types::{ClassificationResult, Label, Reading};

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("classifier '{model}' timed out after {elapsed_ms} ms")]
    Timeout { model: String, elapsed_ms: u64 },

    #[error("classifier '{model}' failed: {reason}")]
    Failure { model: String, reason: String },

    #[error("invalid model definition: {0}")]
    InvalidModel(String),
}

impl ClassifierError {
    pub fn failure(model: &str, reason: impl Into<String>) -> Self {
        Self::Failure {
            model: model.to_string(),
            reason: reason.into(),
        }
    }
}

/// An opaque predictor.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Model name recorded on every result.
    fn name(&self) -> &str;

    /// Raw probability per label. Missing labels count as 0; the adapter
    /// renormalises.
    async fn predict(&self, reading: &Reading) -> Result<BTreeMap<Label, f64>, ClassifierError>;
}

/// Timeout-bounded wrapper around a [`Classifier`].
#[derive(Clone)]
pub struct ClassifierAdapter {
    inner: Arc<dyn Classifier>,
    timeout: Duration,
}

impl std::fmt::Debug for ClassifierAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassifierAdapter")
            .field("model", &self.inner.name())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ClassifierAdapter {
    pub fn new(inner: Arc<dyn Classifier>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn model_name(&self) -> &str {
        self.inner.name()
    }

    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// One bounded call.
    #[allow(clippy::cast_possible_truncation)]
    pub async fn classify(&self, reading: &Reading) -> Result<ClassificationResult, ClassifierError> {
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.timeout, self.inner.predict(reading)).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Err(_) => Err(ClassifierError::Timeout {
                model: self.inner.name().to_string(),
                elapsed_ms,
            }),
            Ok(Err(e)) => Err(e),
            Ok(Ok(raw)) => Ok(ClassificationResult::from_probabilities(
                self.inner.name(),
                &raw,
                elapsed_ms,
            )),
        }
    }

    /// Bounded call that degrades to an `unknown` result on any failure.
    pub async fn classify_or_unknown(&self, reading: &Reading) -> ClassificationResult {
        match self.classify(reading).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(unit = %reading.unit_id, error = %e, "Primary classification degraded to unknown");
                ClassificationResult::unknown(self.inner.name())
            }
        }
    }
}

/// Build the primary adapter from config.
pub fn primary_from_config(config: &ClassifierConfig) -> Result<ClassifierAdapter, ClassifierError> {
    let model = match config.primary.kind {
        PrimaryKind::Heuristic => FeatureModel::builtin(PRIMARY_MODEL_NAME),
        PrimaryKind::Weights => {
            let path = config.primary.model_path.as_deref().ok_or_else(|| {
                ClassifierError::InvalidModel("classifier.primary.model_path is not set".to_string())
            })?;
            FeatureModel::from_file(PRIMARY_MODEL_NAME, path)?
        }
    };
    Ok(ClassifierAdapter::new(
        Arc::new(model),
        Duration::from_millis(config.primary.timeout_ms),
    ))
}

/// Build the secondary adapter from config; `None` when disabled.
pub fn secondary_from_config(
    config: &ClassifierConfig,
) -> Result<Option<ClassifierAdapter>, ClassifierError> {
    match config.secondary.kind {
        SecondaryKind::Disabled => Ok(None),
        SecondaryKind::Remote => {
            let endpoint = config.secondary.endpoint.as_deref().ok_or_else(|| {
                ClassifierError::InvalidModel("classifier.secondary.endpoint is not set".to_string())
            })?;
            let api_key = config
                .secondary
                .api_key_env
                .as_deref()
                .and_then(|var| std::env::var(var).ok());
            let timeout = Duration::from_millis(config.secondary.timeout_ms);
            let remote = RemoteClassifier::new(SECONDARY_MODEL_NAME, endpoint, api_key, timeout)?;
            Ok(Some(ClassifierAdapter::new(Arc::new(remote), timeout)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::fixtures::panel_reading;

    struct Slow;

    #[async_trait]
    impl Classifier for Slow {
        fn name(&self) -> &str {
            "slow"
        }
        async fn predict(&self, _: &Reading) -> Result<BTreeMap<Label, f64>, ClassifierError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(BTreeMap::from([(Label::Clean, 1.0)]))
        }
    }

    struct Broken;

    #[async_trait]
    impl Classifier for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        async fn predict(&self, _: &Reading) -> Result<BTreeMap<Label, f64>, ClassifierError> {
            Err(ClassifierError::failure("broken", "model crashed"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_yields_unknown() {
        let adapter = ClassifierAdapter::new(Arc::new(Slow), Duration::from_secs(2));
        let reading = panel_reading("panel1", 1_700_000_000);

        assert!(matches!(
            adapter.classify(&reading).await,
            Err(ClassifierError::Timeout { .. })
        ));
        let result = adapter.classify_or_unknown(&reading).await;
        assert_eq!(result.label, Label::Unknown);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.model, "slow");
    }

    #[tokio::test]
    async fn test_failure_yields_unknown() {
        let adapter = ClassifierAdapter::new(Arc::new(Broken), Duration::from_secs(2));
        let result = adapter.classify_or_unknown(&panel_reading("p", 0)).await;
        assert_eq!(result.label, Label::Unknown);
        assert_eq!(result.probability(Label::Unknown), 1.0);
    }

    #[test]
    fn test_secondary_disabled_by_default() {
        let config = ClassifierConfig::default();
        assert!(secondary_from_config(&config).unwrap().is_none());
        assert_eq!(primary_from_config(&config).unwrap().model_name(), PRIMARY_MODEL_NAME);
    }
}
