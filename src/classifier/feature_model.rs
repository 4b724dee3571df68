//! Built-in feature model
//!
//! Derives a fixed feature vector from the environmental scalars and colour
//! channels, standardises it and scores each label with a linear softmax.
//! Weights come from a JSON file produced offline, or from the hand-tuned
//! colour-ratio defaults in [`SoftmaxWeights::builtin`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;
use std::path::Path;

use super::{Classifier, ClassifierError};
use crate::types::{Label, Reading};

pub const FEATURE_COUNT: usize = 10;

/// Feature order shared by [`features`] and weight files.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "temperature",
    "humidity",
    "light",
    "R",
    "G",
    "B",
    "rgb_mean",
    "rgb_std",
    "g_over_r",
    "b_over_r",
];

/// Guards the colour ratios against a zero red channel.
const RATIO_EPSILON: f64 = 1e-6;

/// Compute the feature vector for a reading.
///
/// `rgb_std` is the population standard deviation of the three channels.
pub fn features(reading: &Reading) -> [f64; FEATURE_COUNT] {
    let [r, g, b] = reading.color.as_f64();
    let rgb = [r, g, b];
    [
        reading.temperature,
        reading.humidity,
        reading.light,
        r,
        g,
        b,
        rgb.iter().mean(),
        rgb.iter().population_std_dev(),
        g / (r + RATIO_EPSILON),
        b / (r + RATIO_EPSILON),
    ]
}

/// Standard scaler followed by a multinomial logistic layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoftmaxWeights {
    pub labels: Vec<Label>,
    pub feature_mean: Vec<f64>,
    pub feature_scale: Vec<f64>,
    /// One row per label, one column per feature
    pub coefficients: Vec<Vec<f64>>,
    pub intercepts: Vec<f64>,
}

impl SoftmaxWeights {
    /// Hand-tuned weights: bluish, evenly lit panels score clean, a red/brown
    /// cast and high humidity score dirty, strong channel spread scores
    /// damaged.
    pub fn builtin() -> Self {
        Self {
            labels: vec![Label::Clean, Label::Dirty, Label::Damaged],
            feature_mean: vec![25.0, 50.0, 500.0, 128.0, 128.0, 128.0, 128.0, 20.0, 1.0, 1.0],
            feature_scale: vec![10.0, 20.0, 10_000.0, 64.0, 64.0, 64.0, 64.0, 32.0, 0.25, 0.25],
            coefficients: vec![
                vec![0.0, -0.2, 0.0, 0.0, 0.0, 0.0, 0.3, -0.5, 0.5, 2.0],
                vec![0.0, 0.4, 0.0, 0.0, 0.0, 0.0, -0.3, 0.0, -0.5, -2.0],
                vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.5, 0.0, 0.0],
            ],
            intercepts: vec![0.5, 0.0, -1.5],
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ClassifierError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ClassifierError::InvalidModel(format!("cannot read {}: {e}", path.display()))
        })?;
        let weights: Self = serde_json::from_str(&text).map_err(|e| {
            ClassifierError::InvalidModel(format!("cannot parse {}: {e}", path.display()))
        })?;
        weights.validate()?;
        Ok(weights)
    }

    /// Check dimensions and that every scale is usable as a divisor.
    pub fn validate(&self) -> Result<(), ClassifierError> {
        let invalid = |msg: String| Err(ClassifierError::InvalidModel(msg));

        if self.labels.is_empty() {
            return invalid("no labels".to_string());
        }
        if self.feature_mean.len() != FEATURE_COUNT || self.feature_scale.len() != FEATURE_COUNT {
            return invalid(format!("scaler must have {FEATURE_COUNT} entries"));
        }
        if self.feature_scale.iter().any(|s| !s.is_finite() || *s == 0.0) {
            return invalid("feature_scale entries must be finite and non-zero".to_string());
        }
        if self.coefficients.len() != self.labels.len() || self.intercepts.len() != self.labels.len() {
            return invalid("one coefficient row and intercept per label required".to_string());
        }
        if self.coefficients.iter().any(|row| row.len() != FEATURE_COUNT) {
            return invalid(format!("coefficient rows must have {FEATURE_COUNT} entries"));
        }
        Ok(())
    }

    /// Softmax probabilities per label.
    pub fn predict(&self, x: &[f64; FEATURE_COUNT]) -> BTreeMap<Label, f64> {
        let scaled: Vec<f64> = x
            .iter()
            .zip(self.feature_mean.iter().zip(&self.feature_scale))
            .map(|(v, (mean, scale))| (v - mean) / scale)
            .collect();

        let logits: Vec<f64> = self
            .coefficients
            .iter()
            .zip(&self.intercepts)
            .map(|(row, b)| b + row.iter().zip(&scaled).map(|(w, z)| w * z).sum::<f64>())
            .collect();

        let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let exps: Vec<f64> = logits.iter().map(|l| (l - max).exp()).collect();
        let total: f64 = exps.iter().sum();

        self.labels
            .iter()
            .zip(exps)
            .map(|(label, e)| (*label, e / total))
            .collect()
    }
}

/// In-process classifier backed by [`SoftmaxWeights`].
#[derive(Debug, Clone)]
pub struct FeatureModel {
    name: String,
    weights: SoftmaxWeights,
}

impl FeatureModel {
    pub fn new(name: impl Into<String>, weights: SoftmaxWeights) -> Result<Self, ClassifierError> {
        weights.validate()?;
        Ok(Self {
            name: name.into(),
            weights,
        })
    }

    pub fn builtin(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            weights: SoftmaxWeights::builtin(),
        }
    }

    pub fn from_file(name: impl Into<String>, path: &Path) -> Result<Self, ClassifierError> {
        let weights = SoftmaxWeights::from_file(path)?;
        tracing::info!(path = %path.display(), labels = weights.labels.len(), "Loaded feature model weights");
        Ok(Self {
            name: name.into(),
            weights,
        })
    }
}

#[async_trait]
impl Classifier for FeatureModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn predict(&self, reading: &Reading) -> Result<BTreeMap<Label, f64>, ClassifierError> {
        let x = features(reading);
        if x.iter().any(|v| !v.is_finite()) {
            return Err(ClassifierError::failure(&self.name, "non-finite feature"));
        }
        Ok(self.weights.predict(&x))
    }
}
