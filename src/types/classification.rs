//! Classifier output types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Closed set of cleanliness labels a classifier can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    Clean,
    Dirty,
    Damaged,
    Unknown,
}

impl Label {
    pub const ALL: [Self; 4] = [Self::Clean, Self::Dirty, Self::Damaged, Self::Unknown];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::Dirty => "dirty",
            Self::Damaged => "damaged",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Label {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "clean" | "propre" => Ok(Self::Clean),
            "dirty" | "sale" => Ok(Self::Dirty),
            "damaged" => Ok(Self::Damaged),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unrecognised label '{other}'")),
        }
    }
}

const PROBABILITY_SUM_TOLERANCE: f64 = 1e-6;

/// Output of one classifier invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub label: Label,
    /// Probability of `label`, in [0, 1]
    pub confidence: f64,
    /// Probability per label; always carries every key of [`Label::ALL`]
    pub probabilities: BTreeMap<Label, f64>,
    /// Name of the model that produced this result
    pub model: String,
    /// Wall time spent in the model call
    #[serde(default)]
    pub inference_ms: u64,
}

impl ClassificationResult {
    /// The result recorded when a classifier times out or fails.
    pub fn unknown(model: impl Into<String>) -> Self {
        let mut probabilities: BTreeMap<Label, f64> = Label::ALL.iter().map(|l| (*l, 0.0)).collect();
        probabilities.insert(Label::Unknown, 1.0);
        Self {
            label: Label::Unknown,
            confidence: 0.0,
            probabilities,
            model: model.into(),
            inference_ms: 0,
        }
    }

    /// Build a result from a (possibly partial) probability map.
    ///
    /// Missing labels are filled with 0, negative or non-finite entries are
    /// zeroed, and the map is renormalised to sum to 1. The label is the
    /// arg-max; ties resolve to the first label in [`Label::ALL`] order.
    /// An all-zero map yields [`ClassificationResult::unknown`].
    pub fn from_probabilities(
        model: impl Into<String>,
        raw: &BTreeMap<Label, f64>,
        inference_ms: u64,
    ) -> Self {
        let model = model.into();
        let mut probabilities: BTreeMap<Label, f64> = Label::ALL
            .iter()
            .map(|l| {
                let p = raw.get(l).copied().unwrap_or(0.0);
                (*l, if p.is_finite() && p > 0.0 { p } else { 0.0 })
            })
            .collect();

        let max = probabilities.values().copied().fold(0.0, f64::max);
        if max <= 0.0 {
            let mut unknown = Self::unknown(model);
            unknown.inference_ms = inference_ms;
            return unknown;
        }
        // Scale by the largest entry first so the sum cannot overflow.
        for p in probabilities.values_mut() {
            *p /= max;
        }
        let total: f64 = probabilities.values().sum();
        for p in probabilities.values_mut() {
            *p /= total;
        }

        let (label, confidence) = Label::ALL
            .iter()
            .map(|l| (*l, probabilities[l]))
            .fold((Label::Unknown, f64::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

        Self {
            label,
            confidence: confidence.clamp(0.0, 1.0),
            probabilities,
            model,
            inference_ms,
        }
    }

    /// Probability assigned to a specific label.
    pub fn probability(&self, label: Label) -> f64 {
        self.probabilities.get(&label).copied().unwrap_or(0.0)
    }

    /// Whether the values satisfy the result invariants.
    pub fn is_well_formed(&self) -> bool {
        (0.0..=1.0).contains(&self.confidence)
            && self.probabilities.values().all(|p| p.is_finite() && *p >= 0.0)
            && Label::ALL.iter().all(|l| self.probabilities.contains_key(l))
            && (self.probabilities.values().sum::<f64>() - 1.0).abs() < PROBABILITY_SUM_TOLERANCE
    }
}

/// Confidence band used by history statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceBand {
    High,
    Medium,
    Low,
}

impl ConfidenceBand {
    pub fn of(confidence: f64) -> Self {
        if confidence >= 0.9 {
            Self::High
        } else if confidence >= 0.7 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_result_shape() {
        let r = ClassificationResult::unknown("primary");
        assert_eq!(r.label, Label::Unknown);
        assert_eq!(r.confidence, 0.0);
        assert_eq!(r.probability(Label::Unknown), 1.0);
        assert!(r.is_well_formed());
    }

    #[test]
    fn test_from_probabilities_fills_and_normalises() {
        let raw = BTreeMap::from([(Label::Clean, 1.0), (Label::Dirty, 3.0)]);
        let r = ClassificationResult::from_probabilities("m", &raw, 4);
        assert_eq!(r.label, Label::Dirty);
        assert!((r.confidence - 0.75).abs() < 1e-9);
        assert_eq!(r.probabilities.len(), 4);
        assert_eq!(r.probability(Label::Damaged), 0.0);
        let sum: f64 = r.probabilities.values().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_from_probabilities_rejects_garbage() {
        let raw = BTreeMap::from([(Label::Clean, f64::NAN), (Label::Dirty, -2.0)]);
        let r = ClassificationResult::from_probabilities("m", &raw, 0);
        assert_eq!(r.label, Label::Unknown);
        assert_eq!(r.confidence, 0.0);
    }

    #[test]
    fn test_from_probabilities_survives_huge_values() {
        let raw = BTreeMap::from([(Label::Clean, 1e308), (Label::Dirty, 1e308)]);
        let r = ClassificationResult::from_probabilities("m", &raw, 0);
        assert_eq!(r.label, Label::Clean);
        assert!((r.confidence - 0.5).abs() < 1e-9);
        assert!((r.probability(Label::Dirty) - 0.5).abs() < 1e-9);
        assert!(r.is_well_formed());
    }

    #[test]
    fn test_unnormalised_result_is_not_well_formed() {
        let mut r = ClassificationResult::from_probabilities(
            "m",
            &BTreeMap::from([(Label::Clean, 1.0)]),
            0,
        );
        assert!(r.is_well_formed());
        r.probabilities.insert(Label::Dirty, 0.5);
        assert!(!r.is_well_formed());
    }

    #[test]
    fn test_label_parsing() {
        assert_eq!("Dirty".parse::<Label>(), Ok(Label::Dirty));
        assert_eq!("propre".parse::<Label>(), Ok(Label::Clean));
        assert!("muddy".parse::<Label>().is_err());
    }

    #[test]
    fn test_confidence_bands() {
        assert_eq!(ConfidenceBand::of(0.95), ConfidenceBand::High);
        assert_eq!(ConfidenceBand::of(0.7), ConfidenceBand::Medium);
        assert_eq!(ConfidenceBand::of(0.2), ConfidenceBand::Low);
    }
}
