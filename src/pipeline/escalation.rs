//! Escalation decision
//!
//! A reading goes to the secondary model when the primary calls it dirty, or
//! when the primary is unsure of a real label. An `unknown` primary result
//! (timeout, failure) is never escalated on confidence alone.

use crate::types::{ClassificationResult, Label};

/// Threshold-based escalation policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EscalationPolicy {
    threshold: f64,
}

impl EscalationPolicy {
    pub const fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub const fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn should_escalate(&self, primary: &ClassificationResult) -> bool {
        should_escalate(primary, self.threshold)
    }
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self::new(crate::config::defaults::ESCALATION_THRESHOLD)
    }
}

/// `dirty`, or below `threshold` with a label other than `unknown`.
pub fn should_escalate(primary: &ClassificationResult, threshold: f64) -> bool {
    primary.label == Label::Dirty || (primary.confidence < threshold && primary.label != Label::Unknown)
}
