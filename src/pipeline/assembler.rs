//! Record assembly
//!
//! Pure merge of a reading and everything learned about it into one
//! [`EnrichedRecord`]. No I/O; the writer stamps persistence fields later.

use crate::types::{ClassificationResult, EnrichedRecord, Reading};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AssemblyError {
    #[error("reading has an empty unit id")]
    EmptyUnitId,
    #[error("{role} classification from '{model}' is out of range (confidence {confidence})")]
    InvalidClassification {
        role: &'static str,
        model: String,
        confidence: f64,
    },
    #[error("secondary classification present on a reading that was not escalated")]
    SecondaryWithoutEscalation,
}

/// Merge the pieces of one ingest into a record.
pub fn assemble(
    reading: Reading,
    primary: ClassificationResult,
    escalated: bool,
    secondary: Option<ClassificationResult>,
    artifact_url: Option<String>,
) -> Result<EnrichedRecord, AssemblyError> {
    if reading.unit_id.trim().is_empty() {
        return Err(AssemblyError::EmptyUnitId);
    }
    check("primary", &primary)?;
    if let Some(secondary) = &secondary {
        if !escalated {
            return Err(AssemblyError::SecondaryWithoutEscalation);
        }
        check("secondary", secondary)?;
    }

    Ok(EnrichedRecord {
        unit_id: reading.unit_id.clone(),
        captured_at: reading.captured_at,
        reading,
        primary,
        escalated,
        secondary,
        artifact_url,
        persisted_at: None,
        sequence: None,
    })
}

fn check(role: &'static str, result: &ClassificationResult) -> Result<(), AssemblyError> {
    if result.is_well_formed() {
        Ok(())
    } else {
        Err(AssemblyError::InvalidClassification {
            role,
            model: result.model.clone(),
            confidence: result.confidence,
        })
    }
}
