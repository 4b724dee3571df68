//! Transport envelope
//!
//! Line-oriented sources (stdin, TCP bridge, replay files) carry one JSON
//! object per line: `{"topic": "solar/panel/p1/data", "payload": {...}}`.
//! The payload may be a JSON object or a string holding the raw payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One message as delivered by the transport, before decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            received_at: Utc::now(),
        }
    }

    /// Parse one envelope line.
    pub fn from_envelope_line(line: &str) -> Result<Self, EnvelopeError> {
        let envelope: Envelope = serde_json::from_str(line)?;
        if envelope.topic.trim().is_empty() {
            return Err(EnvelopeError::MissingTopic);
        }
        let payload = match envelope.payload {
            Value::String(raw) => raw.into_bytes(),
            Value::Object(_) => serde_json::to_vec(&envelope.payload)?,
            other => return Err(EnvelopeError::BadPayload(type_name(&other))),
        };
        Ok(Self::new(envelope.topic, payload))
    }

    /// Encode as an envelope line (no trailing newline).
    pub fn to_envelope_line(&self) -> Result<String, EnvelopeError> {
        let payload = serde_json::from_slice::<Value>(&self.payload)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&self.payload).into_owned()));
        Ok(serde_json::to_string(&Envelope {
            topic: self.topic.clone(),
            payload,
        })?)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    topic: String,
    payload: Value,
}

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("invalid envelope JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("envelope has an empty topic")]
    MissingTopic,
    #[error("envelope payload must be an object or string, got {0}")]
    BadPayload(&'static str),
}

const fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
