//! Telemetry acquisition
//!
//! Transport envelopes, the TCP bridge client and the event decoder that
//! turns raw payloads into typed readings.

pub mod decoder;
pub mod envelope;
pub mod tcp_bridge;

pub use decoder::{decode, decode_at, references_local_file, unit_id_from_topic, DecodeError};
pub use envelope::{EnvelopeError, InboundMessage};
pub use tcp_bridge::{BridgeError, TcpBridgeClient};
