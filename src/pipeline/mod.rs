//! Ingest pipeline
//!
//! ```text
//! MessageSource ──► decode ──► primary ──► escalate? ──┬─► secondary ─┐
//!                                                      └─► archive ───┴─► assemble ──► append
//!                                                                                        │
//!                                                               StoreUnavailable ──► dead-letter
//! ```
//!
//! Every message is an independent task; a semaphore bounds how many run at
//! once. There is no ordering across or within units.

pub mod assembler;
pub mod escalation;
pub mod processing_loop;
pub mod processor;
pub mod source;
mod state;

pub use assembler::{assemble, AssemblyError};
pub use escalation::{should_escalate, EscalationPolicy};
pub use processing_loop::{handle_message, ProcessingLoop};
pub use processor::{IngestPipeline, PipelineError};
pub use source::{ChannelSource, IngestRejected, IngestSender, MessageSource, ReplaySource, SourceEvent, StdinSource, TcpSource};
pub use state::{PipelineStats, StatsSnapshot, SystemStatus};
