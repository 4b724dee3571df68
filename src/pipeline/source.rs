//! Message sources
//!
//! A single trait over where `(topic, payload)` messages come from: stdin
//! (JSON lines envelope), the TCP bridge, the in-process channel fed by the
//! HTTP ingest endpoint, and a replay file.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use tokio::io::AsyncBufRead;
use tokio::sync::mpsc;

use crate::acquisition::{BridgeError, InboundMessage, TcpBridgeClient};

/// Events produced by a message source.
#[derive(Debug)]
pub enum SourceEvent {
    Message(InboundMessage),
    /// No more data: EOF for files and stdin, all senders dropped for channels.
    Eof,
}

/// Where inbound messages come from.
///
/// Implementations handle framing, reconnection and pacing internally. The
/// processing loop calls [`next_message`](MessageSource::next_message) in a
/// `select!` with cancellation.
#[async_trait]
pub trait MessageSource: Send + 'static {
    /// Returns `Err` only on unrecoverable errors (e.g. reconnection exhausted).
    async fn next_message(&mut self) -> Result<SourceEvent>;

    fn source_name(&self) -> &str;
}

// ============================================================================
// Replay Source
// ============================================================================

/// Replays pre-loaded messages with an optional delay between them.
pub struct ReplaySource {
    messages: std::vec::IntoIter<InboundMessage>,
    delay_ms: u64,
    yielded_first: bool,
}

impl ReplaySource {
    pub fn new(messages: Vec<InboundMessage>, delay_ms: u64) -> Self {
        Self {
            messages: messages.into_iter(),
            delay_ms,
            yielded_first: false,
        }
    }

    /// Load a file of envelope lines. Unparseable lines are skipped.
    pub fn from_file(path: &Path, delay_ms: u64) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read replay file {}", path.display()))?;
        let mut messages = Vec::new();
        for (n, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match InboundMessage::from_envelope_line(line) {
                Ok(message) => messages.push(message),
                Err(e) => tracing::warn!(line = n + 1, error = %e, "Skipping replay line"),
            }
        }
        tracing::info!(path = %path.display(), messages = messages.len(), "Replay file loaded");
        Ok(Self::new(messages, delay_ms))
    }
}

#[async_trait]
impl MessageSource for ReplaySource {
    async fn next_message(&mut self) -> Result<SourceEvent> {
        if self.yielded_first && self.delay_ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(self.delay_ms)).await;
        }
        match self.messages.next() {
            Some(message) => {
                self.yielded_first = true;
                Ok(SourceEvent::Message(message))
            }
            None => Ok(SourceEvent::Eof),
        }
    }

    fn source_name(&self) -> &str {
        "replay"
    }
}

// ============================================================================
// Stdin Source
// ============================================================================

/// Reads envelope lines from stdin.
///
/// `mosquitto_sub -v -t 'solar/panel/#' | jq -c ... | panel-sentinel --stdin`
pub struct StdinSource {
    reader: Box<dyn AsyncBufRead + Unpin + Send>,
    line_buffer: Vec<u8>,
    lines_rejected: u64,
}

impl StdinSource {
    pub fn new() -> Self {
        Self::from_reader(tokio::io::BufReader::new(tokio::io::stdin()))
    }

    /// Envelope lines from any buffered reader.
    pub fn from_reader(reader: impl AsyncBufRead + Unpin + Send + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            line_buffer: Vec::with_capacity(4096),
            lines_rejected: 0,
        }
    }

    pub const fn lines_rejected(&self) -> u64 {
        self.lines_rejected
    }
}

impl Default for StdinSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageSource for StdinSource {
    async fn next_message(&mut self) -> Result<SourceEvent> {
        use tokio::io::AsyncBufReadExt;
        loop {
            self.line_buffer.clear();
            let bytes = self
                .reader
                .read_until(b'\n', &mut self.line_buffer)
                .await
                .context("stdin read failed")?;
            if bytes == 0 {
                return Ok(SourceEvent::Eof);
            }
            let Ok(line) = std::str::from_utf8(&self.line_buffer) else {
                self.lines_rejected += 1;
                tracing::warn!(bytes, "Skipping stdin line that is not UTF-8");
                continue;
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match InboundMessage::from_envelope_line(line) {
                Ok(message) => return Ok(SourceEvent::Message(message)),
                Err(e) => {
                    self.lines_rejected += 1;
                    tracing::warn!(error = %e, "Skipping unparseable stdin line");
                }
            }
        }
    }

    fn source_name(&self) -> &str {
        "stdin"
    }
}

// ============================================================================
// TCP Source
// ============================================================================

/// Reads envelope lines from a TCP bridge.
///
/// Wraps [`TcpBridgeClient`], which reconnects with backoff internally.
pub struct TcpSource {
    client: TcpBridgeClient,
}

impl TcpSource {
    pub async fn connect(client: TcpBridgeClient) -> Result<Self> {
        let mut client = client;
        client
            .connect()
            .await
            .with_context(|| format!("Failed to connect to bridge at {}", client.addr()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl MessageSource for TcpSource {
    async fn next_message(&mut self) -> Result<SourceEvent> {
        match self.client.read_message().await {
            Ok(message) => Ok(SourceEvent::Message(message)),
            Err(BridgeError::ConnectionClosed) => Ok(SourceEvent::Eof),
            Err(e) => Err(anyhow::anyhow!("TCP bridge error: {e}")),
        }
    }

    fn source_name(&self) -> &str {
        "tcp-bridge"
    }
}

// ============================================================================
// Channel Source (HTTP ingest)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum IngestRejected {
    #[error("ingest queue is full")]
    QueueFull,
    #[error("ingest queue is closed")]
    Closed,
}

/// Producer half handed to the HTTP layer.
#[derive(Debug, Clone)]
pub struct IngestSender {
    tx: mpsc::Sender<InboundMessage>,
    topic_prefix: String,
}

impl IngestSender {
    /// Enqueue a raw payload for `unit_id` as `<prefix>/<unit_id>/data`.
    /// Never waits: a full queue is reported to the caller.
    pub fn submit(&self, unit_id: &str, payload: impl Into<Vec<u8>>) -> Result<(), IngestRejected> {
        let topic = format!("{}/{}/data", self.topic_prefix.trim_end_matches('/'), unit_id);
        self.tx
            .try_send(InboundMessage::new(topic, payload))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => IngestRejected::QueueFull,
                mpsc::error::TrySendError::Closed(_) => IngestRejected::Closed,
            })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half: yields messages pushed through [`IngestSender`].
pub struct ChannelSource {
    rx: mpsc::Receiver<InboundMessage>,
}

impl ChannelSource {
    /// Bounded channel pair.
    pub fn new(capacity: usize, topic_prefix: impl Into<String>) -> (IngestSender, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            IngestSender {
                tx,
                topic_prefix: topic_prefix.into(),
            },
            Self { rx },
        )
    }
}

#[async_trait]
impl MessageSource for ChannelSource {
    async fn next_message(&mut self) -> Result<SourceEvent> {
        Ok(match self.rx.recv().await {
            Some(message) => SourceEvent::Message(message),
            None => SourceEvent::Eof,
        })
    }

    fn source_name(&self) -> &str {
        "http-ingest"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_source_builds_topic_and_reports_full() {
        let (sender, mut source) = ChannelSource::new(1, "solar/panel/");
        sender.submit("panel7", br#"{"temperature":20}"#.to_vec()).unwrap();
        assert_eq!(sender.submit("panel7", b"{}".to_vec()), Err(IngestRejected::QueueFull));

        match source.next_message().await.unwrap() {
            SourceEvent::Message(m) => assert_eq!(m.topic, "solar/panel/panel7/data"),
            SourceEvent::Eof => panic!("expected a message"),
        }

        drop(sender);
        assert!(matches!(source.next_message().await.unwrap(), SourceEvent::Eof));
    }

    #[tokio::test]
    async fn test_channel_closed_rejects() {
        let (sender, source) = ChannelSource::new(4, "solar/panel");
        drop(source);
        assert!(sender.is_closed());
        assert_eq!(sender.submit("a", b"{}".to_vec()), Err(IngestRejected::Closed));
    }

    #[tokio::test]
    async fn test_line_source_skips_invalid_utf8_and_continues() {
        let good = InboundMessage::new("solar/panel/p4/data", br#"{"temperature":1}"#.to_vec())
            .to_envelope_line()
            .unwrap();
        let mut input = b"\xff\xfe garbage\nnot json\n".to_vec();
        input.extend_from_slice(format!("{good}\n").as_bytes());

        let mut source = StdinSource::from_reader(std::io::Cursor::new(input));
        match source.next_message().await.unwrap() {
            SourceEvent::Message(m) => assert_eq!(m.topic, "solar/panel/p4/data"),
            SourceEvent::Eof => panic!("expected the valid line after the bad ones"),
        }
        assert_eq!(source.lines_rejected(), 2);
        assert!(matches!(source.next_message().await.unwrap(), SourceEvent::Eof));
    }

    #[tokio::test]
    async fn test_replay_file_skips_bad_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replay.jsonl");
        let good = InboundMessage::new("solar/panel/p1/data", br#"{"temperature":1}"#.to_vec())
            .to_envelope_line()
            .unwrap();
        std::fs::write(&path, format!("{good}\nnot json\n\n{good}\n")).unwrap();

        let mut source = ReplaySource::from_file(&path, 0).unwrap();
        let mut count = 0;
        while let SourceEvent::Message(m) = source.next_message().await.unwrap() {
            assert_eq!(m.topic, "solar/panel/p1/data");
            count += 1;
        }
        assert_eq!(count, 2);
    }
}
