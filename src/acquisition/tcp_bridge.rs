//! TCP bridge client
//!
//! Connects to a broker-side bridge that re-publishes subscribed topics as
//! envelope lines over plain TCP (see [`super::envelope`]). Handles connect
//! timeouts, keepalive, stale-connection detection and reconnection with
//! exponential backoff. Subscription management stays on the bridge.

use rand::Rng;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use super::envelope::InboundMessage;
use crate::config::defaults::{
    CONNECT_TIMEOUT_SECS, RECONNECT_INITIAL_DELAY_SECS, RECONNECT_MAX_ATTEMPTS,
    RECONNECT_MAX_DELAY_SECS,
};

/// No line for this long and the connection is presumed dead.
const DEFAULT_READ_TIMEOUT_SECS: u64 = 900;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Timeout waiting for data")]
    Timeout,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Read failed: {0}")]
    ReadFailed(String),
}

/// Envelope-over-TCP client with reconnection.
pub struct TcpBridgeClient {
    addr: String,
    stream: Option<BufReader<TcpStream>>,
    line_buffer: Vec<u8>,
    read_timeout_secs: u64,
    max_attempts: u32,
    initial_delay_secs: u64,
    messages_received: u64,
    lines_rejected: u64,
    reconnections: u64,
}

impl TcpBridgeClient {
    /// `addr` is `host:port`.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            stream: None,
            line_buffer: Vec::with_capacity(4096),
            read_timeout_secs: DEFAULT_READ_TIMEOUT_SECS,
            max_attempts: RECONNECT_MAX_ATTEMPTS,
            initial_delay_secs: RECONNECT_INITIAL_DELAY_SECS,
            messages_received: 0,
            lines_rejected: 0,
            reconnections: 0,
        }
    }

    pub fn with_read_timeout(mut self, secs: u64) -> Self {
        self.read_timeout_secs = secs;
        self
    }

    pub fn with_reconnect(mut self, max_attempts: u32, initial_delay_secs: u64) -> Self {
        self.max_attempts = max_attempts;
        self.initial_delay_secs = initial_delay_secs;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// (messages received, lines rejected, reconnections)
    pub fn stats(&self) -> (u64, u64, u64) {
        (self.messages_received, self.lines_rejected, self.reconnections)
    }

    /// Connect with timeout and TCP keepalive.
    pub async fn connect(&mut self) -> Result<(), BridgeError> {
        if self.stream.is_some() {
            return Ok(());
        }

        tracing::info!(address = %self.addr, "Connecting to transport bridge");

        let connect_timeout = tokio::time::Duration::from_secs(CONNECT_TIMEOUT_SECS);
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| BridgeError::Timeout)?
            .map_err(|e| BridgeError::ConnectionFailed(e.to_string()))?;

        let sock_ref = socket2::SockRef::from(&stream);
        let keepalive = socket2::TcpKeepalive::new()
            .with_time(std::time::Duration::from_secs(30))
            .with_interval(std::time::Duration::from_secs(10));
        if let Err(e) = sock_ref.set_tcp_keepalive(&keepalive) {
            tracing::debug!(error = %e, "Could not enable TCP keepalive");
        }

        self.stream = Some(BufReader::new(stream));
        tracing::info!(address = %self.addr, "Transport bridge connected");
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(mut reader) = self.stream.take() {
            let _ = reader.get_mut().shutdown().await;
        }
    }

    /// Reconnect with exponential backoff; `Err` once attempts are exhausted.
    pub async fn reconnect(&mut self) -> Result<(), BridgeError> {
        self.disconnect().await;

        for attempt in 1..=self.max_attempts {
            let delay_secs = self
                .initial_delay_secs
                .saturating_mul(2u64.saturating_pow(attempt - 1))
                .min(RECONNECT_MAX_DELAY_SECS);

            // Up to 25% jitter on top of the backoff.
            let jitter_ms = rand::thread_rng().gen_range(0..=delay_secs * 250);

            tracing::warn!(
                attempt,
                max_attempts = self.max_attempts,
                delay_secs,
                jitter_ms,
                "Transport bridge reconnecting"
            );
            tokio::time::sleep(
                tokio::time::Duration::from_secs(delay_secs) + tokio::time::Duration::from_millis(jitter_ms),
            )
            .await;

            match self.connect().await {
                Ok(()) => {
                    self.reconnections += 1;
                    tracing::info!(attempt, total_reconnections = self.reconnections, "Reconnected");
                    return Ok(());
                }
                Err(e) => tracing::warn!(attempt, error = %e, "Reconnection attempt failed"),
            }
        }

        tracing::error!(max_attempts = self.max_attempts, "Transport bridge reconnection exhausted");
        Err(BridgeError::ConnectionFailed(format!(
            "failed to reconnect after {} attempts",
            self.max_attempts
        )))
    }

    /// Next message, reconnecting on timeout or a dropped connection.
    pub async fn read_message(&mut self) -> Result<InboundMessage, BridgeError> {
        if self.stream.is_none() {
            self.connect().await?;
        }

        loop {
            match self.read_message_inner().await {
                Ok(message) => {
                    self.messages_received += 1;
                    return Ok(message);
                }
                Err(BridgeError::Timeout) => {
                    tracing::warn!(timeout_secs = self.read_timeout_secs, "Bridge silent, reconnecting");
                    self.reconnect().await?;
                }
                Err(BridgeError::ConnectionClosed) => {
                    tracing::warn!("Bridge closed the connection, reconnecting");
                    self.reconnect().await?;
                }
                Err(BridgeError::ReadFailed(e)) => {
                    tracing::warn!(error = %e, "Bridge read failed, reconnecting");
                    self.reconnect().await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Read lines until one parses as an envelope. Does not reconnect.
    async fn read_message_inner(&mut self) -> Result<InboundMessage, BridgeError> {
        let read_timeout = tokio::time::Duration::from_secs(self.read_timeout_secs);

        loop {
            let reader = self
                .stream
                .as_mut()
                .ok_or_else(|| BridgeError::ConnectionFailed("not connected".to_string()))?;
            self.line_buffer.clear();

            let bytes = match tokio::time::timeout(read_timeout, reader.read_until(b'\n', &mut self.line_buffer)).await {
                Ok(Ok(b)) => b,
                Ok(Err(e)) => return Err(BridgeError::ReadFailed(e.to_string())),
                Err(_) => return Err(BridgeError::Timeout),
            };
            if bytes == 0 {
                return Err(BridgeError::ConnectionClosed);
            }

            let Ok(line) = std::str::from_utf8(&self.line_buffer) else {
                self.lines_rejected += 1;
                tracing::warn!(bytes, "Skipping bridge line that is not UTF-8");
                continue;
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match InboundMessage::from_envelope_line(line) {
                Ok(message) => return Ok(message),
                Err(e) => {
                    self.lines_rejected += 1;
                    tracing::warn!(error = %e, "Skipping unparseable bridge line");
                }
            }
        }
    }
}
