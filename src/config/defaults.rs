//! System-wide default constants.
//!
//! Values used when the TOML config leaves a key unset, plus limits that are
//! not operator-tunable. Grouped by subsystem.

// ============================================================================
// Server
// ============================================================================

/// Default HTTP listen address.
pub const SERVER_ADDR: &str = "0.0.0.0:8080";

/// Maximum accepted request body (bytes). Inline base64 images dominate.
pub const REQUEST_BODY_LIMIT_BYTES: usize = 16 * 1024 * 1024;

/// `Retry-After` value sent with 503 responses (seconds).
pub const RETRY_AFTER_SECS: u64 = 5;

// ============================================================================
// Transport
// ============================================================================

/// Topic prefix under which units publish (`solar/panel/<unit>/...`).
pub const TOPIC_PREFIX: &str = "solar/panel";

/// Trailing topic segments that name a channel rather than a unit.
pub const CHANNEL_SEGMENTS: [&str; 3] = ["data", "status", "command"];

/// Seconds without any inbound message before the health monitor warns.
pub const TRANSPORT_SILENCE_WARNING_SECS: u64 = 300;

/// TCP bridge: first reconnect delay (seconds), doubled on each failure.
pub const RECONNECT_INITIAL_DELAY_SECS: u64 = 2;

/// TCP bridge: reconnect delay ceiling (seconds).
pub const RECONNECT_MAX_DELAY_SECS: u64 = 60;

/// TCP bridge: reconnect attempts before the source gives up.
pub const RECONNECT_MAX_ATTEMPTS: u32 = 10;

/// TCP bridge: connect timeout (seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

// ============================================================================
// Classifiers
// ============================================================================

/// Primary classifier per-call timeout (ms).
pub const PRIMARY_TIMEOUT_MS: u64 = 2_000;

/// Secondary classifier per-call timeout (ms).
pub const SECONDARY_TIMEOUT_MS: u64 = 10_000;

/// Confidence below which a non-unknown primary result is escalated.
pub const ESCALATION_THRESHOLD: f64 = 0.7;

/// Model name reported for primary results.
pub const PRIMARY_MODEL_NAME: &str = "primary";

/// Model name reported for secondary results.
pub const SECONDARY_MODEL_NAME: &str = "secondary";

// ============================================================================
// Artifact Archiver
// ============================================================================

/// Largest image accepted for archival (bytes). 10 MiB.
pub const ARCHIVE_MAX_BYTES: usize = 10 * 1024 * 1024;

/// Per-upload timeout (ms).
pub const ARCHIVE_TIMEOUT_MS: u64 = 15_000;

/// Remote folder / local subdirectory for archived images.
pub const ARCHIVE_FOLDER: &str = "solar_panels";

/// URL prefix under which the local archiver's directory is served.
pub const ARTIFACT_ROUTE: &str = "/artifacts";

// ============================================================================
// Store
// ============================================================================

/// Directory holding the sled database, lock file and dead-letter queue.
pub const DATA_DIR: &str = "./data";

/// Records scanned (newest first) by the list view and statistics.
pub const STORE_SCAN_LIMIT: usize = 500;

// ============================================================================
// Pipeline
// ============================================================================

/// Concurrent ingest workers.
pub const PIPELINE_WORKERS: usize = 8;

/// Capacity of the in-process channel fed by the HTTP ingest endpoint.
pub const INGEST_QUEUE_CAPACITY: usize = 1_024;

/// How often the dead-letter retry task drains the queue (seconds).
pub const DEAD_LETTER_RETRY_INTERVAL_SECS: u64 = 30;

/// Maximum dead-lettered records kept on disk; oldest dropped beyond this.
pub const DEAD_LETTER_MAX_ENTRIES: usize = 10_000;

// ============================================================================
// Health
// ============================================================================

/// Interval between health check passes (seconds).
pub const HEALTH_CHECK_INTERVAL_SECS: u64 = 30;

/// Free space below which the data directory is reported degraded (MB).
pub const MIN_FREE_DISK_MB: u64 = 512;

/// Dead-letter backlog above which the health monitor warns.
pub const DEAD_LETTER_BACKLOG_WARNING: usize = 100;

// ============================================================================
// Read API
// ============================================================================

/// Per-unit history: default and maximum page size.
pub const UNIT_HISTORY_DEFAULT_LIMIT: usize = 20;
pub const UNIT_HISTORY_MAX_LIMIT: usize = 100;

/// Cross-unit history: default and maximum page size.
pub const HISTORY_DEFAULT_LIMIT: usize = 50;
pub const HISTORY_MAX_LIMIT: usize = 500;

/// Statistics window (days).
pub const STATS_DEFAULT_DAYS: i64 = 30;
