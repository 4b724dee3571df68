//! Service configuration: TOML schema, loading and validation

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::defaults;

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "SENTINEL_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "sentinel.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for a sentinel deployment.
///
/// Load with `ServiceConfig::load()` which searches:
/// 1. `$SENTINEL_CONFIG` env var
/// 2. `./sentinel.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// HTTP server
    #[serde(default)]
    pub server: ServerConfig,

    /// Inbound transport
    #[serde(default)]
    pub transport: TransportConfig,

    /// Primary / secondary classifiers and escalation
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Image artifact archival
    #[serde(default)]
    pub archiver: ArchiverConfig,

    /// Event store
    #[serde(default)]
    pub store: StoreConfig,

    /// Ingest workers and dead-letter retry
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Health monitor
    #[serde(default)]
    pub health: HealthConfig,
}

impl ServiceConfig {
    /// Load configuration using the standard search order:
    /// 1. `$SENTINEL_CONFIG` environment variable
    /// 2. `./sentinel.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded config from {CONFIG_ENV_VAR}");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {CONFIG_ENV_VAR}, falling back");
                    }
                }
            } else {
                warn!(path = %path, "{CONFIG_ENV_VAR} points to non-existent file, falling back");
            }
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded config from ./{LOCAL_CONFIG_FILE}");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{LOCAL_CONFIG_FILE}, using defaults");
                }
            }
        }

        info!("No {LOCAL_CONFIG_FILE} found, using built-in defaults");
        Self::default()
    }

    /// Load from a specific TOML file path.
    ///
    /// Unknown keys are logged as warnings; schema and range violations
    /// are errors.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, inner) => ConfigError::Parse(path.to_path_buf(), inner),
            other => other,
        })
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for warning in super::validation::validate_unknown_keys(contents) {
            warn!(field = %warning.field, "{warning}");
        }
        let config: Self =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Check every section, collecting all violations rather than stopping
    /// at the first.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        if self.server.addr.parse::<SocketAddr>().is_err() {
            errors.push(format!("server.addr: '{}' is not a socket address", self.server.addr));
        }

        if self.transport.topic_prefix.trim_matches('/').is_empty() {
            errors.push("transport.topic_prefix: must not be empty".to_string());
        }

        let threshold = self.classifier.escalation_threshold;
        if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
            errors.push(format!(
                "classifier.escalation_threshold: must be within [0, 1] (got {threshold})"
            ));
        }
        if self.classifier.primary.timeout_ms == 0 {
            errors.push("classifier.primary.timeout_ms: must be > 0".to_string());
        }
        if self.classifier.primary.kind == PrimaryKind::Weights
            && self.classifier.primary.model_path.is_none()
        {
            errors.push("classifier.primary.model_path: required when kind = \"weights\"".to_string());
        }
        if self.classifier.secondary.timeout_ms == 0 {
            errors.push("classifier.secondary.timeout_ms: must be > 0".to_string());
        }
        if self.classifier.secondary.kind == SecondaryKind::Remote
            && self.classifier.secondary.endpoint.as_deref().map_or(true, str::is_empty)
        {
            errors.push("classifier.secondary.endpoint: required when kind = \"remote\"".to_string());
        }

        if self.archiver.kind == ArchiverKind::Http
            && self.archiver.upload_url.as_deref().map_or(true, str::is_empty)
        {
            errors.push("archiver.upload_url: required when kind = \"http\"".to_string());
        }
        if self.archiver.max_bytes == 0 {
            errors.push("archiver.max_bytes: must be > 0".to_string());
        }
        if self.archiver.timeout_ms == 0 {
            errors.push("archiver.timeout_ms: must be > 0".to_string());
        }

        if self.store.scan_limit == 0 {
            errors.push("store.scan_limit: must be > 0".to_string());
        }

        if self.pipeline.workers == 0 {
            errors.push("pipeline.workers: must be > 0".to_string());
        }
        if self.pipeline.ingest_queue_capacity == 0 {
            errors.push("pipeline.ingest_queue_capacity: must be > 0".to_string());
        }
        if self.pipeline.retry_interval_secs == 0 {
            errors.push("pipeline.retry_interval_secs: must be > 0".to_string());
        }
        if self.pipeline.dead_letter_max_entries == 0 {
            errors.push("pipeline.dead_letter_max_entries: must be > 0".to_string());
        }

        if self.health.interval_secs == 0 {
            errors.push("health.interval_secs: must be > 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config I/O error ({}): {1}", .0.display())]
    Io(PathBuf, #[source] std::io::Error),
    #[error("Config parse error ({}): {1}", .0.display())]
    Parse(PathBuf, #[source] toml::de::Error),
    #[error("Config serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation failed:\n  - {}", .0.join("\n  - "))]
    Validation(Vec<String>),
}

// ============================================================================
// Server
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address, e.g. "0.0.0.0:8080"
    #[serde(default = "default_server_addr")]
    pub addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { addr: default_server_addr() }
    }
}

fn default_server_addr() -> String {
    defaults::SERVER_ADDR.to_string()
}

// ============================================================================
// Transport
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Prefix preceding the unit id in topics
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,

    /// Seconds of silence before the health monitor flags the transport
    #[serde(default = "default_silence_warning_secs")]
    pub silence_warning_secs: u64,

    /// TCP bridge reconnect attempts before giving up
    #[serde(default = "default_reconnect_max_attempts")]
    pub reconnect_max_attempts: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            topic_prefix: default_topic_prefix(),
            silence_warning_secs: default_silence_warning_secs(),
            reconnect_max_attempts: default_reconnect_max_attempts(),
        }
    }
}

fn default_topic_prefix() -> String {
    defaults::TOPIC_PREFIX.to_string()
}
fn default_silence_warning_secs() -> u64 { defaults::TRANSPORT_SILENCE_WARNING_SECS }
fn default_reconnect_max_attempts() -> u32 { defaults::RECONNECT_MAX_ATTEMPTS }

// ============================================================================
// Classifiers
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default)]
    pub primary: PrimaryModelConfig,

    #[serde(default)]
    pub secondary: SecondaryModelConfig,

    /// Non-unknown primary results below this confidence are escalated
    #[serde(default = "default_escalation_threshold")]
    pub escalation_threshold: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            primary: PrimaryModelConfig::default(),
            secondary: SecondaryModelConfig::default(),
            escalation_threshold: default_escalation_threshold(),
        }
    }
}

fn default_escalation_threshold() -> f64 { defaults::ESCALATION_THRESHOLD }

/// Which built-in predictor backs the primary classifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimaryKind {
    /// Colour-ratio heuristic, no model file needed
    #[default]
    Heuristic,
    /// Scaler + softmax weights loaded from `model_path`
    Weights,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrimaryModelConfig {
    #[serde(default)]
    pub kind: PrimaryKind,

    /// JSON weights file (required for `kind = "weights"`)
    #[serde(default)]
    pub model_path: Option<PathBuf>,

    #[serde(default = "default_primary_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for PrimaryModelConfig {
    fn default() -> Self {
        Self {
            kind: PrimaryKind::default(),
            model_path: None,
            timeout_ms: default_primary_timeout_ms(),
        }
    }
}

fn default_primary_timeout_ms() -> u64 { defaults::PRIMARY_TIMEOUT_MS }

/// Secondary classifier backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecondaryKind {
    /// Escalation is still decided and recorded, but no call is made
    #[default]
    Disabled,
    /// HTTP model service at `endpoint`
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecondaryModelConfig {
    #[serde(default)]
    pub kind: SecondaryKind,

    /// POST target for the remote model
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Environment variable holding a bearer token for the remote model
    #[serde(default)]
    pub api_key_env: Option<String>,

    #[serde(default = "default_secondary_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for SecondaryModelConfig {
    fn default() -> Self {
        Self {
            kind: SecondaryKind::default(),
            endpoint: None,
            api_key_env: None,
            timeout_ms: default_secondary_timeout_ms(),
        }
    }
}

fn default_secondary_timeout_ms() -> u64 { defaults::SECONDARY_TIMEOUT_MS }

// ============================================================================
// Artifact Archiver
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiverKind {
    /// Write into `dir`, served by this process under `/artifacts`
    #[default]
    Local,
    /// Multipart-free JSON upload to `upload_url`
    Http,
    /// Never archive; records carry no artifact URL
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiverConfig {
    #[serde(default)]
    pub kind: ArchiverKind,

    /// Local archive directory (defaults to `<store.data_dir>/artifacts`)
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// Base URL prepended to local artifact paths
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// Upload endpoint for `kind = "http"`
    #[serde(default)]
    pub upload_url: Option<String>,

    /// Folder name used remotely and as local subdirectory
    #[serde(default = "default_archive_folder")]
    pub folder: String,

    #[serde(default = "default_archive_max_bytes")]
    pub max_bytes: usize,

    #[serde(default = "default_archive_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ArchiverConfig {
    fn default() -> Self {
        Self {
            kind: ArchiverKind::default(),
            dir: None,
            public_base_url: default_public_base_url(),
            upload_url: None,
            folder: default_archive_folder(),
            max_bytes: default_archive_max_bytes(),
            timeout_ms: default_archive_timeout_ms(),
        }
    }
}

impl ArchiverConfig {
    /// Directory the local archiver writes into.
    pub fn local_dir(&self, data_dir: &Path) -> PathBuf {
        self.dir.clone().unwrap_or_else(|| data_dir.join("artifacts"))
    }
}

fn default_public_base_url() -> String {
    defaults::ARTIFACT_ROUTE.to_string()
}
fn default_archive_folder() -> String {
    defaults::ARCHIVE_FOLDER.to_string()
}
fn default_archive_max_bytes() -> usize { defaults::ARCHIVE_MAX_BYTES }
fn default_archive_timeout_ms() -> u64 { defaults::ARCHIVE_TIMEOUT_MS }

// ============================================================================
// Store
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Sled,
    /// Volatile; for demos and tests
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Records examined by the list view and statistics
    #[serde(default = "default_scan_limit")]
    pub scan_limit: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            data_dir: default_data_dir(),
            scan_limit: default_scan_limit(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(defaults::DATA_DIR)
}
fn default_scan_limit() -> usize { defaults::STORE_SCAN_LIMIT }

// ============================================================================
// Pipeline
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_ingest_queue_capacity")]
    pub ingest_queue_capacity: usize,

    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,

    #[serde(default = "default_dead_letter_max_entries")]
    pub dead_letter_max_entries: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            ingest_queue_capacity: default_ingest_queue_capacity(),
            retry_interval_secs: default_retry_interval_secs(),
            dead_letter_max_entries: default_dead_letter_max_entries(),
        }
    }
}

fn default_workers() -> usize { defaults::PIPELINE_WORKERS }
fn default_ingest_queue_capacity() -> usize { defaults::INGEST_QUEUE_CAPACITY }
fn default_retry_interval_secs() -> u64 { defaults::DEAD_LETTER_RETRY_INTERVAL_SECS }
fn default_dead_letter_max_entries() -> usize { defaults::DEAD_LETTER_MAX_ENTRIES }

// ============================================================================
// Health
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_health_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "default_min_free_disk_mb")]
    pub min_free_disk_mb: u64,

    #[serde(default = "default_dead_letter_backlog_warning")]
    pub dead_letter_backlog_warning: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_health_interval_secs(),
            min_free_disk_mb: default_min_free_disk_mb(),
            dead_letter_backlog_warning: default_dead_letter_backlog_warning(),
        }
    }
}

fn default_health_interval_secs() -> u64 { defaults::HEALTH_CHECK_INTERVAL_SECS }
fn default_min_free_disk_mb() -> u64 { defaults::MIN_FREE_DISK_MB }
fn default_dead_letter_backlog_warning() -> usize { defaults::DEAD_LETTER_BACKLOG_WARNING }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ServiceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.classifier.escalation_threshold, 0.7);
        assert_eq!(config.classifier.primary.timeout_ms, 2_000);
        assert_eq!(config.pipeline.workers, 8);
        assert_eq!(config.store.scan_limit, 500);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = ServiceConfig::from_toml_str(
            r#"
            [classifier]
            escalation_threshold = 0.55

            [store]
            scan_limit = 100
            "#,
        )
        .unwrap();
        assert_eq!(config.classifier.escalation_threshold, 0.55);
        assert_eq!(config.store.scan_limit, 100);
        assert_eq!(config.server.addr, defaults::SERVER_ADDR);
        assert_eq!(config.classifier.secondary.kind, SecondaryKind::Disabled);
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let mut config = ServiceConfig::default();
        config.classifier.escalation_threshold = 1.5;
        config.pipeline.workers = 0;
        config.classifier.secondary.kind = SecondaryKind::Remote;

        match config.validate() {
            Err(ConfigError::Validation(errors)) => {
                assert_eq!(errors.len(), 3, "{errors:?}");
                assert!(errors.iter().any(|e| e.contains("escalation_threshold")));
                assert!(errors.iter().any(|e| e.contains("secondary.endpoint")));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_nan_threshold_rejected() {
        let mut config = ServiceConfig::default();
        config.classifier.escalation_threshold = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_roundtrip_preserves_sections() {
        let mut config = ServiceConfig::default();
        config.archiver.kind = ArchiverKind::Disabled;
        let text = config.to_toml().unwrap();
        let parsed = ServiceConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed.archiver.kind, ArchiverKind::Disabled);
    }

    #[test]
    fn test_load_from_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sentinel.toml");
        std::fs::write(&path, "[pipeline]\nworkers = \"many\"\n").unwrap();
        let err = ServiceConfig::load_from_file(&path).unwrap_err();
        assert!(err.to_string().contains("sentinel.toml"));
    }
}
