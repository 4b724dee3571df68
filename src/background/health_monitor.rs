//! Health monitor: interval check loop over the service's dependencies
//!
//! - Transport: no message for longer than the silence window
//! - Event store: ping fails
//! - Disk space: data directory below the free-space floor
//! - Dead-letter queue: backlog above the warning level
//!
//! Checks only observe and log. Recovery belongs to the components
//! themselves (bridge reconnect, dead-letter retry).

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::pipeline::PipelineStats;
use crate::storage::{DeadLetterQueue, EventStore};

/// Component health status
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    /// Running with reduced capability
    Degraded { reason: String },
    /// Not operational
    Unhealthy { reason: String },
}

impl HealthStatus {
    const fn rank(&self) -> u8 {
        match self {
            Self::Healthy => 0,
            Self::Degraded { .. } => 1,
            Self::Unhealthy { .. } => 2,
        }
    }

    pub const fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "HEALTHY"),
            Self::Degraded { reason } => write!(f, "DEGRADED: {reason}"),
            Self::Unhealthy { reason } => write!(f, "UNHEALTHY: {reason}"),
        }
    }
}

/// One monitored component.
pub trait HealthCheck: Send + Sync {
    fn component_name(&self) -> &str;

    fn check(&self) -> HealthStatus;
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    #[serde(flatten)]
    pub status: HealthStatus,
    pub last_checked: DateTime<Utc>,
}

/// Aggregated result of the latest check cycle.
#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    pub components: Vec<ComponentHealth>,
    /// Worst status across components
    pub overall: HealthStatus,
    pub check_cycles: u64,
}

impl Default for SystemHealth {
    fn default() -> Self {
        Self {
            components: Vec::new(),
            overall: HealthStatus::Healthy,
            check_cycles: 0,
        }
    }
}

// ============================================================================
// Checks
// ============================================================================

/// Flags a transport that has gone quiet.
pub struct TransportSilenceCheck {
    stats: Arc<PipelineStats>,
    window: Duration,
}

impl TransportSilenceCheck {
    pub fn new(stats: Arc<PipelineStats>, window: Duration) -> Self {
        Self { stats, window }
    }
}

impl HealthCheck for TransportSilenceCheck {
    fn component_name(&self) -> &str {
        "transport"
    }

    fn check(&self) -> HealthStatus {
        let window_secs = self.window.as_secs();
        match self.stats.last_message_at() {
            Some(last) => {
                let silent = (Utc::now() - last).num_seconds();
                if silent > i64::try_from(window_secs).unwrap_or(i64::MAX) {
                    HealthStatus::Degraded {
                        reason: format!("No message for {silent}s"),
                    }
                } else {
                    HealthStatus::Healthy
                }
            }
            None if self.stats.uptime_secs() > window_secs => HealthStatus::Degraded {
                reason: format!("No message received in {}s since startup", self.stats.uptime_secs()),
            },
            None => HealthStatus::Healthy,
        }
    }
}

/// Event store reachability.
pub struct StoreHealthCheck {
    store: Arc<dyn EventStore>,
}

impl StoreHealthCheck {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }
}

impl HealthCheck for StoreHealthCheck {
    fn component_name(&self) -> &str {
        "event_store"
    }

    fn check(&self) -> HealthStatus {
        match self.store.ping() {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => HealthStatus::Unhealthy {
                reason: format!("{} backend unreachable: {e}", self.store.backend_name()),
            },
        }
    }
}

/// Free space on the data directory's filesystem.
pub struct DiskHealthCheck {
    data_path: PathBuf,
    min_free_bytes: u64,
}

impl DiskHealthCheck {
    pub fn new(data_path: impl Into<PathBuf>, min_free_mb: u64) -> Self {
        Self {
            data_path: data_path.into(),
            min_free_bytes: min_free_mb.saturating_mul(1024 * 1024),
        }
    }
}

impl HealthCheck for DiskHealthCheck {
    fn component_name(&self) -> &str {
        "disk"
    }

    #[allow(clippy::cast_precision_loss)]
    fn check(&self) -> HealthStatus {
        let mb = |bytes: u64| bytes as f64 / 1_048_576.0;
        match disk_free_bytes(&self.data_path) {
            Ok(free) if free < self.min_free_bytes => HealthStatus::Unhealthy {
                reason: format!("Only {:.0} MB free (minimum {:.0} MB)", mb(free), mb(self.min_free_bytes)),
            },
            Ok(free) if free < self.min_free_bytes.saturating_mul(2) => HealthStatus::Degraded {
                reason: format!("{:.0} MB free, approaching minimum", mb(free)),
            },
            Ok(_) => HealthStatus::Healthy,
            Err(e) => HealthStatus::Degraded {
                reason: format!("Could not check disk space: {e}"),
            },
        }
    }
}

/// Bytes available to unprivileged users on the filesystem holding `path`.
#[cfg(unix)]
#[allow(unsafe_code, clippy::useless_conversion)]
fn disk_free_bytes(path: &std::path::Path) -> Result<u64, String> {
    use std::mem::MaybeUninit;
    use std::os::unix::ffi::OsStrExt;

    let c_path = std::ffi::CString::new(path.as_os_str().as_bytes()).map_err(|e| e.to_string())?;
    let mut stat = MaybeUninit::<libc::statvfs>::uninit();

    // SAFETY: c_path is NUL-terminated and stat points to writable memory.
    let result = unsafe { libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) };
    if result == 0 {
        // SAFETY: statvfs returned 0, so the struct is initialised.
        let stat = unsafe { stat.assume_init() };
        Ok(u64::from(stat.f_bavail).saturating_mul(u64::from(stat.f_frsize)))
    } else {
        Err(format!("statvfs failed for {}", path.display()))
    }
}

#[cfg(not(unix))]
fn disk_free_bytes(_path: &std::path::Path) -> Result<u64, String> {
    Err("disk space check unsupported on this platform".to_string())
}

/// Records waiting for the store to come back.
pub struct DeadLetterBacklogCheck {
    queue: Arc<DeadLetterQueue>,
    warning_level: usize,
}

impl DeadLetterBacklogCheck {
    pub fn new(queue: Arc<DeadLetterQueue>, warning_level: usize) -> Self {
        Self { queue, warning_level }
    }
}

impl HealthCheck for DeadLetterBacklogCheck {
    fn component_name(&self) -> &str {
        "dead_letter"
    }

    fn check(&self) -> HealthStatus {
        match self.queue.pending_count() {
            Ok(pending) if pending >= self.warning_level => HealthStatus::Degraded {
                reason: format!("{pending} records awaiting re-append"),
            },
            Ok(_) => HealthStatus::Healthy,
            Err(e) => HealthStatus::Degraded {
                reason: format!("Could not read dead-letter directory: {e}"),
            },
        }
    }
}

// ============================================================================
// Monitor
// ============================================================================

/// Runs registered checks on an interval and publishes [`SystemHealth`].
pub struct HealthMonitor {
    checks: Vec<Box<dyn HealthCheck>>,
    interval: Duration,
    health: Arc<RwLock<SystemHealth>>,
}

impl HealthMonitor {
    pub fn new(checks: Vec<Box<dyn HealthCheck>>, interval: Duration) -> Self {
        Self {
            checks,
            interval,
            health: Arc::new(RwLock::new(SystemHealth::default())),
        }
    }

    /// Shared view for API handlers.
    pub fn health_handle(&self) -> Arc<RwLock<SystemHealth>> {
        Arc::clone(&self.health)
    }

    /// Check immediately, then every interval until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            checks = self.checks.len(),
            interval_secs = self.interval.as_secs(),
            "Health monitor started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("Health monitor stopping");
                    return;
                }
                _ = ticker.tick() => self.run_cycle().await,
            }
        }
    }

    pub async fn run_cycle(&self) {
        let mut components = Vec::with_capacity(self.checks.len());
        let mut worst = HealthStatus::Healthy;

        for check in &self.checks {
            let status = check.check();
            match &status {
                HealthStatus::Unhealthy { .. } => {
                    error!(component = check.component_name(), status = %status, "Component unhealthy");
                }
                HealthStatus::Degraded { .. } => {
                    warn!(component = check.component_name(), status = %status, "Component degraded");
                }
                HealthStatus::Healthy => debug!(component = check.component_name(), "Component healthy"),
            }

            if status.rank() > worst.rank() {
                worst = status.clone();
            }
            components.push(ComponentHealth {
                name: check.component_name().to_string(),
                status,
                last_checked: Utc::now(),
            });
        }

        let mut health = self.health.write().await;
        health.components = components;
        health.overall = worst;
        health.check_cycles += 1;
    }
}
