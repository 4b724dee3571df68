//! Service Configuration Module
//!
//! Loaded from TOML, with every key optional.
//!
//! ## Loading Order
//!
//! 1. `SENTINEL_CONFIG` environment variable (path to TOML file)
//! 2. `sentinel.toml` in the current working directory
//! 3. Built-in defaults (see [`defaults`])
//!
//! ## Usage
//!
//! ```ignore
//! // In main():
//! config::init(ServiceConfig::load());
//!
//! // Anywhere else:
//! let threshold = config::get().classifier.escalation_threshold;
//! ```

pub mod defaults;
mod service_config;
pub mod validation;

pub use service_config::*;

use std::sync::OnceLock;

/// Global service configuration, initialized once at startup.
static SERVICE_CONFIG: OnceLock<ServiceConfig> = OnceLock::new();

/// Initialize the global service configuration.
///
/// A second call is ignored with a warning.
pub fn init(config: ServiceConfig) {
    if SERVICE_CONFIG.set(config).is_err() {
        tracing::warn!("config::init() called more than once, ignoring");
    }
}

/// Get the global service configuration.
///
/// Falls back to built-in defaults when `init()` was never called, so
/// library users and tests need not initialize anything.
pub fn get() -> &'static ServiceConfig {
    SERVICE_CONFIG.get_or_init(ServiceConfig::default)
}

/// Check whether the config has been initialized.
pub fn is_initialized() -> bool {
    SERVICE_CONFIG.get().is_some()
}
