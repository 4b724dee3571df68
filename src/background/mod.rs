//! Background services: periodic health checks
//!
//! Runs as a tokio task that checks the transport, the event store, disk
//! space and the dead-letter backlog on an interval and publishes the result
//! for the health endpoints.

pub mod health_monitor;

pub use health_monitor::{
    ComponentHealth, DeadLetterBacklogCheck, DiskHealthCheck, HealthCheck, HealthMonitor, HealthStatus,
    StoreHealthCheck, SystemHealth, TransportSilenceCheck,
};
