//! Tracing setup for autorun.
//!
//! # Feature Flags
//!
//! - `telemetry` (default): `#[instrument]` spans on git operations and runs
//! - `release-logs`: Strip debug/trace at compile time
//! - `max-perf`: Disable all tracing for maximum performance

mod init;

pub use init::{init_telemetry, TelemetryConfig, TelemetryGuard};
