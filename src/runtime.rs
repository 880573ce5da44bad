//! Runtime glue that wires configuration, telemetry, fatal-error handling,
//! and runner orchestration.

pub mod config;
pub mod fatal;
pub mod runner;
pub mod telemetry;
