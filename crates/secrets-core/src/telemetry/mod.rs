//! OpenTelemetry setup: metrics, traces, and structured logs exported via OTLP.
//!
//! # Telemetry invariants
//!
//! - **No key material** must appear in any span attribute, metric label, or
//!   log field — only provider ids, DEK ids, and counts.
//! - Log level is configurable via `LOG_LEVEL` (default: `info`).

pub mod init;

pub use init::init_telemetry;
