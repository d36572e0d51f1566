//! Observability
//!
//! Logging setup, log sanitising and engine counters.

pub mod telemetry;

pub use telemetry::{
    init_json_tracing, init_tracing, init_tracing_with_filter, redact_secrets, safe_log_text,
    sanitize_for_log,
};
