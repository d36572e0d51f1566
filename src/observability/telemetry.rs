//! Telemetry & Observability
//!
//! Structured logging and counters for remediation runs.
//! Features:
//! - Compact stderr logging, or JSON lines for log shippers
//! - Configurable log levels via RUST_LOG
//! - Log sanitising for untrusted error text
//! - Remediation/strategy counters through the `metrics` facade

use regex::Regex;
use std::sync::OnceLock;
use std::time::Instant;
use tracing::{debug, info_span, warn, Span};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const REMEDIATIONS_TOTAL: &str = "faultmend_remediations_total";
pub const STRATEGY_ATTEMPTS_TOTAL: &str = "faultmend_strategy_attempts_total";
pub const REMEDIATION_DURATION_MS: &str = "faultmend_remediation_duration_ms";
pub const PATTERN_CACHE_MISSES_TOTAL: &str = "faultmend_pattern_cache_misses_total";
pub const TRACKING_FAILURES_TOTAL: &str = "faultmend_tracking_failures_total";

/// Sanitize a string for safe log output by escaping control characters.
/// Error messages and stack traces arrive from remote services and must
/// not be able to forge extra log lines.
pub fn sanitize_for_log(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\x1b' => out.push_str("\\e"),
            '\x00' => out.push_str("\\0"),
            c if c.is_control() => out.push_str(&format!("\\u{:04x}", c as u32)),
            _ => out.push(c),
        }
    }
    out
}

static SECRET_PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();

fn secret_patterns() -> &'static [Regex] {
    SECRET_PATTERNS.get_or_init(|| {
        [
            r"(?i)(sk-|key-|token-)[A-Za-z0-9_\-]{8,}",
            r"(?i)Bearer\s+[A-Za-z0-9_\-\.]{8,}",
            r"(?i)(password|passwd|pwd)\s*=\s*[^;\s]+",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

/// Redact API keys, bearer tokens and connection-string passwords.
pub fn redact_secrets(input: &str) -> String {
    let mut result = input.to_string();
    for pattern in secret_patterns() {
        result = pattern.replace_all(&result, "[REDACTED]").to_string();
    }
    result
}

/// Sanitize and redact in one step.
pub fn safe_log_text(input: &str) -> String {
    redact_secrets(&sanitize_for_log(input))
}

/// Initialize global tracing subscriber.
/// Only enables tracing if RUST_LOG is explicitly set so CLI output on
/// stdout stays machine-readable.
pub fn init_tracing() {
    if let Ok(filter) = std::env::var("RUST_LOG") {
        init_tracing_with_filter(&filter);
    }
}

/// Initialize with custom filter string. Later calls are no-ops.
pub fn init_tracing_with_filter(filter: &str) {
    init_once(filter, false);
}

/// Same as [`init_tracing_with_filter`] but emits one JSON object per event.
pub fn init_json_tracing(filter: &str) {
    init_once(filter, true);
}

fn init_once(filter: &str, json: bool) {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let filter_layer = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("warn"));

        if json {
            let json_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_writer(std::io::stderr);
            let _ = tracing_subscriber::registry()
                .with(filter_layer)
                .with(json_layer)
                .try_init();
        } else {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .with_level(true)
                .compact()
                .with_writer(std::io::stderr);
            let _ = tracing_subscriber::registry()
                .with(filter_layer)
                .with(fmt_layer)
                .try_init();
        }
    });
}

/// Span covering one remediation execution.
pub fn remediation_span(execution_id: &str, service: &str, error_type: &str) -> Span {
    info_span!(
        "remediation",
        execution_id = execution_id,
        service = sanitize_for_log(service).as_str(),
        error_type = sanitize_for_log(error_type).as_str(),
        status = tracing::field::Empty,
        duration_ms = tracing::field::Empty,
    )
}

/// Count a finished remediation and record its duration.
pub fn record_remediation(status: &str, duration_ms: u64) {
    metrics::increment_counter!(REMEDIATIONS_TOTAL, "status" => status.to_string());
    metrics::histogram!(REMEDIATION_DURATION_MS, duration_ms as f64);
    let span = Span::current();
    span.record("status", status);
    span.record("duration_ms", duration_ms);
}

/// Count one strategy attempt by outcome (`success`, `failure`, `timeout`, `panic`).
pub fn record_strategy_attempt(strategy: &str, outcome: &'static str) {
    metrics::increment_counter!(
        STRATEGY_ATTEMPTS_TOTAL,
        "strategy" => strategy.to_string(),
        "outcome" => outcome
    );
}

/// Count a failed execution store write by stage (`initial`, `final`).
pub fn record_tracking_failure(stage: &'static str) {
    metrics::increment_counter!(TRACKING_FAILURES_TOTAL, "stage" => stage);
}

pub fn record_pattern_cache_miss(service: &str) {
    metrics::increment_counter!(PATTERN_CACHE_MISSES_TOTAL, "service" => service.to_string());
}

/// Run an async operation and log its duration and outcome.
pub async fn timed<F, Fut, T, E>(operation: &str, f: F) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let start = Instant::now();
    let result = f().await;
    let duration_ms = start.elapsed().as_millis() as u64;
    match &result {
        Ok(_) => debug!(operation, duration_ms, "Operation completed"),
        Err(e) => warn!(
            operation,
            duration_ms,
            error = safe_log_text(&e.to_string()).as_str(),
            "Operation failed"
        ),
    }
    result
}

/// Initialize tracing for tests with a simple subscriber
#[cfg(test)]
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
