//! Configuration Management
//!
//! Loads engine configuration from TOML files.
//! Configuration includes:
//! - LLM analysis service settings (endpoint, model, timeouts)
//! - Pattern distribution service and matching thresholds
//! - Graph impact heuristics
//! - Remediation behaviour (retries, allow-lists, strategy policy)
//! - Metrics collection and tracking retention

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::context::ErrorSeverity;
use crate::errors::FaultmendError;

/// How the executor treats applicable strategies after one succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyPolicy {
    /// Stop at the first strategy that succeeds (default)
    #[default]
    StopOnFirstSuccess,
    /// Attempt every applicable strategy
    TryAll,
}

impl std::fmt::Display for StrategyPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyPolicy::StopOnFirstSuccess => write!(f, "stop_on_first_success"),
            StrategyPolicy::TryAll => write!(f, "try_all"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub patterns: PatternConfig,

    #[serde(default)]
    pub graph: GraphConfig,

    #[serde(default)]
    pub remediation: RemediationConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub tracking: TrackingConfig,
}

/// LLM analysis service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    pub api_key: Option<String>,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            model: default_llm_model(),
            api_key: None,
            timeout_secs: default_llm_timeout(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

/// Pattern distribution service and matching settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternConfig {
    /// Base URL of the pattern distribution service (disabled when unset)
    pub service_url: Option<String>,
    #[serde(default = "default_pattern_timeout")]
    pub request_timeout_secs: u64,
    /// Minimum analysis confidence before a new pattern is published
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// Fraction of shared context keys whose values must agree
    #[serde(default = "default_fingerprint_match_ratio")]
    pub fingerprint_match_ratio: f64,
    /// Minimum number of shared context keys when a pattern carries a fingerprint
    #[serde(default = "default_min_shared_keys")]
    pub min_shared_keys: usize,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            service_url: None,
            request_timeout_secs: default_pattern_timeout(),
            confidence_threshold: default_confidence_threshold(),
            fingerprint_match_ratio: default_fingerprint_match_ratio(),
            min_shared_keys: default_min_shared_keys(),
        }
    }
}

/// Impact propagation heuristics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Accumulated impact above this marks a node as affected
    #[serde(default = "default_impact_epsilon")]
    pub impact_epsilon: f64,
    /// Multiplicative attenuation applied per traversal hop
    #[serde(default = "default_depth_decay")]
    pub depth_decay: f64,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            impact_epsilon: default_impact_epsilon(),
            depth_decay: default_depth_decay(),
            max_depth: default_max_depth(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Extra attempts per strategy after the first failure
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    /// Linear backoff step between attempts
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_validation_timeout")]
    pub validation_timeout_secs: u64,
    #[serde(default = "default_strategy_timeout")]
    pub strategy_timeout_secs: u64,
    #[serde(default)]
    pub strategy_policy: StrategyPolicy,
    /// Errors below this severity are not remediated automatically
    #[serde(default = "default_min_severity")]
    pub min_severity_for_auto_remediation: ErrorSeverity,
    /// Allowed step types mapped to their required parameters
    #[serde(default = "default_allowed_step_types")]
    pub allowed_step_types: BTreeMap<String, Vec<String>>,
    /// Allowed strategy types mapped to their required parameters
    #[serde(default = "default_allowed_strategies")]
    pub allowed_strategies: BTreeMap<String, Vec<String>>,
    #[serde(default = "default_true")]
    pub rollback_on_failed_validation: bool,
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retry_attempts: default_max_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            validation_timeout_secs: default_validation_timeout(),
            strategy_timeout_secs: default_strategy_timeout(),
            strategy_policy: StrategyPolicy::default(),
            min_severity_for_auto_remediation: default_min_severity(),
            allowed_step_types: default_allowed_step_types(),
            allowed_strategies: default_allowed_strategies(),
            rollback_on_failed_validation: true,
        }
    }
}

impl RemediationConfig {
    pub fn validation_timeout(&self) -> Duration {
        Duration::from_secs(self.validation_timeout_secs)
    }

    pub fn strategy_timeout(&self) -> Duration {
        Duration::from_secs(self.strategy_timeout_secs)
    }

    /// Lowercase allow-list keys to match parsed descriptor types. Keys that
    /// collide after lowercasing merge their required parameters.
    pub fn normalize_allow_lists(&mut self) {
        for list in [&mut self.allowed_step_types, &mut self.allowed_strategies] {
            let mut normalized: BTreeMap<String, Vec<String>> = BTreeMap::new();
            for (key, params) in std::mem::take(list) {
                let required = normalized.entry(key.trim().to_ascii_lowercase()).or_default();
                for param in params {
                    if !required.contains(&param) {
                        required.push(param);
                    }
                }
            }
            *list = normalized;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_collection_interval")]
    pub collection_interval_secs: u64,
    #[serde(default = "default_collection_timeout")]
    pub collection_timeout_secs: u64,
    /// Rolling window for named metric series
    #[serde(default = "default_history_window")]
    pub history_window_secs: u64,
    /// Number of most recent samples used for trend slopes
    #[serde(default = "default_trend_window")]
    pub trend_window: usize,
    #[serde(default = "default_max_cpu_delta")]
    pub max_cpu_delta_percent: f64,
    #[serde(default = "default_max_memory_delta")]
    pub max_memory_delta_bytes: i64,
}

impl MetricsConfig {
    pub fn collection_timeout(&self) -> Duration {
        Duration::from_secs(self.collection_timeout_secs)
    }

    pub fn history_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.history_window_secs as i64)
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            collection_interval_secs: default_collection_interval(),
            collection_timeout_secs: default_collection_timeout(),
            history_window_secs: default_history_window(),
            trend_window: default_trend_window(),
            max_cpu_delta_percent: default_max_cpu_delta(),
            max_memory_delta_bytes: default_max_memory_delta(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
    #[serde(default = "default_max_executions")]
    pub max_executions_per_index: usize,
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
    /// Redis connection string for the `redis-store` backend
    pub redis_url: Option<String>,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            retention_hours: default_retention_hours(),
            max_executions_per_index: default_max_executions(),
            cleanup_interval_secs: default_cleanup_interval(),
            redis_url: None,
        }
    }
}

impl TrackingConfig {
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::hours(self.retention_hours as i64)
    }
}

fn default_true() -> bool {
    true
}
fn default_llm_endpoint() -> String {
    "http://localhost:8000/v1".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_llm_timeout() -> u64 {
    30
}
fn default_max_tokens() -> usize {
    2048
}
fn default_temperature() -> f32 {
    0.2
}
fn default_pattern_timeout() -> u64 {
    10
}
fn default_confidence_threshold() -> f64 {
    0.7
}
fn default_fingerprint_match_ratio() -> f64 {
    0.5
}
fn default_min_shared_keys() -> usize {
    1
}
fn default_impact_epsilon() -> f64 {
    0.001
}
fn default_depth_decay() -> f64 {
    0.85
}
fn default_max_depth() -> usize {
    10
}
fn default_max_retry_attempts() -> u32 {
    2
}
fn default_retry_backoff_ms() -> u64 {
    500
}
fn default_validation_timeout() -> u64 {
    30
}
fn default_strategy_timeout() -> u64 {
    120
}
fn default_min_severity() -> ErrorSeverity {
    ErrorSeverity::Low
}
fn default_collection_interval() -> u64 {
    15
}
fn default_collection_timeout() -> u64 {
    5
}
fn default_history_window() -> u64 {
    3600
}
fn default_trend_window() -> usize {
    10
}
fn default_max_cpu_delta() -> f64 {
    50.0
}
fn default_max_memory_delta() -> i64 {
    512 * 1024 * 1024
}
fn default_retention_hours() -> u64 {
    24 * 7
}
fn default_max_executions() -> usize {
    1000
}
fn default_cleanup_interval() -> u64 {
    3600
}

fn params(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

fn default_allowed_step_types() -> BTreeMap<String, Vec<String>> {
    let mut types = BTreeMap::new();
    types.insert("restart".to_string(), params(&["target"]));
    types.insert("retry".to_string(), params(&["operation"]));
    types.insert("scale".to_string(), params(&["target", "replicas"]));
    types.insert("clear_cache".to_string(), params(&["scope"]));
    types.insert("rollback".to_string(), params(&["target"]));
    types.insert("circuit_breaker".to_string(), params(&["target"]));
    types.insert("investigate".to_string(), params(&["component"]));
    types.insert("notify".to_string(), params(&["channel"]));
    types
}

fn default_allowed_strategies() -> BTreeMap<String, Vec<String>> {
    let mut types = BTreeMap::new();
    types.insert("restart".to_string(), params(&["target"]));
    types.insert("retry".to_string(), params(&["operation"]));
    types.insert("scale".to_string(), params(&["target"]));
    types.insert("clear_cache".to_string(), params(&["scope"]));
    types.insert("rollback".to_string(), params(&["target"]));
    types.insert("circuit_breaker".to_string(), params(&["target"]));
    types.insert("failover".to_string(), params(&["target"]));
    types
}

impl Config {
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)
                    .with_context(|| format!("Failed to read config from {}", p))?;
                toml::from_str(&content).context("Failed to parse config")?
            }
            None => {
                let home_config = dirs::home_dir()
                    .map(|h| h.join(".config/faultmend/config.toml"))
                    .and_then(|p| p.to_str().map(String::from));

                let mut default_paths: Vec<String> = vec!["faultmend.toml".to_string()];
                if let Some(hc) = home_config {
                    default_paths.push(hc);
                }

                let mut loaded = None;
                for p in &default_paths {
                    if let Ok(content) = std::fs::read_to_string(p) {
                        loaded = Some(toml::from_str(&content).context("Failed to parse config")?);
                        break;
                    }
                }
                loaded.unwrap_or_else(|| {
                    tracing::debug!("No config file found, using defaults");
                    Self::default()
                })
            }
        };

        config.apply_env_overrides();
        config.remediation.normalize_allow_lists();
        config.validate()?;

        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(endpoint) = std::env::var("FAULTMEND_LLM_ENDPOINT") {
            self.llm.endpoint = endpoint;
        }
        if let Ok(model) = std::env::var("FAULTMEND_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Ok(api_key) = std::env::var("FAULTMEND_LLM_API_KEY") {
            self.llm.api_key = Some(api_key);
        }
        if let Ok(url) = std::env::var("FAULTMEND_PATTERN_SERVICE_URL") {
            self.patterns.service_url = Some(url);
        }
        if let Ok(url) = std::env::var("FAULTMEND_REDIS_URL") {
            self.tracking.redis_url = Some(url);
        }
        if let Ok(hours) = std::env::var("FAULTMEND_RETENTION_HOURS") {
            if let Ok(h) = hours.parse::<u64>() {
                self.tracking.retention_hours = h;
            }
        }
    }

    /// Reject values that would make the engine misbehave silently.
    pub fn validate(&self) -> std::result::Result<(), FaultmendError> {
        let ratio = self.patterns.fingerprint_match_ratio;
        if !(0.0..=1.0).contains(&ratio) {
            return Err(FaultmendError::Config(format!(
                "patterns.fingerprint_match_ratio must be within [0, 1], got {}",
                ratio
            )));
        }
        if !(0.0..=1.0).contains(&self.patterns.confidence_threshold) {
            return Err(FaultmendError::Config(format!(
                "patterns.confidence_threshold must be within [0, 1], got {}",
                self.patterns.confidence_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.graph.depth_decay) || self.graph.depth_decay == 0.0 {
            return Err(FaultmendError::Config(format!(
                "graph.depth_decay must be within (0, 1], got {}",
                self.graph.depth_decay
            )));
        }
        if self.tracking.retention_hours == 0 {
            return Err(FaultmendError::Config(
                "tracking.retention_hours must be greater than 0".to_string(),
            ));
        }
        if self.tracking.max_executions_per_index == 0 {
            return Err(FaultmendError::Config(
                "tracking.max_executions_per_index must be greater than 0".to_string(),
            ));
        }
        if self.metrics.trend_window < 2 {
            return Err(FaultmendError::Config(
                "metrics.trend_window needs at least 2 samples".to_string(),
            ));
        }
        Ok(())
    }
}
