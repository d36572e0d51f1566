//! Error pattern recognition
//!
//! Known error fingerprints are cached per service. A cache entry is filled
//! from the distribution service on first use and stays until it is
//! explicitly invalidated or refreshed; nothing expires on its own.
//! Patterns learned while a service's entry is still cold are held aside
//! and merged in once a fetch succeeds, so a failed fetch never leaves the
//! entry looking warm.
//!
//! Matching is exact on error type and operation name, then fuzzy on the
//! additional-context map: among the keys both sides carry, at least
//! `min_shared_keys` must exist and a `fingerprint_match_ratio` share of
//! them must agree on value.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub mod client;

pub use client::{HttpPatternClient, PatternDistribution, ServiceStatus};

use crate::clock::{Clock, SystemClock};
use crate::config::PatternConfig;
use crate::context::{clamp_unit, deserialize_unit, ErrorAnalysis, ErrorContext};
use crate::errors::PatternServiceError;
use crate::observability::telemetry;

/// A previously seen error and how it was fixed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPattern {
    pub id: String,
    pub service_name: String,
    pub error_type: String,
    pub operation_name: String,
    #[serde(default)]
    pub context_fingerprint: HashMap<String, String>,
    #[serde(default)]
    pub remediation_strategies: Vec<String>,
    #[serde(deserialize_with = "deserialize_unit")]
    pub confidence: f64,
    #[serde(default)]
    pub occurrence_count: u64,
    #[serde(default = "default_active")]
    pub is_active: bool,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

impl ErrorPattern {
    pub fn new(
        service_name: impl Into<String>,
        error_type: impl Into<String>,
        operation_name: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            service_name: service_name.into(),
            error_type: error_type.into(),
            operation_name: operation_name.into(),
            context_fingerprint: HashMap::new(),
            remediation_strategies: Vec::new(),
            confidence: 0.0,
            occurrence_count: 1,
            is_active: true,
            first_seen: now,
            last_seen: now,
        }
    }

    pub fn with_fingerprint(mut self, key: &str, value: &str) -> Self {
        self.context_fingerprint
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_strategies(mut self, strategies: Vec<String>) -> Self {
        self.remediation_strategies = strategies;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = clamp_unit(confidence);
        self
    }
}

/// One hit from [`PatternRecognition::detect_patterns`].
#[derive(Debug, Clone, PartialEq)]
pub struct PatternMatch {
    /// Index of the matching context in the input slice
    pub context_index: usize,
    pub pattern: ErrorPattern,
}

/// Per-service pattern cache and matcher.
pub struct PatternRecognition {
    cache: DashMap<String, Vec<ErrorPattern>>,
    /// Learned for services whose cache entry is cold
    local: DashMap<String, Vec<ErrorPattern>>,
    client: Option<Arc<dyn PatternDistribution>>,
    config: PatternConfig,
    clock: Arc<dyn Clock>,
}

impl PatternRecognition {
    pub fn new(config: PatternConfig) -> Self {
        Self {
            cache: DashMap::new(),
            local: DashMap::new(),
            client: None,
            config,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_client(mut self, client: Arc<dyn PatternDistribution>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn client(&self) -> Option<&Arc<dyn PatternDistribution>> {
        self.client.as_ref()
    }

    /// Patterns for `service`, loading them on a cold cache.
    ///
    /// A failed fetch is logged and yields no patterns; the cache stays
    /// cold so the next call retries.
    pub async fn patterns_for(&self, service: &str) -> Vec<ErrorPattern> {
        if let Some(cached) = self.cache.get(service) {
            return cached.value().clone();
        }
        telemetry::record_pattern_cache_miss(service);

        let Some(client) = &self.client else {
            return self.warm(service, Vec::new());
        };

        match client.get_patterns(service).await {
            Ok(patterns) => {
                debug!(service, count = patterns.len(), "Loaded patterns");
                self.warm(service, patterns)
            }
            Err(e) => {
                warn!(service, error = %e, "Failed to load patterns, continuing without");
                self.local
                    .get(service)
                    .map(|local| local.value().clone())
                    .unwrap_or_default()
            }
        }
    }

    /// Fill a cold entry with `fetched` plus anything learned meanwhile.
    fn warm(&self, service: &str, fetched: Vec<ErrorPattern>) -> Vec<ErrorPattern> {
        // A concurrent loader may have populated the entry first.
        let mut entry = self.cache.entry(service.to_string()).or_insert(fetched);
        if let Some((_, learned)) = self.local.remove(service) {
            for pattern in learned {
                if !entry.iter().any(|p| p.id == pattern.id) {
                    entry.push(pattern);
                }
            }
        }
        entry.value().clone()
    }

    /// Apply `f` to the pattern with `pattern_id`, cached or held locally.
    fn update_pattern_with<F>(&self, service: &str, pattern_id: &str, f: F) -> Option<ErrorPattern>
    where
        F: FnOnce(&mut ErrorPattern),
    {
        for map in [&self.cache, &self.local] {
            if let Some(mut entry) = map.get_mut(service) {
                if let Some(pattern) = entry.iter_mut().find(|p| p.id == pattern_id) {
                    f(pattern);
                    return Some(pattern.clone());
                }
            }
        }
        None
    }

    /// Whether `pattern` describes the error in `context`.
    pub fn matches(&self, pattern: &ErrorPattern, context: &ErrorContext) -> bool {
        pattern.is_active
            && pattern.error_type == context.error_type
            && pattern.operation_name == context.operation_name
            && self.fingerprint_matches(&pattern.context_fingerprint, &context.additional_context)
    }

    fn fingerprint_matches(
        &self,
        fingerprint: &HashMap<String, String>,
        observed: &HashMap<String, String>,
    ) -> bool {
        if fingerprint.is_empty() {
            return true;
        }
        let mut shared = 0usize;
        let mut agreeing = 0usize;
        for (key, value) in fingerprint {
            if let Some(observed_value) = observed.get(key) {
                shared += 1;
                if observed_value == value {
                    agreeing += 1;
                }
            }
        }
        if shared == 0 || shared < self.config.min_shared_keys {
            return false;
        }
        agreeing as f64 / shared as f64 >= self.config.fingerprint_match_ratio
    }

    /// First cached pattern for `service` matching `context`.
    pub async fn find_matching_pattern(
        &self,
        context: &ErrorContext,
        service: &str,
    ) -> Option<ErrorPattern> {
        self.patterns_for(service)
            .await
            .into_iter()
            .find(|p| self.matches(p, context))
    }

    /// Match every context; hits are returned in input order.
    pub async fn detect_patterns(
        &self,
        contexts: &[ErrorContext],
        service: &str,
    ) -> Vec<PatternMatch> {
        let patterns = self.patterns_for(service).await;
        contexts
            .iter()
            .enumerate()
            .filter_map(|(context_index, context)| {
                patterns
                    .iter()
                    .find(|p| self.matches(p, context))
                    .map(|pattern| PatternMatch {
                        context_index,
                        pattern: pattern.clone(),
                    })
            })
            .collect()
    }

    /// Bump a pattern's occurrence count and push it upstream best-effort.
    pub async fn record_occurrence(&self, service: &str, pattern_id: &str) -> Option<ErrorPattern> {
        let now = self.clock.now();
        let updated = self.update_pattern_with(service, pattern_id, |pattern| {
            pattern.occurrence_count += 1;
            pattern.last_seen = now;
        })?;

        if let Some(client) = &self.client {
            if let Err(e) = client.update_pattern(&updated).await {
                warn!(pattern_id, error = %e, "Failed to push pattern occurrence");
            }
        }
        Some(updated)
    }

    /// Create a pattern from a confident analysis and publish it.
    ///
    /// Returns `None` when confidence does not exceed the threshold.
    pub async fn create_pattern_from_analysis(
        &self,
        context: &ErrorContext,
        analysis: &ErrorAnalysis,
        strategies: Vec<String>,
    ) -> Option<ErrorPattern> {
        if analysis.confidence() <= self.config.confidence_threshold {
            debug!(
                confidence = analysis.confidence(),
                "Analysis below confidence threshold, not creating pattern"
            );
            return None;
        }

        let now = self.clock.now();
        let mut pattern = ErrorPattern::new(
            &context.service_name,
            &context.error_type,
            &context.operation_name,
        )
        .with_strategies(strategies)
        .with_confidence(analysis.confidence());
        pattern.context_fingerprint = context.additional_context.clone();
        pattern.first_seen = now;
        pattern.last_seen = now;

        self.insert_pattern(pattern.clone());
        info!(
            pattern_id = %pattern.id,
            service = %pattern.service_name,
            error_type = %pattern.error_type,
            "Created error pattern"
        );

        if let Some(client) = &self.client {
            if let Err(e) = client.update_pattern(&pattern).await {
                warn!(pattern_id = %pattern.id, error = %e, "Failed to publish pattern");
            }
        }
        Some(pattern)
    }

    /// Add a pattern to its service's cache entry, or hold it aside while
    /// that entry is cold.
    pub fn insert_pattern(&self, pattern: ErrorPattern) {
        if let Some(mut entry) = self.cache.get_mut(&pattern.service_name) {
            entry.push(pattern);
            return;
        }
        self.local
            .entry(pattern.service_name.clone())
            .or_default()
            .push(pattern);
    }

    /// Drop the cached entry for `service`; the next lookup refetches.
    pub fn invalidate(&self, service: &str) -> bool {
        self.cache.remove(service).is_some()
    }

    /// Refetch `service` now, replacing the cached entry on success.
    pub async fn refresh(&self, service: &str) -> Result<usize, PatternServiceError> {
        let client = self
            .client
            .as_ref()
            .ok_or(PatternServiceError::NotConfigured)?;
        let patterns = client.get_patterns(service).await?;
        self.cache.remove(service);
        Ok(self.warm(service, patterns).len())
    }

    /// Mark a pattern inactive locally and delete it upstream.
    pub async fn deactivate_pattern(
        &self,
        service: &str,
        pattern_id: &str,
    ) -> Result<bool, PatternServiceError> {
        let found = self
            .update_pattern_with(service, pattern_id, |pattern| pattern.is_active = false)
            .is_some();

        if let Some(client) = &self.client {
            client.delete_pattern(service, pattern_id).await?;
        }
        Ok(found)
    }

    pub fn cached_services(&self) -> Vec<String> {
        let mut services: Vec<String> = self.cache.iter().map(|e| e.key().clone()).collect();
        services.sort();
        services
    }
}
