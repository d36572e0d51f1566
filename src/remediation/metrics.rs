//! Remediation metrics
//!
//! The collector keeps a rolling, per-remediation history of named series.
//! Entries older than the history window (relative to the latest write) are
//! evicted lazily on write. Remediations whose newest point has left the
//! window are dropped whole when a session finishes and on every periodic
//! sampling tick. Resource deltas come from a [`ResourceSampler`] sampled
//! when a remediation starts and again when it finishes.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::periodic::PeriodicTask;
use crate::clock::{Clock, SystemClock};
use crate::config::MetricsConfig;
use crate::context::ErrorContext;
use crate::errors::MetricsCollectionError;

pub const CPU_USAGE_SERIES: &str = "cpu_usage_percent";
pub const MEMORY_USED_SERIES: &str = "memory_used_bytes";

/// One host resource reading.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceSample {
    pub cpu_percent: f64,
    pub memory_bytes: i64,
    pub disk_bytes: i64,
    pub network_bytes: i64,
}

/// Change in resource usage across a remediation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceDelta {
    pub cpu_percent_delta: f64,
    pub memory_bytes_delta: i64,
    pub disk_bytes_delta: i64,
    pub network_bytes_delta: i64,
}

impl ResourceDelta {
    pub fn between(before: &ResourceSample, after: &ResourceSample) -> Self {
        Self {
            cpu_percent_delta: after.cpu_percent - before.cpu_percent,
            memory_bytes_delta: after.memory_bytes - before.memory_bytes,
            disk_bytes_delta: after.disk_bytes - before.disk_bytes,
            network_bytes_delta: after.network_bytes - before.network_bytes,
        }
    }
}

pub trait ResourceSampler: Send + Sync {
    fn sample(&self) -> Result<ResourceSample, MetricsCollectionError>;
}

struct HostState {
    system: sysinfo::System,
    networks: sysinfo::Networks,
}

/// Host sampler backed by `sysinfo`.
///
/// CPU usage is the change since the previous refresh, so the `System` is
/// kept across samples. The first reading is measured from construction.
pub struct SysinfoSampler {
    host: Mutex<HostState>,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        let mut system = sysinfo::System::new();
        system.refresh_cpu_usage();
        system.refresh_memory();
        Self {
            host: Mutex::new(HostState {
                system,
                networks: sysinfo::Networks::new_with_refreshed_list(),
            }),
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSampler for SysinfoSampler {
    fn sample(&self) -> Result<ResourceSample, MetricsCollectionError> {
        let (cpu, memory, network_total) = {
            let mut host = self.host.lock();
            host.system.refresh_cpu_usage();
            host.system.refresh_memory();
            host.networks.refresh(true);
            let network_total: u64 = host
                .networks
                .list()
                .values()
                .map(|n| n.total_received().saturating_add(n.total_transmitted()))
                .sum();
            (
                host.system.global_cpu_usage(),
                host.system.used_memory(),
                network_total,
            )
        };

        let disks = sysinfo::Disks::new_with_refreshed_list();
        let disk_used: u64 = disks
            .list()
            .iter()
            .map(|d| d.total_space().saturating_sub(d.available_space()))
            .sum();

        Ok(ResourceSample {
            cpu_percent: f64::from(cpu),
            memory_bytes: to_i64(memory),
            disk_bytes: to_i64(disk_used),
            network_bytes: to_i64(network_total),
        })
    }
}

fn to_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

/// Per-execution metrics attached to a [`super::RemediationExecution`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationMetrics {
    pub execution_id: String,
    pub collected_at: DateTime<Utc>,
    #[serde(default)]
    pub snapshot: HashMap<String, String>,
    #[serde(default)]
    pub resource_usage: ResourceDelta,
    #[serde(default)]
    pub step_metrics: HashMap<String, f64>,
    #[serde(default)]
    pub strategy_metrics: HashMap<String, f64>,
    pub duration_ms: Option<i64>,
}

impl RemediationMetrics {
    pub fn new(execution_id: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            collected_at: Utc::now(),
            snapshot: HashMap::new(),
            resource_usage: ResourceDelta::default(),
            step_metrics: HashMap::new(),
            strategy_metrics: HashMap::new(),
            duration_ms: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Least-squares slope of `values` against their index. `None` below two points.
pub fn linear_trend(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 2 {
        return None;
    }
    let n_f = n as f64;
    let mean_x = (n_f - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / n_f;

    let mut num = 0.0;
    let mut den = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        num += dx * (y - mean_y);
        den += dx * dx;
    }
    if den == 0.0 {
        None
    } else {
        Some(num / den)
    }
}

type SeriesMap = HashMap<String, Vec<MetricPoint>>;

pub struct RemediationMetricsCollector {
    config: MetricsConfig,
    history: DashMap<String, SeriesMap>,
    baselines: DashMap<String, ResourceSample>,
    sampler: Arc<dyn ResourceSampler>,
    clock: Arc<dyn Clock>,
}

impl RemediationMetricsCollector {
    pub fn new(config: MetricsConfig) -> Self {
        Self {
            config,
            history: DashMap::new(),
            baselines: DashMap::new(),
            sampler: Arc::new(SysinfoSampler::new()),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_sampler(mut self, sampler: Arc<dyn ResourceSampler>) -> Self {
        self.sampler = sampler;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    async fn sample(&self) -> Result<ResourceSample, MetricsCollectionError> {
        let sampler = self.sampler.clone();
        let timeout = self.config.collection_timeout();
        let task = tokio::task::spawn_blocking(move || sampler.sample());

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(MetricsCollectionError::Sampler(join.to_string())),
            Err(_) => Err(MetricsCollectionError::Timeout {
                millis: timeout.as_millis() as u64,
            }),
        }
    }

    fn snapshot_fields(
        &self,
        context: &ErrorContext,
        sample: &ResourceSample,
    ) -> HashMap<String, String> {
        let mut snapshot = HashMap::new();
        for (k, v) in &context.additional_context {
            snapshot.insert(k.clone(), v.clone());
        }
        // Standard fields win over caller-supplied ones
        snapshot.insert("timestamp".to_string(), self.clock.now().to_rfc3339());
        snapshot.insert("service".to_string(), context.service_name.clone());
        snapshot.insert("operation".to_string(), context.operation_name.clone());
        snapshot.insert("error_type".to_string(), context.error_type.clone());
        snapshot.insert("correlation_id".to_string(), context.correlation_id.clone());
        snapshot.insert(CPU_USAGE_SERIES.to_string(), format!("{:.2}", sample.cpu_percent));
        snapshot.insert(MEMORY_USED_SERIES.to_string(), sample.memory_bytes.to_string());
        snapshot
    }

    /// Snapshot of the standard context fields plus current host resources.
    pub async fn collect_metrics(
        &self,
        context: &ErrorContext,
    ) -> Result<HashMap<String, String>, MetricsCollectionError> {
        let sample = self.sample().await?;
        Ok(self.snapshot_fields(context, &sample))
    }

    /// Record the resource baseline for a remediation. Best effort.
    pub async fn begin_session(&self, remediation_id: &str) {
        match self.sample().await {
            Ok(sample) => {
                self.baselines.insert(remediation_id.to_string(), sample);
            }
            Err(e) => {
                warn!(remediation_id, error = %e, "Failed to sample resource baseline");
            }
        }
    }

    /// Close a session and assemble its metrics.
    pub async fn finish_session(
        &self,
        remediation_id: &str,
        context: &ErrorContext,
        duration_ms: Option<i64>,
    ) -> Result<RemediationMetrics, MetricsCollectionError> {
        self.evict_expired();
        let baseline = self.baselines.remove(remediation_id).map(|(_, s)| s);
        let current = self.sample().await?;

        let mut metrics = RemediationMetrics::new(remediation_id);
        metrics.collected_at = self.clock.now();
        metrics.snapshot = self.snapshot_fields(context, &current);
        metrics.duration_ms = duration_ms;
        if let Some(before) = baseline {
            metrics.resource_usage = ResourceDelta::between(&before, &current);
        }

        if let Some(series) = self.history.get(remediation_id) {
            for (name, points) in series.value() {
                let Some(last) = points.last() else { continue };
                if let Some(step) = name.strip_prefix("step.") {
                    metrics.step_metrics.insert(step.to_string(), last.value);
                } else if let Some(strategy) = name.strip_prefix("strategy.") {
                    metrics.strategy_metrics.insert(strategy.to_string(), last.value);
                }
            }
        }
        Ok(metrics)
    }

    pub fn active_sessions(&self) -> Vec<String> {
        self.baselines.iter().map(|e| e.key().clone()).collect()
    }

    /// Append a point to a named series, evicting anything older than the
    /// history window.
    pub fn record_metric(&self, remediation_id: &str, name: &str, value: f64) {
        let now = self.clock.now();
        let cutoff = now - self.config.history_window();

        let mut entry = self.history.entry(remediation_id.to_string()).or_default();
        let series = entry.value_mut();
        series
            .entry(name.to_string())
            .or_default()
            .push(MetricPoint { timestamp: now, value });

        for points in series.values_mut() {
            points.retain(|p| p.timestamp >= cutoff);
        }
        series.retain(|_, points| !points.is_empty());
    }

    /// Retained series for a remediation; empty when nothing was recorded.
    pub fn get_metrics_history(&self, remediation_id: &str) -> HashMap<String, Vec<MetricPoint>> {
        self.history
            .get(remediation_id)
            .map(|s| s.value().clone())
            .unwrap_or_default()
    }

    /// Slope over the most recent `trend_window` samples of one series.
    pub fn trend(&self, remediation_id: &str, name: &str) -> Option<f64> {
        let history = self.history.get(remediation_id)?;
        let points = history.value().get(name)?;
        let window = self.config.trend_window.max(2);
        let start = points.len().saturating_sub(window);
        let values: Vec<f64> = points[start..].iter().map(|p| p.value).collect();
        linear_trend(&values)
    }

    /// Drop remediations with no point inside the history window. Open
    /// sessions are kept.
    pub fn evict_expired(&self) -> usize {
        let cutoff = self.clock.now() - self.config.history_window();
        let before = self.history.len();
        self.history.retain(|id, series| {
            self.baselines.contains_key(id)
                || series
                    .values()
                    .filter_map(|points| points.last())
                    .any(|p| p.timestamp >= cutoff)
        });
        let evicted = before.saturating_sub(self.history.len());
        if evicted > 0 {
            debug!(evicted, "Evicted expired metric histories");
        }
        evicted
    }

    /// Number of remediations with retained history.
    pub fn tracked_remediations(&self) -> usize {
        self.history.len()
    }

    pub fn clear(&self, remediation_id: &str) {
        self.history.remove(remediation_id);
        self.baselines.remove(remediation_id);
    }

    /// Sample host resources into every active session's series until shut down.
    pub fn spawn_periodic_collection(self: &Arc<Self>) -> PeriodicTask {
        let collector = Arc::clone(self);
        let period = std::time::Duration::from_secs(self.config.collection_interval_secs);
        PeriodicTask::spawn("metrics-collection", period, move || {
            let collector = Arc::clone(&collector);
            async move {
                collector.evict_expired();
                let sessions = collector.active_sessions();
                if sessions.is_empty() {
                    return;
                }
                match collector.sample().await {
                    Ok(sample) => {
                        for id in &sessions {
                            collector.record_metric(id, CPU_USAGE_SERIES, sample.cpu_percent);
                            collector.record_metric(
                                id,
                                MEMORY_USED_SERIES,
                                sample.memory_bytes as f64,
                            );
                        }
                        debug!(sessions = sessions.len(), "Sampled resources");
                    }
                    Err(e) => warn!(error = %e, "Periodic resource sampling failed"),
                }
            }
        })
    }
}
