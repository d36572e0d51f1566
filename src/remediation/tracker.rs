//! Remediation tracking
//!
//! Executions are stored as JSON under `execution:{id}` with a TTL equal to
//! the retention period. Two sorted-set indices, `service:{name}` and
//! `errorType:{type}`, map execution ids to their start time in epoch
//! millis so time-window queries are range scans. Each index is capped at
//! `max_executions_per_index`, dropping the oldest entries first.
//!
//! Record writes and index updates are independent store operations. An
//! index may briefly point at a record that never landed or has expired;
//! readers skip such ids.

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::execution::{RemediationExecution, RemediationStatus};
use super::periodic::PeriodicTask;
use super::store::ExecutionStore;
use crate::clock::{Clock, SystemClock};
use crate::config::TrackingConfig;
use crate::errors::TrackingError;

pub type CleanupHandle = PeriodicTask;

pub fn execution_key(execution_id: &str) -> String {
    format!("execution:{}", execution_id)
}

/// Which secondary index a query runs against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexScope {
    Service(String),
    ErrorType(String),
}

impl IndexScope {
    pub fn key(&self) -> String {
        match self {
            IndexScope::Service(name) => format!("service:{}", name),
            IndexScope::ErrorType(name) => format!("errorType:{}", name),
        }
    }
}

/// Aggregates over a set of executions. Derived on demand, never stored.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RemediationStatistics {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub partial: usize,
    pub skipped: usize,
    pub cancelled: usize,
    pub running: usize,
    pub average_duration_ms: f64,
    pub success_rate: f64,
}

impl RemediationStatistics {
    pub fn from_executions(executions: &[RemediationExecution]) -> Self {
        let mut stats = Self {
            total: executions.len(),
            ..Default::default()
        };
        let mut duration_sum = 0i64;
        let mut timed = 0usize;

        for execution in executions {
            match execution.status {
                RemediationStatus::Completed => stats.successful += 1,
                RemediationStatus::Failed => stats.failed += 1,
                RemediationStatus::Partial => stats.partial += 1,
                RemediationStatus::Skipped => stats.skipped += 1,
                RemediationStatus::Cancelled => stats.cancelled += 1,
                RemediationStatus::Running => stats.running += 1,
            }
            if let Some(ms) = execution.duration_ms() {
                duration_sum += ms;
                timed += 1;
            }
        }

        if timed > 0 {
            stats.average_duration_ms = duration_sum as f64 / timed as f64;
        }
        if stats.total > 0 {
            stats.success_rate = stats.successful as f64 / stats.total as f64;
        }
        stats
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CleanupReport {
    pub indices_swept: usize,
    pub index_entries_removed: usize,
    pub records_removed: usize,
}

pub struct RemediationTracker {
    store: Arc<dyn ExecutionStore>,
    config: TrackingConfig,
    known_indices: DashSet<String>,
    clock: Arc<dyn Clock>,
}

impl RemediationTracker {
    pub fn new(store: Arc<dyn ExecutionStore>, config: TrackingConfig) -> Self {
        Self {
            store,
            config,
            known_indices: DashSet::new(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn retention_ttl(&self) -> Duration {
        Duration::from_secs(self.config.retention_hours.saturating_mul(3600))
    }

    fn index_error(index: &str, source: crate::errors::StoreError) -> TrackingError {
        TrackingError::Index {
            index: index.to_string(),
            source,
        }
    }

    /// Persist an execution and update both indices. Overwrites any earlier
    /// record with the same id.
    #[instrument(skip(self, execution), fields(execution_id = %execution.execution_id, status = %execution.status))]
    pub async fn track_execution(&self, execution: &RemediationExecution) -> Result<(), TrackingError> {
        let id = &execution.execution_id;
        let json =
            serde_json::to_string(execution).map_err(|source| TrackingError::Serialization {
                execution_id: id.clone(),
                source,
            })?;

        self.store
            .set_with_ttl(&execution_key(id), &json, self.retention_ttl())
            .await
            .map_err(|source| TrackingError::Store {
                execution_id: id.clone(),
                source,
            })?;

        let score = execution.started_at.timestamp_millis() as f64;
        let keep = self.config.max_executions_per_index.max(1) as isize;
        for scope in [
            IndexScope::Service(execution.service_name.clone()),
            IndexScope::ErrorType(execution.error_type.clone()),
        ] {
            let index = scope.key();
            self.store
                .zadd(&index, id, score)
                .await
                .map_err(|source| TrackingError::Store {
                    execution_id: id.clone(),
                    source,
                })?;
            let trimmed = self
                .store
                .zrem_range_by_rank(&index, 0, -(keep + 1))
                .await
                .map_err(|source| TrackingError::Store {
                    execution_id: id.clone(),
                    source,
                })?;
            if trimmed > 0 {
                debug!(index = %index, trimmed, "Trimmed execution index");
            }
            self.known_indices.insert(index);
        }
        Ok(())
    }

    pub async fn get_execution(
        &self,
        execution_id: &str,
    ) -> Result<Option<RemediationExecution>, TrackingError> {
        let raw = self
            .store
            .get(&execution_key(execution_id))
            .await
            .map_err(|source| TrackingError::Store {
                execution_id: execution_id.to_string(),
                source,
            })?;
        match raw {
            None => Ok(None),
            Some(json) => serde_json::from_str(&json).map(Some).map_err(|source| {
                TrackingError::Serialization {
                    execution_id: execution_id.to_string(),
                    source,
                }
            }),
        }
    }

    /// Executions in `scope` that started within `[start, end]`, oldest first.
    pub async fn get_executions(
        &self,
        scope: &IndexScope,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RemediationExecution>, TrackingError> {
        let index = scope.key();
        let ids = self
            .store
            .zrange_by_score(
                &index,
                start.timestamp_millis() as f64,
                end.timestamp_millis() as f64,
            )
            .await
            .map_err(|e| Self::index_error(&index, e))?;

        let mut executions = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get_execution(&id).await {
                Ok(Some(execution)) => executions.push(execution),
                Ok(None) => debug!(execution_id = %id, "Indexed execution has expired"),
                Err(TrackingError::Serialization { .. }) => {
                    warn!(execution_id = %id, "Skipping unreadable execution record")
                }
                Err(e) => return Err(e),
            }
        }
        Ok(executions)
    }

    pub async fn get_service_executions(
        &self,
        service_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RemediationExecution>, TrackingError> {
        self.get_executions(&IndexScope::Service(service_name.to_string()), start, end)
            .await
    }

    pub async fn get_error_type_executions(
        &self,
        error_type: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RemediationExecution>, TrackingError> {
        self.get_executions(&IndexScope::ErrorType(error_type.to_string()), start, end)
            .await
    }

    pub async fn get_statistics(
        &self,
        scope: &IndexScope,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<RemediationStatistics, TrackingError> {
        let executions = self.get_executions(scope, start, end).await?;
        Ok(RemediationStatistics::from_executions(&executions))
    }

    pub fn known_indices(&self) -> Vec<String> {
        let mut names: Vec<String> = self.known_indices.iter().map(|k| k.key().clone()).collect();
        names.sort();
        names
    }

    /// Remove index entries and records that started before the retention cutoff.
    pub async fn cleanup_expired(&self) -> Result<CleanupReport, TrackingError> {
        let cutoff = (self.clock.now() - self.config.retention()).timestamp_millis() as f64;
        let mut report = CleanupReport::default();

        for index in self.known_indices() {
            let stale = self
                .store
                .zrange_by_score(&index, f64::NEG_INFINITY, cutoff)
                .await
                .map_err(|e| Self::index_error(&index, e))?;

            for id in &stale {
                match self.store.delete(&execution_key(id)).await {
                    Ok(true) => report.records_removed += 1,
                    Ok(false) => {}
                    Err(source) => {
                        return Err(TrackingError::Store {
                            execution_id: id.clone(),
                            source,
                        })
                    }
                }
            }

            report.index_entries_removed += self
                .store
                .zrem_range_by_score(&index, f64::NEG_INFINITY, cutoff)
                .await
                .map_err(|e| Self::index_error(&index, e))?;

            if self
                .store
                .zcard(&index)
                .await
                .map_err(|e| Self::index_error(&index, e))?
                == 0
            {
                self.known_indices.remove(&index);
            }
            report.indices_swept += 1;
        }

        info!(
            indices = report.indices_swept,
            entries = report.index_entries_removed,
            records = report.records_removed,
            "Execution cleanup finished"
        );
        Ok(report)
    }

    /// Run [`Self::cleanup_expired`] every `cleanup_interval_secs`.
    pub fn spawn_cleanup(self: &Arc<Self>) -> CleanupHandle {
        let tracker = Arc::clone(self);
        let period = Duration::from_secs(self.config.cleanup_interval_secs);
        PeriodicTask::spawn("execution-cleanup", period, move || {
            let tracker = Arc::clone(&tracker);
            async move {
                if let Err(e) = tracker.cleanup_expired().await {
                    warn!(error = %e, "Execution cleanup failed");
                }
            }
        })
    }
}
