//! Execution records
//!
//! A [`RemediationExecution`] is created when the executor starts, mutated
//! as strategies run, and persisted by the tracker under its execution id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::metrics::RemediationMetrics;
use super::plan::RemediationPlan;
use super::validator::RemediationValidation;
use crate::context::ErrorContext;

/// Lifecycle of an execution. Everything but `Running` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationStatus {
    Running,
    Completed,
    Partial,
    Failed,
    Cancelled,
    /// Below the auto-remediation severity threshold
    Skipped,
}

impl RemediationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RemediationStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RemediationStatus::Running => "running",
            RemediationStatus::Completed => "completed",
            RemediationStatus::Partial => "partial",
            RemediationStatus::Failed => "failed",
            RemediationStatus::Cancelled => "cancelled",
            RemediationStatus::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for RemediationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One strategy run, covering all of its retry attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutedAction {
    pub strategy: String,
    pub success: bool,
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationExecution {
    pub execution_id: String,
    pub correlation_id: String,
    pub plan_id: String,
    pub service_name: String,
    pub error_type: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RemediationStatus,
    pub actions: Vec<ExecutedAction>,
    pub validation: Option<RemediationValidation>,
    pub metrics: Option<RemediationMetrics>,
    #[serde(default)]
    pub rollback_plans: Vec<RemediationPlan>,
    pub error: Option<String>,
    /// Store writes that failed while the run continued
    #[serde(default)]
    pub tracking_errors: Vec<String>,
}

impl RemediationExecution {
    pub fn start(context: &ErrorContext, plan_id: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            execution_id: uuid::Uuid::new_v4().to_string(),
            correlation_id: context.correlation_id.clone(),
            plan_id: plan_id.to_string(),
            service_name: context.service_name.clone(),
            error_type: context.error_type.clone(),
            started_at,
            completed_at: None,
            status: RemediationStatus::Running,
            actions: Vec::new(),
            validation: None,
            metrics: None,
            rollback_plans: Vec::new(),
            error: None,
            tracking_errors: Vec::new(),
        }
    }

    pub fn is_successful(&self) -> bool {
        self.status == RemediationStatus::Completed
    }

    pub fn any_action_succeeded(&self) -> bool {
        self.actions.iter().any(|a| a.success)
    }

    /// Wall-clock duration; `None` while still running.
    pub fn duration_ms(&self) -> Option<i64> {
        self.completed_at
            .map(|end| (end - self.started_at).num_milliseconds().max(0))
    }
}
