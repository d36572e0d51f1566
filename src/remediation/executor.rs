//! Remediation executor
//!
//! Drives one execution through its lifecycle:
//!
//! ```text
//! Running ──validation fails──────────────▶ Failed
//!    │ ──severity below threshold─────────▶ Skipped
//!    │ ──cancelled between strategies─────▶ Cancelled
//!    │ ──a strategy succeeds (stop-first)─▶ Completed
//!    └─loop exhausted─▶ Partial (some success) | Failed (none)
//! ```
//!
//! Strategies run one at a time in descending priority. A strategy that
//! returns an error, reports failure, panics or times out is recorded as a
//! failed action and the loop moves on. The execution is tracked when it
//! starts and again unconditionally when it ends.

use dashmap::DashMap;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn, Instrument};

use super::execution::{ExecutedAction, RemediationExecution, RemediationStatus};
use super::metrics::{RemediationMetrics, RemediationMetricsCollector};
use super::plan::RemediationPlan;
use super::strategy::{RemediationStrategy, StrategyRegistry};
use super::tracker::RemediationTracker;
use super::validator::RemediationValidator;
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, RemediationConfig, StrategyPolicy};
use crate::context::{ErrorAnalysis, ErrorContext};
use crate::errors::{ExecutionError, FinalizeError, TrackingError, ValidationError};
use crate::observability::telemetry::{
    record_remediation, record_strategy_attempt, record_tracking_failure, remediation_span,
    safe_log_text,
};

pub const NO_SUCCESSFUL_STRATEGY: &str = "no successful remediation strategy found.";

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub struct RemediationExecutor {
    config: RemediationConfig,
    registry: StrategyRegistry,
    validator: Arc<RemediationValidator>,
    metrics: Arc<RemediationMetricsCollector>,
    tracker: Arc<RemediationTracker>,
    clock: Arc<dyn Clock>,
    cancellations: DashMap<String, Arc<AtomicBool>>,
}

impl RemediationExecutor {
    pub fn new(config: &Config, registry: StrategyRegistry, tracker: Arc<RemediationTracker>) -> Self {
        Self {
            config: config.remediation.clone(),
            registry,
            validator: Arc::new(RemediationValidator::new(
                config.remediation.clone(),
                config.metrics.clone(),
            )),
            metrics: Arc::new(RemediationMetricsCollector::new(config.metrics.clone())),
            tracker,
            clock: Arc::new(SystemClock),
            cancellations: DashMap::new(),
        }
    }

    pub fn with_validator(mut self, validator: Arc<RemediationValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_metrics_collector(mut self, metrics: Arc<RemediationMetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    pub fn metrics_collector(&self) -> &Arc<RemediationMetricsCollector> {
        &self.metrics
    }

    /// Ids of executions currently in flight in this process.
    pub fn running_executions(&self) -> Vec<String> {
        self.cancellations.iter().map(|e| e.key().clone()).collect()
    }

    /// Run `plan` for `analysis`.
    ///
    /// The returned execution is always terminal. `Err` means the execution
    /// finished but its final record could not be persisted; the record is
    /// carried inside the error.
    pub async fn execute_remediation(
        &self,
        analysis: &ErrorAnalysis,
        plan: RemediationPlan,
        context: &ErrorContext,
    ) -> Result<RemediationExecution, FinalizeError> {
        let execution = RemediationExecution::start(context, &plan.id, self.clock.now());
        let span = remediation_span(
            &execution.execution_id,
            &context.service_name,
            &context.error_type,
        );
        self.run(execution, analysis, plan, context)
            .instrument(span)
            .await
    }

    async fn run(
        &self,
        mut execution: RemediationExecution,
        analysis: &ErrorAnalysis,
        mut plan: RemediationPlan,
        context: &ErrorContext,
    ) -> Result<RemediationExecution, FinalizeError> {
        let cancel = Arc::new(AtomicBool::new(false));
        self.cancellations
            .insert(execution.execution_id.clone(), cancel.clone());

        info!(
            plan_id = %plan.id,
            strategies = self.registry.len(),
            "Starting remediation"
        );
        // Best effort. The final write carries the failure and must land.
        if let Err(e) = self.tracker.track_execution(&execution).await {
            warn!(error = %e, "Failed to persist initial execution record");
            record_tracking_failure("initial");
            execution
                .tracking_errors
                .push(format!("initial record: {}", e));
        }
        self.metrics.begin_session(&execution.execution_id).await;

        let drive = AssertUnwindSafe(self.drive(&mut execution, analysis, &mut plan, context, &cancel))
            .catch_unwind()
            .await;
        if let Err(payload) = drive {
            let message = panic_message(payload.as_ref());
            error!(panic = %safe_log_text(&message), "Remediation aborted by panic");
            execution.status = RemediationStatus::Failed;
            execution.error = Some(format!("remediation aborted: {}", message));
        }

        self.finish(&mut execution, context).await;
        self.cancellations.remove(&execution.execution_id);

        let duration_ms = execution.duration_ms().unwrap_or(0).max(0) as u64;
        record_remediation(execution.status.as_str(), duration_ms);

        match self.tracker.track_execution(&execution).await {
            Ok(()) => {
                info!(status = %execution.status, duration_ms, "Remediation finished");
                Ok(execution)
            }
            Err(source) => {
                error!(error = %source, "Failed to persist final execution record");
                record_tracking_failure("final");
                Err(FinalizeError {
                    execution: Box::new(execution),
                    source,
                })
            }
        }
    }

    async fn drive(
        &self,
        execution: &mut RemediationExecution,
        analysis: &ErrorAnalysis,
        plan: &mut RemediationPlan,
        context: &ErrorContext,
        cancel: &AtomicBool,
    ) {
        if !self.config.enabled {
            execution.status = RemediationStatus::Skipped;
            execution.error = Some("automated remediation is disabled".to_string());
            return;
        }

        let timeout = self.config.validation_timeout();
        let validated = match tokio::time::timeout(timeout, self.validator.validate_plan(plan, context)).await {
            Ok(result) => result,
            Err(_) => Err(ValidationError::Timeout {
                seconds: timeout.as_secs(),
            }),
        };
        if let Err(e) = validated {
            warn!(error = %e, "Plan validation failed");
            execution.status = RemediationStatus::Failed;
            execution.error = Some(e.to_string());
            return;
        }

        let threshold = self.config.min_severity_for_auto_remediation;
        if analysis.severity < threshold {
            info!(severity = %analysis.severity, threshold = %threshold, "Below auto-remediation threshold");
            execution.status = RemediationStatus::Skipped;
            execution.error = Some(format!(
                "severity {} is below the auto-remediation threshold {}",
                analysis.severity, threshold
            ));
            return;
        }

        let candidates = self.registry.candidates(analysis);
        debug!(candidates = candidates.len(), policy = %self.config.strategy_policy, "Selected strategies");

        for strategy in candidates {
            if cancel.load(Ordering::SeqCst) {
                break;
            }

            let check = tokio::time::timeout(
                timeout,
                self.validator.validate_strategy(strategy.as_ref(), context),
            )
            .await;
            match check {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(strategy = strategy.name(), error = %e, "Skipping strategy");
                    record_strategy_attempt(strategy.name(), "skipped");
                    continue;
                }
                Err(_) => {
                    warn!(strategy = strategy.name(), "Strategy validation timed out; skipping");
                    record_strategy_attempt(strategy.name(), "skipped");
                    continue;
                }
            }

            let action = self.run_strategy(strategy.as_ref(), context, cancel).await;
            let elapsed = (action.completed_at - action.started_at).num_milliseconds() as f64;
            self.metrics.record_metric(
                &execution.execution_id,
                &format!("strategy.{}.duration_ms", strategy.name()),
                elapsed,
            );
            self.metrics.record_metric(
                &execution.execution_id,
                &format!("strategy.{}.attempts", strategy.name()),
                f64::from(action.attempts),
            );
            let succeeded = action.success;
            execution.actions.push(action);

            if succeeded && self.config.strategy_policy == StrategyPolicy::StopOnFirstSuccess {
                execution.status = RemediationStatus::Completed;
                return;
            }
        }

        if cancel.load(Ordering::SeqCst) && !execution.any_action_succeeded() {
            info!("Remediation cancelled");
            execution.status = RemediationStatus::Cancelled;
            execution.error = Some("remediation cancelled".to_string());
            return;
        }

        let succeeded = execution.actions.iter().filter(|a| a.success).count();
        if succeeded > 0 && succeeded == execution.actions.len() {
            execution.status = RemediationStatus::Completed;
        } else if succeeded > 0 {
            execution.status = RemediationStatus::Partial;
        } else {
            execution.status = RemediationStatus::Failed;
            execution.error = Some(
                execution
                    .actions
                    .last()
                    .and_then(|a| a.error.clone())
                    .unwrap_or_else(|| NO_SUCCESSFUL_STRATEGY.to_string()),
            );
        }
    }

    /// Run one strategy with retries. All attempts fold into one action.
    async fn run_strategy(
        &self,
        strategy: &dyn RemediationStrategy,
        context: &ErrorContext,
        cancel: &AtomicBool,
    ) -> ExecutedAction {
        let name = strategy.name().to_string();
        let started_at = self.clock.now();
        let max_attempts = self.config.max_retry_attempts.saturating_add(1);
        let timeout = self.config.strategy_timeout();

        let mut attempts = 0;
        let mut last_error: Option<ExecutionError> = None;
        let mut message = None;
        let mut success = false;

        while attempts < max_attempts {
            attempts += 1;
            let attempt = AssertUnwindSafe(strategy.execute(context)).catch_unwind();
            let failure = match tokio::time::timeout(timeout, attempt).await {
                Ok(Ok(Ok(outcome))) if outcome.success => {
                    record_strategy_attempt(&name, "success");
                    success = true;
                    message = Some(outcome.message);
                    break;
                }
                Ok(Ok(Ok(outcome))) => {
                    record_strategy_attempt(&name, "failure");
                    ExecutionError::Failed {
                        strategy: name.clone(),
                        message: outcome.message,
                    }
                }
                Ok(Ok(Err(e))) => {
                    record_strategy_attempt(&name, "failure");
                    e
                }
                Ok(Err(payload)) => {
                    record_strategy_attempt(&name, "panic");
                    ExecutionError::Panicked {
                        strategy: name.clone(),
                        message: panic_message(payload.as_ref()),
                    }
                }
                Err(_) => {
                    record_strategy_attempt(&name, "timeout");
                    ExecutionError::Timeout {
                        strategy: name.clone(),
                        seconds: timeout.as_secs(),
                    }
                }
            };

            warn!(
                strategy = %name,
                attempt = attempts,
                error = %safe_log_text(&failure.to_string()),
                "Strategy attempt failed"
            );
            last_error = Some(failure);

            if attempts < max_attempts && !cancel.load(Ordering::SeqCst) {
                let backoff = self.config.retry_backoff_ms.saturating_mul(u64::from(attempts));
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            } else {
                break;
            }
        }

        ExecutedAction {
            strategy: name,
            success,
            error: if success {
                None
            } else {
                last_error.map(|e| e.to_string())
            },
            message,
            attempts,
            started_at,
            completed_at: self.clock.now(),
        }
    }

    /// Metrics, end time, post-validation and rollback plans.
    async fn finish(&self, execution: &mut RemediationExecution, context: &ErrorContext) {
        let completed_at = self.clock.now();
        let duration_ms = (completed_at - execution.started_at).num_milliseconds().max(0);

        execution.metrics = match self
            .metrics
            .finish_session(&execution.execution_id, context, Some(duration_ms))
            .await
        {
            Ok(metrics) => Some(metrics),
            Err(e) => {
                warn!(error = %e, "Metrics collection failed");
                None
            }
        };
        execution.completed_at = Some(completed_at);

        if !matches!(
            execution.status,
            RemediationStatus::Completed | RemediationStatus::Partial
        ) {
            return;
        }

        let validation = self.validator.validate_remediation(execution, context).await;
        debug!(outcome = ?validation.outcome, "Post-execution validation");
        let failed = !validation.success;
        execution.validation = Some(validation);

        if failed && self.config.rollback_on_failed_validation {
            for action in execution.actions.iter().filter(|a| a.success) {
                let Some(strategy) = self.registry.get(&action.strategy) else {
                    continue;
                };
                if !strategy.can_rollback() {
                    continue;
                }
                if let Some(plan) = strategy.rollback_plan(context).await {
                    info!(strategy = strategy.name(), plan_id = %plan.id, "Prepared rollback plan");
                    execution.rollback_plans.push(plan);
                }
            }
        }
    }

    pub async fn get_remediation_status(
        &self,
        execution_id: &str,
    ) -> Result<Option<RemediationStatus>, TrackingError> {
        Ok(self
            .tracker
            .get_execution(execution_id)
            .await?
            .map(|e| e.status))
    }

    /// Request cancellation. In-flight executions stop before their next
    /// strategy; a stored record left `Running` by a dead process is moved
    /// to `Cancelled` directly. Returns whether anything was cancelled.
    pub async fn cancel_remediation(&self, execution_id: &str) -> Result<bool, TrackingError> {
        if let Some(flag) = self.cancellations.get(execution_id) {
            flag.store(true, Ordering::SeqCst);
            info!(execution_id, "Cancellation requested");
            return Ok(true);
        }

        match self.tracker.get_execution(execution_id).await? {
            Some(mut execution) if execution.status == RemediationStatus::Running => {
                execution.status = RemediationStatus::Cancelled;
                execution.completed_at = Some(self.clock.now());
                execution.error = Some("remediation cancelled".to_string());
                self.tracker.track_execution(&execution).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub async fn get_execution_history(
        &self,
        service_name: &str,
        start: chrono::DateTime<chrono::Utc>,
        end: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<RemediationExecution>, TrackingError> {
        self.tracker
            .get_service_executions(service_name, start, end)
            .await
    }

    pub async fn get_execution_metrics(
        &self,
        execution_id: &str,
    ) -> Result<Option<RemediationMetrics>, TrackingError> {
        Ok(self
            .tracker
            .get_execution(execution_id)
            .await?
            .and_then(|e| e.metrics))
    }
}
