//! Remediation validation
//!
//! Before execution a plan must be non-empty, every step and strategy must
//! use an allowed type with all of its required parameters, and the plan
//! must suit the error at hand. After execution, two probes and a resource
//! check decide whether the remediation actually worked:
//!
//! | error resolved | system healthy | outcome | success |
//! |---|---|---|---|
//! | yes | yes | fully successful | true |
//! | yes | no | resolved but unhealthy | false |
//! | no | yes | healthy but unresolved | false |
//! | no | no | failed | false |
//!
//! "Healthy" requires both the health probe and the resource deltas to be
//! within the configured thresholds.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use super::execution::RemediationExecution;
use super::metrics::RemediationMetrics;
use super::plan::{ActionDescriptor, RemediationPlan};
use super::strategy::RemediationStrategy;
use crate::config::{MetricsConfig, RemediationConfig};
use crate::context::ErrorContext;
use crate::errors::ValidationError;

/// A plan-to-context suitability check.
#[async_trait]
pub trait PlanCheck: Send + Sync {
    fn name(&self) -> &str;

    async fn check(
        &self,
        plan: &RemediationPlan,
        context: &ErrorContext,
    ) -> Result<(), ValidationError>;
}

/// Plan must list the context's error type, if it lists any.
pub struct ErrorTypeCheck;

#[async_trait]
impl PlanCheck for ErrorTypeCheck {
    fn name(&self) -> &str {
        "error_type"
    }

    async fn check(
        &self,
        plan: &RemediationPlan,
        context: &ErrorContext,
    ) -> Result<(), ValidationError> {
        if plan.applicable_error_types.is_empty()
            || plan
                .applicable_error_types
                .iter()
                .any(|t| t == &context.error_type)
        {
            Ok(())
        } else {
            Err(ValidationError::ContextMismatch {
                check: self.name().to_string(),
                reason: format!(
                    "plan does not apply to error type '{}'",
                    context.error_type
                ),
            })
        }
    }
}

/// Context severity must fall inside the plan's severity range.
pub struct SeverityCheck;

#[async_trait]
impl PlanCheck for SeverityCheck {
    fn name(&self) -> &str {
        "severity"
    }

    async fn check(
        &self,
        plan: &RemediationPlan,
        context: &ErrorContext,
    ) -> Result<(), ValidationError> {
        let severity = context.severity;
        if let Some(min) = plan.min_severity {
            if severity < min {
                return Err(ValidationError::ContextMismatch {
                    check: self.name().to_string(),
                    reason: format!("severity {} is below plan minimum {}", severity, min),
                });
            }
        }
        if let Some(max) = plan.max_severity {
            if severity > max {
                return Err(ValidationError::ContextMismatch {
                    check: self.name().to_string(),
                    reason: format!("severity {} is above plan maximum {}", severity, max),
                });
            }
        }
        Ok(())
    }
}

/// Placeholder for dependency-aware validation; accepts every plan.
pub struct DependencyCheck;

#[async_trait]
impl PlanCheck for DependencyCheck {
    fn name(&self) -> &str {
        "dependencies"
    }

    async fn check(
        &self,
        _plan: &RemediationPlan,
        _context: &ErrorContext,
    ) -> Result<(), ValidationError> {
        Ok(())
    }
}

/// Signals used after execution to judge the result.
#[async_trait]
pub trait OutcomeProbe: Send + Sync {
    async fn error_resolved(
        &self,
        context: &ErrorContext,
        execution: &RemediationExecution,
    ) -> bool;

    async fn system_healthy(&self, context: &ErrorContext) -> bool;
}

/// Treats any successful action as resolution and assumes a healthy system.
pub struct ActionOutcomeProbe;

#[async_trait]
impl OutcomeProbe for ActionOutcomeProbe {
    async fn error_resolved(
        &self,
        _context: &ErrorContext,
        execution: &RemediationExecution,
    ) -> bool {
        execution.any_action_succeeded()
    }

    async fn system_healthy(&self, _context: &ErrorContext) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationOutcome {
    FullySuccessful,
    ResolvedButUnhealthy,
    HealthyButUnresolved,
    Failed,
}

impl ValidationOutcome {
    pub fn from_checks(error_resolved: bool, system_healthy: bool) -> Self {
        match (error_resolved, system_healthy) {
            (true, true) => ValidationOutcome::FullySuccessful,
            (true, false) => ValidationOutcome::ResolvedButUnhealthy,
            (false, true) => ValidationOutcome::HealthyButUnresolved,
            (false, false) => ValidationOutcome::Failed,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ValidationOutcome::FullySuccessful)
    }

    pub fn description(&self) -> &'static str {
        match self {
            ValidationOutcome::FullySuccessful => {
                "Remediation was fully successful: error resolved and system healthy"
            }
            ValidationOutcome::ResolvedButUnhealthy => {
                "Error resolved but system health is degraded"
            }
            ValidationOutcome::HealthyButUnresolved => {
                "System is healthy but the error is not resolved"
            }
            ValidationOutcome::Failed => "Remediation failed: error unresolved and system unhealthy",
        }
    }
}

/// Post-execution verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationValidation {
    pub outcome: ValidationOutcome,
    pub success: bool,
    pub error_resolved: bool,
    pub system_healthy: bool,
    pub metrics_within_threshold: bool,
    pub message: String,
    pub validated_at: DateTime<Utc>,
}

pub struct RemediationValidator {
    config: RemediationConfig,
    thresholds: MetricsConfig,
    checks: Vec<Arc<dyn PlanCheck>>,
    probe: Arc<dyn OutcomeProbe>,
}

impl RemediationValidator {
    pub fn new(mut config: RemediationConfig, thresholds: MetricsConfig) -> Self {
        config.normalize_allow_lists();
        Self {
            config,
            thresholds,
            checks: vec![
                Arc::new(ErrorTypeCheck),
                Arc::new(SeverityCheck),
                Arc::new(DependencyCheck),
            ],
            probe: Arc::new(ActionOutcomeProbe),
        }
    }

    /// Append a plan check; checks run in insertion order.
    pub fn with_check(mut self, check: Arc<dyn PlanCheck>) -> Self {
        self.checks.push(check);
        self
    }

    /// Replace the plan checks entirely.
    pub fn with_checks(mut self, checks: Vec<Arc<dyn PlanCheck>>) -> Self {
        self.checks = checks;
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn OutcomeProbe>) -> Self {
        self.probe = probe;
        self
    }

    fn check_allowed(
        kind: &str,
        descriptor: &ActionDescriptor,
        allow_list: &BTreeMap<String, Vec<String>>,
    ) -> Result<(), ValidationError> {
        let required = allow_list.get(&descriptor.action_type).ok_or_else(|| {
            ValidationError::TypeNotAllowed {
                kind: kind.to_string(),
                type_name: descriptor.action_type.clone(),
            }
        })?;
        for parameter in required {
            if descriptor.param(parameter).is_none() {
                return Err(ValidationError::MissingParameter {
                    kind: kind.to_string(),
                    type_name: descriptor.action_type.clone(),
                    parameter: parameter.clone(),
                });
            }
        }
        Ok(())
    }

    /// Validate a plan against the allow-lists and the error context.
    /// On success the plan is marked validated.
    pub async fn validate_plan(
        &self,
        plan: &mut RemediationPlan,
        context: &ErrorContext,
    ) -> Result<(), ValidationError> {
        if plan.is_empty() {
            return Err(ValidationError::EmptyPlan);
        }

        for step in &plan.steps {
            let descriptor = step.descriptor()?;
            Self::check_allowed("step", &descriptor, &self.config.allowed_step_types)?;
        }
        for raw in &plan.strategies {
            let descriptor = ActionDescriptor::parse(raw)?;
            Self::check_allowed("strategy", &descriptor, &self.config.allowed_strategies)?;
        }

        for check in &self.checks {
            check.check(plan, context).await?;
        }

        plan.mark_validated();
        debug!(plan_id = %plan.id, "Plan validated");
        Ok(())
    }

    /// Validate a registered strategy for the current context.
    pub async fn validate_strategy(
        &self,
        strategy: &dyn RemediationStrategy,
        context: &ErrorContext,
    ) -> Result<(), ValidationError> {
        let descriptor = ActionDescriptor::parse(&strategy.descriptor())?;
        Self::check_allowed("strategy", &descriptor, &self.config.allowed_strategies)?;
        if !strategy.can_apply(context).await {
            return Err(ValidationError::ContextMismatch {
                check: "can_apply".to_string(),
                reason: format!("strategy '{}' cannot apply in the current state", strategy.name()),
            });
        }
        Ok(())
    }

    /// Whether resource deltas stay inside the configured thresholds.
    /// No metrics means nothing exceeded.
    pub fn metrics_within_threshold(&self, metrics: Option<&RemediationMetrics>) -> bool {
        let Some(metrics) = metrics else {
            return true;
        };
        let usage = &metrics.resource_usage;
        usage.cpu_percent_delta <= self.thresholds.max_cpu_delta_percent
            && usage.memory_bytes_delta <= self.thresholds.max_memory_delta_bytes
    }

    /// Judge a finished execution.
    pub async fn validate_remediation(
        &self,
        execution: &RemediationExecution,
        context: &ErrorContext,
    ) -> RemediationValidation {
        let error_resolved = self.probe.error_resolved(context, execution).await;
        let probe_healthy = self.probe.system_healthy(context).await;
        let metrics_ok = self.metrics_within_threshold(execution.metrics.as_ref());
        let system_healthy = probe_healthy && metrics_ok;

        let outcome = ValidationOutcome::from_checks(error_resolved, system_healthy);
        RemediationValidation {
            outcome,
            success: outcome.is_success(),
            error_resolved,
            system_healthy,
            metrics_within_threshold: metrics_ok,
            message: outcome.description().to_string(),
            validated_at: Utc::now(),
        }
    }
}
