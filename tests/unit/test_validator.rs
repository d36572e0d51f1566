//! Plan validation against configured allow-lists, and post-execution verdicts

use async_trait::async_trait;
use faultmend::clock::{Clock, SystemClock};
use faultmend::config::{Config, MetricsConfig, RemediationConfig};
use faultmend::context::{ErrorContext, ErrorSeverity};
use faultmend::errors::ValidationError;
use faultmend::remediation::{
    ExecutedAction, OutcomeProbe, RemediationExecution, RemediationMetrics, RemediationPlan,
    RemediationValidator, ValidationOutcome,
};
use std::io::Write;
use std::sync::Arc;

fn ctx() -> ErrorContext {
    ErrorContext::new("orders", "PlaceOrder", "DeadlockDetected", "deadlock on orders table")
        .with_severity(ErrorSeverity::High)
}

fn default_validator() -> RemediationValidator {
    RemediationValidator::new(RemediationConfig::default(), MetricsConfig::default())
}

const PLAN_JSON: &str = r#"{
    "context": "drain and retry",
    "steps": [
        {"description": "drain the node", "action": "drain:node=db-2", "parameters": {"timeout": "30s"}},
        {"description": "retry the order", "action": "retry", "parameters": {"operation": "PlaceOrder"}}
    ],
    "applicable_error_types": ["DeadlockDetected"]
}"#;

#[tokio::test]
async fn test_plan_from_json_needs_configured_step_type() {
    let mut plan: RemediationPlan = serde_json::from_str(PLAN_JSON).unwrap();
    assert!(!plan.is_validated());

    let err = default_validator()
        .validate_plan(&mut plan, &ctx())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ValidationError::TypeNotAllowed {
            kind: "step".to_string(),
            type_name: "drain".to_string()
        }
    );
}

#[tokio::test]
async fn test_allow_list_from_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
        [remediation.allowed_step_types]
        drain = ["node", "timeout"]
        retry = ["operation"]
        "#
    )
    .unwrap();
    let config = Config::load(file.path().to_str()).unwrap();
    let validator = RemediationValidator::new(config.remediation, config.metrics);

    // Step parameters fill in what the descriptor leaves out.
    let mut plan: RemediationPlan = serde_json::from_str(PLAN_JSON).unwrap();
    validator.validate_plan(&mut plan, &ctx()).await.unwrap();
    assert!(plan.is_validated());

    let mut missing: RemediationPlan = serde_json::from_str(PLAN_JSON).unwrap();
    missing.steps[0].parameters.clear();
    let err = validator.validate_plan(&mut missing, &ctx()).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        ValidationError::MissingParameter {
            kind: "step".to_string(),
            type_name: "drain".to_string(),
            parameter: "timeout".to_string()
        }
        .to_string()
    );
}

#[tokio::test]
async fn test_malformed_strategy_descriptor_rejected() {
    let mut plan = RemediationPlan::new("bad").with_strategy("restart:target");
    let err = default_validator()
        .validate_plan(&mut plan, &ctx())
        .await
        .unwrap_err();
    assert!(matches!(err, ValidationError::MalformedDescriptor { .. }));
}

#[test]
fn test_empty_plan_message() {
    let mut plan = RemediationPlan::default();
    let err = tokio_test::block_on(default_validator().validate_plan(&mut plan, &ctx()))
        .unwrap_err();
    assert_eq!(err.to_string(), "Remediation plan has no steps or strategies.");
}

struct FixedProbe {
    resolved: bool,
    healthy: bool,
}

#[async_trait]
impl OutcomeProbe for FixedProbe {
    async fn error_resolved(&self, _: &ErrorContext, _: &RemediationExecution) -> bool {
        self.resolved
    }

    async fn system_healthy(&self, _: &ErrorContext) -> bool {
        self.healthy
    }
}

fn finished_execution(success: bool) -> RemediationExecution {
    let now = SystemClock.now();
    let mut exec = RemediationExecution::start(&ctx(), "plan-1", now);
    exec.actions.push(ExecutedAction {
        strategy: "restart".to_string(),
        success,
        error: None,
        message: None,
        attempts: 1,
        started_at: now,
        completed_at: now,
    });
    exec
}

#[tokio::test]
async fn test_verdict_follows_probe_truth_table() {
    let cases = [
        (true, true, ValidationOutcome::FullySuccessful),
        (true, false, ValidationOutcome::ResolvedButUnhealthy),
        (false, true, ValidationOutcome::HealthyButUnresolved),
        (false, false, ValidationOutcome::Failed),
    ];
    for (resolved, healthy, expected) in cases {
        let validator = default_validator().with_probe(Arc::new(FixedProbe { resolved, healthy }));
        let verdict = validator
            .validate_remediation(&finished_execution(true), &ctx())
            .await;
        assert_eq!(verdict.outcome, expected);
        assert_eq!(verdict.success, expected == ValidationOutcome::FullySuccessful);
        assert_eq!(verdict.message, expected.description());
    }
}

#[tokio::test]
async fn test_resource_spike_marks_system_unhealthy() {
    let mut exec = finished_execution(true);
    let mut metrics = RemediationMetrics::new(exec.execution_id.clone());
    metrics.resource_usage.memory_bytes_delta = i64::MAX;
    exec.metrics = Some(metrics);

    let verdict = default_validator().validate_remediation(&exec, &ctx()).await;
    assert!(verdict.error_resolved);
    assert!(!verdict.metrics_within_threshold);
    assert!(!verdict.system_healthy);
    assert_eq!(verdict.outcome, ValidationOutcome::ResolvedButUnhealthy);
}

#[tokio::test]
async fn test_default_probe_needs_a_successful_action() {
    let verdict = default_validator()
        .validate_remediation(&finished_execution(false), &ctx())
        .await;
    assert!(!verdict.error_resolved);
    assert_eq!(verdict.outcome, ValidationOutcome::HealthyButUnresolved);
}
