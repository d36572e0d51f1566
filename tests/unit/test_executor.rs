//! Remediation executor state machine tests

use super::helpers::*;
use faultmend::config::StrategyPolicy;
use faultmend::context::ErrorSeverity;
use faultmend::remediation::{
    RemediationPlan, RemediationStatus, RemediationValidator, StrategyRegistry, ValidationOutcome,
    NO_SUCCESSFUL_STRATEGY,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_throwing_strategy_then_succeeding_strategy() {
    let failing = Arc::new(ScriptedStrategy::new("p10", 10, Behavior::Error("boom".into())));
    let working = Arc::new(ScriptedStrategy::new("p5", 5, Behavior::Succeed));
    let registry = StrategyRegistry::new()
        .with(working.clone())
        .with(failing.clone());
    let (executor, _) = build_executor(&test_config(), registry);
    let ctx = context();

    let execution = executor
        .execute_remediation(&analysis(&ctx), plan(), &ctx)
        .await
        .unwrap();

    assert_eq!(execution.status, RemediationStatus::Completed);
    assert_eq!(execution.actions.len(), 2);
    assert_eq!(execution.actions[0].strategy, "p10");
    assert!(!execution.actions[0].success);
    assert!(execution.actions[0].error.as_deref().unwrap().contains("boom"));
    assert_eq!(execution.actions[1].strategy, "p5");
    assert!(execution.actions[1].success);
    assert!(execution.completed_at.is_some());
    assert_eq!(failing.calls(), 1);
    assert_eq!(working.calls(), 1);
}

#[tokio::test]
async fn test_no_applicable_strategy_fails() {
    let registry = StrategyRegistry::new()
        .with(Arc::new(ScriptedStrategy::new("a", 1, Behavior::Succeed).not_handling()))
        .with(Arc::new(ScriptedStrategy::new("b", 2, Behavior::Succeed).not_handling()));
    let (executor, _) = build_executor(&test_config(), registry);
    let ctx = context();

    let execution = executor
        .execute_remediation(&analysis(&ctx), plan(), &ctx)
        .await
        .unwrap();

    assert_eq!(execution.status, RemediationStatus::Failed);
    assert!(execution.actions.is_empty());
    assert_eq!(execution.error.as_deref(), Some(NO_SUCCESSFUL_STRATEGY));
    assert_eq!(NO_SUCCESSFUL_STRATEGY, "no successful remediation strategy found.");
}

#[tokio::test]
async fn test_empty_plan_fails_with_validator_message_and_is_persisted() {
    let strategy = Arc::new(ScriptedStrategy::new("a", 1, Behavior::Succeed));
    let (executor, tracker) = build_executor(&test_config(), StrategyRegistry::new().with(strategy.clone()));
    let ctx = context();

    let execution = executor
        .execute_remediation(&analysis(&ctx), RemediationPlan::new("nothing"), &ctx)
        .await
        .unwrap();

    assert_eq!(execution.status, RemediationStatus::Failed);
    assert_eq!(
        execution.error.as_deref(),
        Some("Remediation plan has no steps or strategies.")
    );
    assert_eq!(strategy.calls(), 0);

    let stored = tracker.get_execution(&execution.execution_id).await.unwrap().unwrap();
    assert_eq!(stored.status, RemediationStatus::Failed);
}

#[tokio::test]
async fn test_panicking_strategy_is_recorded_not_fatal() {
    let registry = StrategyRegistry::new()
        .with(Arc::new(ScriptedStrategy::new("explodes", 10, Behavior::Panic)))
        .with(Arc::new(ScriptedStrategy::new("steady", 1, Behavior::Succeed)));
    let (executor, _) = build_executor(&test_config(), registry);
    let ctx = context();

    let execution = executor
        .execute_remediation(&analysis(&ctx), plan(), &ctx)
        .await
        .unwrap();

    assert_eq!(execution.status, RemediationStatus::Completed);
    let error = execution.actions[0].error.as_deref().unwrap();
    assert!(error.contains("panicked"));
    assert!(error.contains("exploded"));
}

#[tokio::test]
async fn test_strategy_timeout_is_a_failure() {
    let registry = StrategyRegistry::new().with(Arc::new(ScriptedStrategy::new(
        "slow",
        1,
        Behavior::Sleep(Duration::from_secs(5)),
    )));
    let (executor, _) = build_executor(&test_config(), registry);
    let ctx = context();

    let execution = executor
        .execute_remediation(&analysis(&ctx), plan(), &ctx)
        .await
        .unwrap();

    assert_eq!(execution.status, RemediationStatus::Failed);
    assert!(execution.error.as_deref().unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_try_all_policy_reports_partial() {
    let mut config = test_config();
    config.remediation.strategy_policy = StrategyPolicy::TryAll;
    let registry = StrategyRegistry::new()
        .with(Arc::new(ScriptedStrategy::new("ok", 10, Behavior::Succeed)))
        .with(Arc::new(ScriptedStrategy::new("bad", 5, Behavior::Report("nope".into()))));
    let (executor, _) = build_executor(&config, registry);
    let ctx = context();

    let execution = executor
        .execute_remediation(&analysis(&ctx), plan(), &ctx)
        .await
        .unwrap();

    assert_eq!(execution.status, RemediationStatus::Partial);
    assert_eq!(execution.actions.len(), 2);
    assert!(execution.validation.is_some());
}

#[tokio::test]
async fn test_try_all_policy_all_succeed_completes() {
    let mut config = test_config();
    config.remediation.strategy_policy = StrategyPolicy::TryAll;
    let registry = StrategyRegistry::new()
        .with(Arc::new(ScriptedStrategy::new("a", 10, Behavior::Succeed)))
        .with(Arc::new(ScriptedStrategy::new("b", 5, Behavior::Succeed)));
    let (executor, _) = build_executor(&config, registry);
    let ctx = context();

    let execution = executor
        .execute_remediation(&analysis(&ctx), plan(), &ctx)
        .await
        .unwrap();
    assert_eq!(execution.status, RemediationStatus::Completed);
    assert_eq!(execution.actions.len(), 2);
}

#[tokio::test]
async fn test_below_severity_threshold_is_skipped() {
    let mut config = test_config();
    config.remediation.min_severity_for_auto_remediation = ErrorSeverity::Critical;
    let strategy = Arc::new(ScriptedStrategy::new("a", 1, Behavior::Succeed));
    let (executor, _) = build_executor(&config, StrategyRegistry::new().with(strategy.clone()));
    let ctx = context();

    let execution = executor
        .execute_remediation(&analysis(&ctx), plan(), &ctx)
        .await
        .unwrap();
    assert_eq!(execution.status, RemediationStatus::Skipped);
    assert_eq!(strategy.calls(), 0);
}

#[tokio::test]
async fn test_disallowed_strategy_is_skipped() {
    let registry = StrategyRegistry::new()
        .with(Arc::new(
            ScriptedStrategy::new("wipe", 10, Behavior::Succeed).with_descriptor("format_disk:target=/"),
        ))
        .with(Arc::new(ScriptedStrategy::new("restart", 1, Behavior::Succeed)));
    let (executor, _) = build_executor(&test_config(), registry);
    let ctx = context();

    let execution = executor
        .execute_remediation(&analysis(&ctx), plan(), &ctx)
        .await
        .unwrap();
    assert_eq!(execution.status, RemediationStatus::Completed);
    assert_eq!(execution.actions.len(), 1);
    assert_eq!(execution.actions[0].strategy, "restart");
}

#[tokio::test]
async fn test_cancellation_between_strategies() {
    let slow = Arc::new(ScriptedStrategy::new(
        "slow",
        10,
        Behavior::Sleep(Duration::from_millis(300)),
    ));
    let next = Arc::new(ScriptedStrategy::new("next", 1, Behavior::Succeed));
    let registry = StrategyRegistry::new().with(slow).with(next.clone());
    let (executor, tracker) = build_executor(&test_config(), registry);
    let executor = Arc::new(executor);

    let ctx = context();
    let task = {
        let executor = executor.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let analysis = analysis(&ctx);
            executor.execute_remediation(&analysis, plan(), &ctx).await
        })
    };

    let mut running = Vec::new();
    for _ in 0..100 {
        running = executor.running_executions();
        if !running.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(running.len(), 1);
    assert_eq!(
        executor.get_remediation_status(&running[0]).await.unwrap(),
        Some(RemediationStatus::Running)
    );
    assert!(executor.cancel_remediation(&running[0]).await.unwrap());

    let execution = task.await.unwrap().unwrap();
    assert_eq!(execution.status, RemediationStatus::Cancelled);
    assert_eq!(execution.actions.len(), 1);
    assert_eq!(next.calls(), 0);

    let stored = tracker.get_execution(&execution.execution_id).await.unwrap().unwrap();
    assert_eq!(stored.status, RemediationStatus::Cancelled);
    assert!(executor.running_executions().is_empty());
}

#[tokio::test]
async fn test_cancel_unknown_execution() {
    let (executor, _) = build_executor(&test_config(), StrategyRegistry::new());
    assert!(!executor.cancel_remediation("does-not-exist").await.unwrap());
}

#[tokio::test]
async fn test_status_history_and_metrics_delegate_to_tracker() {
    let registry =
        StrategyRegistry::new().with(Arc::new(ScriptedStrategy::new("restart", 1, Behavior::Succeed)));
    let (executor, _) = build_executor(&test_config(), registry);
    let ctx = context();

    let execution = executor
        .execute_remediation(&analysis(&ctx), plan(), &ctx)
        .await
        .unwrap();
    let id = &execution.execution_id;

    assert_eq!(
        executor.get_remediation_status(id).await.unwrap(),
        Some(RemediationStatus::Completed)
    );

    let now = chrono::Utc::now();
    let history = executor
        .get_execution_history("checkout", now - chrono::Duration::minutes(5), now)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(&history[0].execution_id, id);

    let metrics = executor.get_execution_metrics(id).await.unwrap().unwrap();
    assert_eq!(&metrics.execution_id, id);
    assert_eq!(metrics.snapshot["service"], "checkout");
    assert!(metrics.strategy_metrics.contains_key("restart.duration_ms"));
    assert_eq!(metrics.resource_usage.memory_bytes_delta, 0);

    let validation = execution.validation.unwrap();
    assert_eq!(validation.outcome, ValidationOutcome::FullySuccessful);
    assert!(validation.success);
}

struct UnhealthyProbe;

#[async_trait::async_trait]
impl faultmend::remediation::OutcomeProbe for UnhealthyProbe {
    async fn error_resolved(
        &self,
        _context: &faultmend::ErrorContext,
        execution: &faultmend::remediation::RemediationExecution,
    ) -> bool {
        execution.any_action_succeeded()
    }

    async fn system_healthy(&self, _context: &faultmend::ErrorContext) -> bool {
        false
    }
}

#[tokio::test]
async fn test_failed_post_validation_collects_rollback_plans() {
    let config = test_config();
    let rollback = RemediationPlan::new("undo restart").with_strategy("rollback:target=checkout-api");
    let registry = StrategyRegistry::new().with(Arc::new(
        ScriptedStrategy::new("restart", 1, Behavior::Succeed).with_rollback(rollback.clone()),
    ));
    let (executor, _) = build_executor(&config, registry);
    let validator = RemediationValidator::new(config.remediation.clone(), config.metrics.clone())
        .with_probe(Arc::new(UnhealthyProbe));
    let executor = executor.with_validator(Arc::new(validator));
    let ctx = context();

    let execution = executor
        .execute_remediation(&analysis(&ctx), plan(), &ctx)
        .await
        .unwrap();

    assert_eq!(execution.status, RemediationStatus::Completed);
    let validation = execution.validation.as_ref().unwrap();
    assert_eq!(validation.outcome, ValidationOutcome::ResolvedButUnhealthy);
    assert!(!validation.success);
    assert_eq!(execution.rollback_plans.len(), 1);
    assert_eq!(execution.rollback_plans[0].id, rollback.id);
}

#[tokio::test]
async fn test_initial_persistence_failure_is_recorded_on_execution() {
    let registry =
        StrategyRegistry::new().with(Arc::new(ScriptedStrategy::new("restart", 1, Behavior::Succeed)));
    let (executor, tracker) =
        build_executor_with_store(&test_config(), registry, Arc::new(FirstWriteFailsStore::new()));
    let ctx = context();

    let execution = executor
        .execute_remediation(&analysis(&ctx), plan(), &ctx)
        .await
        .unwrap();
    assert_eq!(execution.status, RemediationStatus::Completed);
    assert_eq!(execution.tracking_errors.len(), 1);
    assert!(execution.tracking_errors[0].starts_with("initial record"));
    assert!(execution.tracking_errors[0].contains("connection reset"));

    let stored = tracker.get_execution(&execution.execution_id).await.unwrap().unwrap();
    assert_eq!(stored.tracking_errors, execution.tracking_errors);
}

#[tokio::test]
async fn test_final_persistence_failure_returns_execution() {
    let registry =
        StrategyRegistry::new().with(Arc::new(ScriptedStrategy::new("restart", 1, Behavior::Succeed)));
    let (executor, _) = build_executor_with_store(&test_config(), registry, Arc::new(FailingStore));
    let ctx = context();

    let err = executor
        .execute_remediation(&analysis(&ctx), plan(), &ctx)
        .await
        .unwrap_err();
    assert_eq!(err.execution.status, RemediationStatus::Completed);
    assert!(err.to_string().contains(&err.execution.execution_id));
    assert!(err.source.to_string().contains("disk full"));
}
