//! Remediation planning, validation, execution and tracking.

pub mod execution;
pub mod executor;
pub mod metrics;
pub mod periodic;
pub mod plan;
pub mod store;
pub mod strategy;
pub mod tracker;
pub mod validator;

pub use execution::{ExecutedAction, RemediationExecution, RemediationStatus};
pub use executor::{RemediationExecutor, NO_SUCCESSFUL_STRATEGY};
pub use metrics::{
    linear_trend, MetricPoint, RemediationMetrics, RemediationMetricsCollector, ResourceDelta,
    ResourceSample, ResourceSampler, SysinfoSampler,
};
pub use periodic::PeriodicTask;
pub use plan::{ActionDescriptor, RemediationPlan, RemediationStep};
#[cfg(feature = "redis-store")]
pub use store::RedisExecutionStore;
pub use store::{ExecutionStore, InMemoryExecutionStore};
pub use strategy::{RemediationStrategy, StrategyOutcome, StrategyRegistry};
pub use tracker::{
    CleanupHandle, CleanupReport, IndexScope, RemediationStatistics, RemediationTracker,
};
pub use validator::{
    ActionOutcomeProbe, DependencyCheck, ErrorTypeCheck, OutcomeProbe, PlanCheck,
    RemediationValidation, RemediationValidator, SeverityCheck, ValidationOutcome,
};
