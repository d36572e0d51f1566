//! Shared fixtures: scripted strategies, stub samplers and stores.

use async_trait::async_trait;
use faultmend::config::Config;
use faultmend::context::{ErrorAnalysis, ErrorContext, ErrorSeverity};
use faultmend::errors::{ExecutionError, MetricsCollectionError, StoreError};
use faultmend::remediation::{
    ExecutionStore, InMemoryExecutionStore, RemediationExecutor, RemediationMetricsCollector,
    RemediationPlan, RemediationStrategy, RemediationTracker, ResourceSample, ResourceSampler,
    StrategyOutcome, StrategyRegistry,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub enum Behavior {
    Succeed,
    Report(String),
    Error(String),
    Panic,
    Sleep(Duration),
}

pub struct ScriptedStrategy {
    pub name: String,
    pub priority: i32,
    pub behavior: Behavior,
    pub handles: bool,
    pub descriptor: String,
    pub rollback: Option<RemediationPlan>,
    pub calls: AtomicU32,
}

impl ScriptedStrategy {
    pub fn new(name: &str, priority: i32, behavior: Behavior) -> Self {
        Self {
            name: name.to_string(),
            priority,
            behavior,
            handles: true,
            descriptor: "restart:target=checkout-api".to_string(),
            rollback: None,
            calls: AtomicU32::new(0),
        }
    }

    pub fn not_handling(mut self) -> Self {
        self.handles = false;
        self
    }

    pub fn with_descriptor(mut self, descriptor: &str) -> Self {
        self.descriptor = descriptor.to_string();
        self
    }

    pub fn with_rollback(mut self, plan: RemediationPlan) -> Self {
        self.rollback = Some(plan);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemediationStrategy for ScriptedStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn can_rollback(&self) -> bool {
        self.rollback.is_some()
    }

    fn descriptor(&self) -> String {
        self.descriptor.clone()
    }

    fn can_handle(&self, _analysis: &ErrorAnalysis) -> bool {
        self.handles
    }

    async fn execute(&self, _context: &ErrorContext) -> Result<StrategyOutcome, ExecutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Succeed => Ok(StrategyOutcome::success(format!("{} applied", self.name))),
            Behavior::Report(msg) => Ok(StrategyOutcome::failure(msg.clone())),
            Behavior::Error(msg) => Err(ExecutionError::Failed {
                strategy: self.name.clone(),
                message: msg.clone(),
            }),
            Behavior::Panic => panic!("strategy {} exploded", self.name),
            Behavior::Sleep(d) => {
                tokio::time::sleep(*d).await;
                Ok(StrategyOutcome::failure("slept"))
            }
        }
    }

    async fn rollback_plan(&self, _context: &ErrorContext) -> Option<RemediationPlan> {
        self.rollback.clone()
    }
}

/// Always reports the same resource usage.
pub struct StaticSampler;

impl ResourceSampler for StaticSampler {
    fn sample(&self) -> Result<ResourceSample, MetricsCollectionError> {
        Ok(ResourceSample {
            cpu_percent: 12.5,
            memory_bytes: 1 << 30,
            disk_bytes: 0,
            network_bytes: 0,
        })
    }
}

/// Store whose writes always fail.
pub struct FailingStore;

#[async_trait]
impl ExecutionStore for FailingStore {
    async fn set_with_ttl(&self, _: &str, _: &str, _: Duration) -> Result<(), StoreError> {
        Err(StoreError::Backend("disk full".to_string()))
    }
    async fn get(&self, _: &str) -> Result<Option<String>, StoreError> {
        Ok(None)
    }
    async fn delete(&self, _: &str) -> Result<bool, StoreError> {
        Ok(false)
    }
    async fn zadd(&self, _: &str, _: &str, _: f64) -> Result<(), StoreError> {
        Err(StoreError::Backend("disk full".to_string()))
    }
    async fn zrange_by_score(&self, _: &str, _: f64, _: f64) -> Result<Vec<String>, StoreError> {
        Ok(Vec::new())
    }
    async fn zrem_range_by_rank(&self, _: &str, _: isize, _: isize) -> Result<usize, StoreError> {
        Ok(0)
    }
    async fn zrem_range_by_score(&self, _: &str, _: f64, _: f64) -> Result<usize, StoreError> {
        Ok(0)
    }
    async fn zcard(&self, _: &str) -> Result<usize, StoreError> {
        Ok(0)
    }
}

/// In-memory store whose first record write fails.
pub struct FirstWriteFailsStore {
    inner: InMemoryExecutionStore,
    failed: std::sync::atomic::AtomicBool,
}

impl FirstWriteFailsStore {
    pub fn new() -> Self {
        Self {
            inner: InMemoryExecutionStore::new(),
            failed: std::sync::atomic::AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ExecutionStore for FirstWriteFailsStore {
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        if !self.failed.swap(true, Ordering::SeqCst) {
            return Err(StoreError::Backend("connection reset".to_string()));
        }
        self.inner.set_with_ttl(key, value, ttl).await
    }
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key).await
    }
    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.inner.delete(key).await
    }
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError> {
        self.inner.zadd(key, member, score).await
    }
    async fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> Result<Vec<String>, StoreError> {
        self.inner.zrange_by_score(key, min, max).await
    }
    async fn zrem_range_by_rank(&self, key: &str, start: isize, stop: isize) -> Result<usize, StoreError> {
        self.inner.zrem_range_by_rank(key, start, stop).await
    }
    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> Result<usize, StoreError> {
        self.inner.zrem_range_by_score(key, min, max).await
    }
    async fn zcard(&self, key: &str) -> Result<usize, StoreError> {
        self.inner.zcard(key).await
    }
}

/// Fast test config: no retries, minimal backoff.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.remediation.max_retry_attempts = 0;
    config.remediation.retry_backoff_ms = 1;
    config.remediation.strategy_timeout_secs = 1;
    config
}

pub fn context() -> ErrorContext {
    ErrorContext::new("checkout", "Checkout", "TimeoutException", "upstream timed out")
        .with_component("checkout-api")
        .with_severity(ErrorSeverity::High)
}

pub fn analysis(ctx: &ErrorContext) -> ErrorAnalysis {
    ErrorAnalysis::for_context(ctx)
}

pub fn plan() -> RemediationPlan {
    RemediationPlan::new("restart checkout").with_strategy("restart:target=checkout-api")
}

pub fn build_executor(
    config: &Config,
    registry: StrategyRegistry,
) -> (RemediationExecutor, Arc<RemediationTracker>) {
    build_executor_with_store(config, registry, Arc::new(InMemoryExecutionStore::new()))
}

pub fn build_executor_with_store(
    config: &Config,
    registry: StrategyRegistry,
    store: Arc<dyn ExecutionStore>,
) -> (RemediationExecutor, Arc<RemediationTracker>) {
    let tracker = Arc::new(RemediationTracker::new(store, config.tracking.clone()));
    let metrics = Arc::new(
        RemediationMetricsCollector::new(config.metrics.clone()).with_sampler(Arc::new(StaticSampler)),
    );
    let executor = RemediationExecutor::new(config, registry, tracker.clone())
        .with_metrics_collector(metrics);
    (executor, tracker)
}
