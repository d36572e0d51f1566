//! Pluggable remediation strategies
//!
//! Concrete strategies are supplied by the embedding service and registered
//! with a [`StrategyRegistry`]. The executor asks the registry for the
//! strategies that can handle an analysis, highest priority first.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use super::plan::RemediationPlan;
use crate::context::{ErrorAnalysis, ErrorContext};
use crate::errors::ExecutionError;

/// Result reported by a strategy that ran to completion.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StrategyOutcome {
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub details: HashMap<String, String>,
}

impl StrategyOutcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            details: HashMap::new(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            details: HashMap::new(),
        }
    }

    pub fn with_detail(mut self, key: &str, value: &str) -> Self {
        self.details.insert(key.to_string(), value.to_string());
        self
    }
}

/// A unit of corrective action.
#[async_trait]
pub trait RemediationStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Higher runs first.
    fn priority(&self) -> i32;

    fn can_rollback(&self) -> bool {
        false
    }

    /// `type:key=value;...` descriptor checked against the strategy allow-list.
    fn descriptor(&self) -> String;

    /// Whether this strategy addresses the analysed error at all.
    fn can_handle(&self, analysis: &ErrorAnalysis) -> bool;

    /// Whether the strategy can run against the current system state.
    async fn can_apply(&self, _context: &ErrorContext) -> bool {
        true
    }

    async fn execute(&self, context: &ErrorContext) -> Result<StrategyOutcome, ExecutionError>;

    /// Plan that undoes this strategy's effects.
    async fn rollback_plan(&self, _context: &ErrorContext) -> Option<RemediationPlan> {
        None
    }
}

/// Registered strategies in insertion order.
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    strategies: Vec<Arc<dyn RemediationStrategy>>,
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("strategies", &self.names())
            .finish()
    }
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, strategy: Arc<dyn RemediationStrategy>) {
        self.strategies.push(strategy);
    }

    pub fn with(mut self, strategy: Arc<dyn RemediationStrategy>) -> Self {
        self.register(strategy);
        self
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.strategies.iter().map(|s| s.name().to_string()).collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn RemediationStrategy>> {
        self.strategies.iter().find(|s| s.name() == name).cloned()
    }

    /// Strategies that can handle `analysis`, by descending priority.
    /// Equal priorities keep registration order.
    pub fn candidates(&self, analysis: &ErrorAnalysis) -> Vec<Arc<dyn RemediationStrategy>> {
        let mut selected: Vec<Arc<dyn RemediationStrategy>> = self
            .strategies
            .iter()
            .filter(|s| s.can_handle(analysis))
            .cloned()
            .collect();
        // sort_by is stable
        selected.sort_by(|a, b| b.priority().cmp(&a.priority()));
        selected
    }
}
