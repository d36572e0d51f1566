//! Faultmend - error analysis and automated remediation for distributed services
//!
//! An error context flows through the engine like this:
//!
//! - **Graph**: build a dependency graph around the failing component, then
//!   estimate how far the failure spreads and where it likely started
//! - **Patterns**: match the error against known per-service fingerprints
//! - **Analysis**: ask an external analysis service when no pattern matches
//! - **Remediation**: validate a plan, run pluggable strategies by priority,
//!   validate the outcome and track every execution with retention
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use faultmend::{Config, ErrorAnalyzer, ErrorContext};
//! use faultmend::remediation::{InMemoryExecutionStore, RemediationExecutor, RemediationTracker, StrategyRegistry};
//!
//! let config = Config::load(None)?;
//! let analyzer = ErrorAnalyzer::from_config(&config)?;
//! let context = ErrorContext::new("checkout", "Checkout", "TimeoutException", "upstream timed out");
//! let analysis = analyzer.analyze(&context).await;
//! let plan = analyzer.derive_plan(&analysis, &context);
//!
//! let tracker = Arc::new(RemediationTracker::new(Arc::new(InMemoryExecutionStore::new()), config.tracking.clone()));
//! let executor = RemediationExecutor::new(&config, StrategyRegistry::new(), tracker);
//! let execution = executor.execute_remediation(&analysis, plan, &context).await?;
//! ```

pub mod analysis;
pub mod cli;
pub mod clock;
pub mod config;
pub mod context;
pub mod errors;
pub mod graph;
pub mod llm;
pub mod observability;
pub mod patterns;
pub mod remediation;

use std::sync::atomic::{AtomicBool, Ordering};

pub use analysis::ErrorAnalyzer;
pub use config::Config;
pub use context::{ErrorAnalysis, ErrorContext, ErrorSeverity};
pub use errors::{FaultmendError, Result};

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Signal long-running work (cleanup and sampling loops, CLI commands) to stop.
pub fn request_shutdown() {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

pub fn is_shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}
