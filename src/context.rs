//! Error context and analysis result types
//!
//! An [`ErrorContext`] is the snapshot of one error occurrence as reported
//! by a service. An [`ErrorAnalysis`] is what the engine concludes about it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::graph::{ImpactAnalysis, RootCauseAnalysis};
use crate::llm::ParseStatus;

/// Severity of an error occurrence.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl ErrorSeverity {
    /// Map a score to a severity. Out-of-range and NaN input is clamped.
    pub fn from_score(score: f64) -> Self {
        let score = clamp_unit(score);
        if score >= 0.8 {
            ErrorSeverity::Critical
        } else if score >= 0.5 {
            ErrorSeverity::High
        } else if score >= 0.2 {
            ErrorSeverity::Medium
        } else {
            ErrorSeverity::Low
        }
    }

    pub fn as_score(&self) -> f64 {
        match self {
            ErrorSeverity::Low => 0.1,
            ErrorSeverity::Medium => 0.35,
            ErrorSeverity::High => 0.65,
            ErrorSeverity::Critical => 0.9,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Some(ErrorSeverity::Low),
            "medium" | "moderate" => Some(ErrorSeverity::Medium),
            "high" => Some(ErrorSeverity::High),
            "critical" => Some(ErrorSeverity::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorSeverity::Low => write!(f, "low"),
            ErrorSeverity::Medium => write!(f, "medium"),
            ErrorSeverity::High => write!(f, "high"),
            ErrorSeverity::Critical => write!(f, "critical"),
        }
    }
}

/// Clamp a score to [0, 1], mapping NaN to 0.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Deserialize a score and clamp it to [0, 1].
pub fn deserialize_unit<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    Ok(clamp_unit(value))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HintDirection {
    /// The failing component depends on this one
    Upstream,
    /// This component depends on the failing one
    Downstream,
}

/// A dependency reported alongside an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyHint {
    pub component_id: String,
    #[serde(default)]
    pub component_type: Option<String>,
    #[serde(default)]
    pub relationship: Option<String>,
    #[serde(default = "default_weight")]
    pub weight: f64,
    pub direction: HintDirection,
    #[serde(default)]
    pub error_probability: Option<f64>,
}

fn default_weight() -> f64 {
    0.5
}

/// Structured snapshot of an error occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorContext {
    #[serde(default = "new_id")]
    pub error_id: String,
    #[serde(default = "new_id")]
    pub correlation_id: String,
    pub error_type: String,
    pub message: String,
    #[serde(default)]
    pub stack_trace: Option<String>,
    pub service_name: String,
    pub operation_name: String,
    /// Component that raised the error. Missing ids yield a single-node graph.
    #[serde(default)]
    pub component_id: Option<String>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub severity: ErrorSeverity,
    #[serde(default)]
    pub additional_context: HashMap<String, String>,
    #[serde(default)]
    pub dependencies: Vec<DependencyHint>,
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl ErrorContext {
    pub fn new(
        service_name: impl Into<String>,
        operation_name: impl Into<String>,
        error_type: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error_id: new_id(),
            correlation_id: new_id(),
            error_type: error_type.into(),
            message: message.into(),
            stack_trace: None,
            service_name: service_name.into(),
            operation_name: operation_name.into(),
            component_id: None,
            timestamp: Utc::now(),
            severity: ErrorSeverity::default(),
            additional_context: HashMap::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn with_component(mut self, component_id: impl Into<String>) -> Self {
        self.component_id = Some(component_id.into());
        self
    }

    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.additional_context.insert(key.into(), value.into());
        self
    }

    pub fn with_stack_trace(mut self, trace: impl Into<String>) -> Self {
        self.stack_trace = Some(trace.into());
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = id.into();
        self
    }

    pub fn with_dependency(mut self, hint: DependencyHint) -> Self {
        self.dependencies.push(hint);
        self
    }
}

/// The engine's conclusion about one error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorAnalysis {
    pub error_id: String,
    pub correlation_id: String,
    pub error_type: String,
    pub service_name: String,
    pub explanation: String,
    pub root_causes: Vec<String>,
    pub remediation_steps: Vec<String>,
    pub prevention_strategies: Vec<String>,
    #[serde(deserialize_with = "deserialize_unit")]
    confidence: f64,
    pub severity: ErrorSeverity,
    /// Id of the known pattern this analysis was derived from
    pub matched_pattern: Option<String>,
    /// Strategy names carried by the matched pattern
    #[serde(default)]
    pub pattern_strategies: Vec<String>,
    pub parse_status: ParseStatus,
    pub impact: Option<ImpactAnalysis>,
    pub root_cause: Option<RootCauseAnalysis>,
    pub analyzed_at: DateTime<Utc>,
}

impl ErrorAnalysis {
    /// Empty analysis for `context`; fields are filled in by the analyzer.
    pub fn for_context(context: &ErrorContext) -> Self {
        Self {
            error_id: context.error_id.clone(),
            correlation_id: context.correlation_id.clone(),
            error_type: context.error_type.clone(),
            service_name: context.service_name.clone(),
            explanation: String::new(),
            root_causes: Vec::new(),
            remediation_steps: Vec::new(),
            prevention_strategies: Vec::new(),
            confidence: 0.0,
            severity: context.severity,
            matched_pattern: None,
            pattern_strategies: Vec::new(),
            parse_status: ParseStatus::Unparsed,
            impact: None,
            root_cause: None,
            analyzed_at: Utc::now(),
        }
    }

    /// Minimal result used when the analysis service is unavailable.
    pub fn fallback(context: &ErrorContext, reason: &str) -> Self {
        let mut analysis = Self::for_context(context);
        analysis.explanation = format!(
            "Automated analysis unavailable ({}). {}: {}",
            reason, context.error_type, context.message
        );
        analysis.parse_status = ParseStatus::Fallback;
        analysis
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Set confidence, clamped to [0, 1].
    pub fn set_confidence(&mut self, confidence: f64) {
        self.confidence = clamp_unit(confidence);
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.set_confidence(confidence);
        self
    }

    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }
}
