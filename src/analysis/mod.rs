//! Error analysis pipeline
//!
//! [`ErrorAnalyzer`] turns an [`ErrorContext`] into an [`ErrorAnalysis`]:
//!
//! 1. Build the dependency graph and run impact and root-cause analysis.
//! 2. Look for a known pattern for the service. A hit is counted and
//!    answered from the pattern without calling the analysis service.
//! 3. On a miss, ask the analysis service and parse its answer. Confident
//!    answers become new patterns.
//!
//! Analysis never fails outright: when the service is unreachable or
//! unconfigured the result is a fallback analysis with zero confidence.
//! [`ErrorAnalyzer::derive_plan`] then maps the analysis to a
//! [`RemediationPlan`] the executor can validate.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::context::{ErrorAnalysis, ErrorContext};
use crate::errors::{AnalysisError, FaultmendError};
use crate::graph::GraphAnalyzer;
use crate::llm::{
    build_analysis_prompt, parse_analysis, HttpLlmClient, LlmClient, ParseStatus, ParsedAnalysis,
    SYSTEM_PROMPT,
};
use crate::patterns::{ErrorPattern, HttpPatternClient, PatternRecognition};
use crate::remediation::plan::{ActionDescriptor, RemediationPlan, RemediationStep};

/// Names the plan targets a step at.
struct PlanTargets<'a> {
    /// Component the error surfaced in
    component: &'a str,
    /// Likely origin, from root-cause analysis
    root_cause: &'a str,
    operation: &'a str,
    service: &'a str,
}

/// Keyword rule mapping remediation prose to an action.
struct ActionRule {
    action: &'static str,
    keywords: &'static [&'static str],
    build: fn(&PlanTargets<'_>) -> ActionDescriptor,
}

/// First matching rule wins.
fn action_rules() -> Vec<ActionRule> {
    vec![
        ActionRule {
            action: "circuit_breaker",
            keywords: &["circuit breaker", "circuit-breaker", "circuit_breaker"],
            build: |t| ActionDescriptor::new("circuit_breaker").with_param("target", t.root_cause),
        },
        ActionRule {
            action: "rollback",
            keywords: &["rollback", "roll back", "revert"],
            build: |t| ActionDescriptor::new("rollback").with_param("target", t.component),
        },
        ActionRule {
            action: "restart",
            keywords: &["restart", "reboot", "recycle"],
            build: |t| ActionDescriptor::new("restart").with_param("target", t.component),
        },
        ActionRule {
            action: "scale",
            keywords: &["scale", "replica", "capacity"],
            build: |t| {
                ActionDescriptor::new("scale")
                    .with_param("target", t.component)
                    .with_param("replicas", "2")
            },
        },
        ActionRule {
            action: "clear_cache",
            keywords: &["cache"],
            build: |t| ActionDescriptor::new("clear_cache").with_param("scope", t.service),
        },
        ActionRule {
            action: "retry",
            keywords: &["retry", "retries", "backoff"],
            build: |t| ActionDescriptor::new("retry").with_param("operation", t.operation),
        },
    ]
}

/// Map one remediation step description to an action descriptor.
fn action_for_step(step: &str, targets: &PlanTargets<'_>) -> ActionDescriptor {
    let lowered = step.to_lowercase();
    action_rules()
        .iter()
        .find(|rule| rule.keywords.iter().any(|k| lowered.contains(k)))
        .map(|rule| (rule.build)(targets))
        .unwrap_or_else(|| {
            ActionDescriptor::new("investigate").with_param("component", targets.component)
        })
}

/// Pattern strategies are full descriptors or bare action names. A bare
/// name gets the parameters its keyword rule would give it.
fn strategy_descriptor(name: &str, targets: &PlanTargets<'_>) -> String {
    let name = name.trim();
    if name.contains(':') {
        return name.to_string();
    }
    action_rules()
        .iter()
        .find(|rule| rule.action == name)
        .map(|rule| (rule.build)(targets).to_string())
        .unwrap_or_else(|| format!("{}:target={}", name, targets.component))
}

pub struct ErrorAnalyzer {
    graph: GraphAnalyzer,
    patterns: Arc<PatternRecognition>,
    llm: Option<Arc<dyn LlmClient>>,
}

impl ErrorAnalyzer {
    pub fn new(graph: GraphAnalyzer, patterns: Arc<PatternRecognition>) -> Self {
        Self {
            graph,
            patterns,
            llm: None,
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Wire HTTP clients from configuration. The pattern service is optional.
    pub fn from_config(config: &Config) -> Result<Self, FaultmendError> {
        let mut patterns = PatternRecognition::new(config.patterns.clone());
        if config.patterns.service_url.is_some() {
            let client = HttpPatternClient::from_config(&config.patterns)?;
            patterns = patterns.with_client(Arc::new(client));
        }
        let llm = HttpLlmClient::new(&config.llm)?;
        Ok(Self::new(GraphAnalyzer::new(config.graph.clone()), Arc::new(patterns))
            .with_llm(Arc::new(llm)))
    }

    pub fn patterns(&self) -> &Arc<PatternRecognition> {
        &self.patterns
    }

    pub fn graph(&self) -> &GraphAnalyzer {
        &self.graph
    }

    /// Ask the analysis service about `context` and parse the answer.
    pub async fn analyze_with_llm(
        &self,
        context: &ErrorContext,
    ) -> Result<ParsedAnalysis, AnalysisError> {
        let llm = self
            .llm
            .as_ref()
            .ok_or_else(|| AnalysisError::Request("no analysis service configured".to_string()))?;
        let prompt = build_analysis_prompt(context);
        let response = llm.complete(SYSTEM_PROMPT, &prompt).await?;
        let parsed = parse_analysis(&response);
        debug!(status = ?parsed.status, "Parsed analysis response");
        Ok(parsed)
    }

    #[instrument(skip(self, context), fields(service = %context.service_name, error_type = %context.error_type))]
    pub async fn analyze(&self, context: &ErrorContext) -> ErrorAnalysis {
        let mut analysis = ErrorAnalysis::for_context(context);

        match self.graph.analyze(context) {
            Ok((_, impact, root_cause)) => {
                analysis.severity = analysis.severity.max(impact.severity);
                analysis.impact = Some(impact);
                analysis.root_cause = Some(root_cause);
            }
            Err(e) => warn!(error = %e, "Graph analysis failed"),
        }

        if let Some(pattern) = self
            .patterns
            .find_matching_pattern(context, &context.service_name)
            .await
        {
            let pattern = self
                .patterns
                .record_occurrence(&context.service_name, &pattern.id)
                .await
                .unwrap_or(pattern);
            info!(pattern_id = %pattern.id, occurrences = pattern.occurrence_count, "Matched known pattern");
            Self::apply_pattern(&mut analysis, &pattern);
            return analysis;
        }

        match self.analyze_with_llm(context).await {
            Ok(parsed) => {
                Self::apply_parsed(&mut analysis, parsed);
                self.learn(context, &analysis).await;
                self.publish(&analysis).await;
            }
            Err(e) => {
                warn!(error = %e, "Analysis service unavailable, using fallback");
                let mut fallback = ErrorAnalysis::fallback(context, &e.to_string());
                fallback.severity = analysis.severity;
                fallback.impact = analysis.impact.take();
                fallback.root_cause = analysis.root_cause.take();
                analysis = fallback;
            }
        }
        analysis
    }

    fn apply_pattern(analysis: &mut ErrorAnalysis, pattern: &ErrorPattern) {
        analysis.explanation = format!(
            "Matches known pattern {} for {} in {} (seen {} times)",
            pattern.id, pattern.error_type, pattern.operation_name, pattern.occurrence_count
        );
        analysis.remediation_steps = pattern
            .remediation_strategies
            .iter()
            .map(|s| format!("Apply strategy {}", s))
            .collect();
        analysis.pattern_strategies = pattern.remediation_strategies.clone();
        analysis.matched_pattern = Some(pattern.id.clone());
        analysis.set_confidence(pattern.confidence);
        analysis.parse_status = ParseStatus::Complete;
    }

    fn apply_parsed(analysis: &mut ErrorAnalysis, parsed: ParsedAnalysis) {
        analysis.explanation = parsed.explanation;
        analysis.root_causes = parsed.root_causes;
        analysis.remediation_steps = parsed.remediation_steps;
        analysis.prevention_strategies = parsed.prevention_strategies;
        analysis.set_confidence(parsed.confidence.unwrap_or(0.0));
        analysis.parse_status = parsed.status;
    }

    /// Record a confident new analysis as a pattern.
    async fn learn(&self, context: &ErrorContext, analysis: &ErrorAnalysis) {
        let plan = self.derive_plan(analysis, context);
        // Stored with parameters, one per action type
        let mut seen: Vec<String> = Vec::new();
        let mut strategies: Vec<String> = Vec::new();
        for step in &plan.steps {
            if let Ok(descriptor) = step.descriptor() {
                if descriptor.action_type != "investigate" && !seen.contains(&descriptor.action_type)
                {
                    strategies.push(descriptor.to_string());
                    seen.push(descriptor.action_type);
                }
            }
        }
        self.patterns
            .create_pattern_from_analysis(context, analysis, strategies)
            .await;
    }

    async fn publish(&self, analysis: &ErrorAnalysis) {
        let Some(client) = self.patterns.client() else {
            return;
        };
        if let Err(e) = client.publish(analysis).await {
            warn!(error = %e, "Failed to publish analysis");
        }
    }

    /// Map an analysis to a plan.
    ///
    /// Each remediation step becomes one step whose action is chosen by
    /// keyword; text that names no known action becomes `investigate`.
    /// Strategies carried by a matched pattern are copied over.
    pub fn derive_plan(&self, analysis: &ErrorAnalysis, context: &ErrorContext) -> RemediationPlan {
        let component = GraphAnalyzer::error_node_id(context);
        let root_cause = analysis
            .root_cause
            .as_ref()
            .map(|r| r.primary.id.clone())
            .unwrap_or_else(|| component.clone());
        let targets = PlanTargets {
            component: &component,
            root_cause: &root_cause,
            operation: &context.operation_name,
            service: &context.service_name,
        };

        let mut plan = RemediationPlan::new(analysis.explanation.clone())
            .for_error_types(&[context.error_type.as_str()]);

        // Pattern-derived steps only restate the strategies
        if analysis.matched_pattern.is_none() {
            for text in &analysis.remediation_steps {
                let descriptor = action_for_step(text, &targets);
                plan = plan.with_step(RemediationStep::new(text.clone(), descriptor.to_string()));
            }
        }
        for name in &analysis.pattern_strategies {
            plan = plan.with_strategy(strategy_descriptor(name, &targets));
        }
        plan
    }
}

/// Time budget for one full analysis, service call included.
pub fn analysis_budget(config: &Config) -> Duration {
    Duration::from_secs(config.llm.timeout_secs + config.patterns.request_timeout_secs)
}
