//! Graph analysis over error contexts
//!
//! ```text
//!  ErrorContext ──► build_graph ──► DependencyGraph
//!                                        │
//!                   ┌────────────────────┼────────────────────┐
//!                   ▼                    ▼                    ▼
//!            analyze_impact      analyze_root_cause      shortest_path
//!          (outgoing edges)      (incoming edges)      (outgoing edges)
//! ```
//!
//! Impact scores are a heuristic: a signal starts at the error node's
//! probability and is multiplied by edge weight and a per-hop decay as it
//! spreads. Scores accumulate per node and are capped at 1. They are
//! rankings, not probabilities.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

use super::dependency::{DependencyGraph, GraphEdge, GraphNode, NodeType, RelationshipKind};
use crate::config::GraphConfig;
use crate::context::{ErrorContext, ErrorSeverity, HintDirection};
use crate::errors::GraphError;

/// How far an error is expected to spread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImpactScope {
    Isolated,
    Limited,
    Extensive,
    Systemic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffectedNode {
    pub id: String,
    pub score: f64,
    /// Hop count at which the node was first reached
    pub depth: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactAnalysis {
    pub source_node: String,
    /// Affected nodes, highest score first
    pub affected: Vec<AffectedNode>,
    pub blast_radius: usize,
    pub max_impact: f64,
    pub severity: ErrorSeverity,
    pub scope: ImpactScope,
    pub cycles: Vec<Vec<String>>,
    /// Chains of critical relationships starting at the source node
    pub critical_paths: Vec<Vec<String>>,
}

impl ImpactAnalysis {
    pub fn affected_ids(&self) -> Vec<String> {
        self.affected.iter().map(|a| a.id.clone()).collect()
    }

    pub fn score_of(&self, id: &str) -> Option<f64> {
        self.affected.iter().find(|a| a.id == id).map(|a| a.score)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootCauseCandidate {
    pub id: String,
    pub score: f64,
    pub depth: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootCauseAnalysis {
    pub error_node: String,
    pub primary: RootCauseCandidate,
    /// Remaining ancestors, best first
    pub alternatives: Vec<RootCauseCandidate>,
    /// Path from the primary root cause to the error node
    pub path: Vec<String>,
}

/// Builds graphs from error contexts and runs impact/root-cause analysis.
#[derive(Debug, Clone)]
pub struct GraphAnalyzer {
    config: GraphConfig,
}

impl Default for GraphAnalyzer {
    fn default() -> Self {
        Self::new(GraphConfig::default())
    }
}

impl GraphAnalyzer {
    pub fn new(config: GraphConfig) -> Self {
        Self { config }
    }

    /// Id of the node an error context maps to.
    pub fn error_node_id(context: &ErrorContext) -> String {
        match context.component_id.as_deref() {
            Some(id) if !id.trim().is_empty() => id.to_string(),
            _ => {
                if context.service_name.trim().is_empty() {
                    "unknown".to_string()
                } else {
                    context.service_name.clone()
                }
            }
        }
    }

    /// Build the dependency graph for one error.
    ///
    /// Without a component id the result is a single node marked as the
    /// error source; reported dependencies are ignored.
    pub fn build_graph(&self, context: &ErrorContext) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        let error_id = Self::error_node_id(context);
        let p = context.severity.as_score();

        graph.ensure_node(
            GraphNode::new(&error_id, NodeType::Service)
                .with_error_probability(p)
                .with_health_score(1.0 - p)
                .with_meta("service", &context.service_name)
                .with_meta("operation", &context.operation_name)
                .as_error_source(),
        );

        let has_component =
            matches!(context.component_id.as_deref(), Some(id) if !id.trim().is_empty());
        if !has_component {
            debug!(
                service = %context.service_name,
                "Error context has no component id, using single-node graph"
            );
            return graph;
        }

        for hint in &context.dependencies {
            if hint.component_id == error_id || hint.component_id.trim().is_empty() {
                continue;
            }
            let node_type = hint
                .component_type
                .as_deref()
                .map(NodeType::parse)
                .unwrap_or_default();
            let probability = hint.error_probability.unwrap_or(0.0);
            graph.ensure_node(
                GraphNode::new(&hint.component_id, node_type)
                    .with_error_probability(probability)
                    .with_health_score(1.0 - probability),
            );

            let kind = hint
                .relationship
                .as_deref()
                .map(RelationshipKind::parse)
                .unwrap_or_default();
            let edge = match hint.direction {
                HintDirection::Upstream => GraphEdge::new(&hint.component_id, &error_id),
                HintDirection::Downstream => GraphEdge::new(&error_id, &hint.component_id),
            }
            .with_kind(kind)
            .with_weight(hint.weight);

            // Both endpoints were inserted above.
            if let Err(e) = graph.add_edge(edge) {
                debug!(error = %e, "Skipping dependency edge");
            }
        }

        graph
    }

    /// Propagate impact outward from `start` along outgoing edges.
    pub fn analyze_impact(
        &self,
        graph: &DependencyGraph,
        start: &str,
    ) -> Result<ImpactAnalysis, GraphError> {
        let source = graph
            .get_node(start)
            .ok_or_else(|| GraphError::NodeNotFound {
                id: start.to_string(),
            })?;

        let epsilon = self.config.impact_epsilon;
        let decay = self.config.depth_decay;

        let mut scores: HashMap<String, f64> = HashMap::new();
        let mut first_depth: HashMap<String, usize> = HashMap::new();
        let mut frontier: HashMap<String, f64> = HashMap::new();
        frontier.insert(start.to_string(), source.error_probability());

        let mut depth = 0;
        while !frontier.is_empty() && depth < self.config.max_depth {
            depth += 1;
            let mut next: HashMap<String, f64> = HashMap::new();
            for (node_id, signal) in &frontier {
                for edge in graph.outgoing_edges(node_id) {
                    if edge.target == start {
                        continue;
                    }
                    let propagated = signal * edge.weight() * decay;
                    if propagated <= epsilon {
                        continue;
                    }
                    *next.entry(edge.target.clone()).or_insert(0.0) += propagated;
                }
            }
            for (node_id, signal) in &next {
                let entry = scores.entry(node_id.clone()).or_insert(0.0);
                *entry = (*entry + signal).min(1.0);
                first_depth.entry(node_id.clone()).or_insert(depth);
            }
            frontier = next;
        }

        let mut affected: Vec<AffectedNode> = scores
            .into_iter()
            .filter(|(_, score)| *score > epsilon)
            .map(|(id, score)| {
                let depth = first_depth.get(&id).copied().unwrap_or(0);
                AffectedNode { id, score, depth }
            })
            .collect();
        affected.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.depth.cmp(&b.depth))
                .then_with(|| a.id.cmp(&b.id))
        });

        let blast_radius = affected.len();
        let max_impact = affected.first().map(|a| a.score).unwrap_or(0.0);

        Ok(ImpactAnalysis {
            source_node: start.to_string(),
            blast_radius,
            max_impact,
            severity: Self::impact_severity(max_impact, blast_radius),
            scope: Self::impact_scope(blast_radius),
            cycles: graph.find_cycles(),
            critical_paths: self.critical_paths(graph, start),
            affected,
        })
    }

    fn impact_severity(max_impact: f64, blast_radius: usize) -> ErrorSeverity {
        if max_impact >= 0.8 || blast_radius >= 10 {
            ErrorSeverity::Critical
        } else if max_impact >= 0.5 || blast_radius >= 5 {
            ErrorSeverity::High
        } else if max_impact >= 0.2 || blast_radius >= 2 {
            ErrorSeverity::Medium
        } else {
            ErrorSeverity::Low
        }
    }

    fn impact_scope(blast_radius: usize) -> ImpactScope {
        match blast_radius {
            0 => ImpactScope::Isolated,
            1..=4 => ImpactScope::Limited,
            5..=9 => ImpactScope::Extensive,
            _ => ImpactScope::Systemic,
        }
    }

    /// Maximal chains of `Critical` edges leaving `start`.
    pub fn critical_paths(&self, graph: &DependencyGraph, start: &str) -> Vec<Vec<String>> {
        let mut paths = Vec::new();
        let mut path = vec![start.to_string()];
        let mut on_path: HashSet<String> = HashSet::from([start.to_string()]);
        self.walk_critical(graph, start, &mut path, &mut on_path, &mut paths);
        paths
    }

    fn walk_critical(
        &self,
        graph: &DependencyGraph,
        node: &str,
        path: &mut Vec<String>,
        on_path: &mut HashSet<String>,
        out: &mut Vec<Vec<String>>,
    ) {
        let next: Vec<&GraphEdge> = graph
            .outgoing_edges(node)
            .into_iter()
            .filter(|e| e.kind == RelationshipKind::Critical && !on_path.contains(&e.target))
            .collect();

        if next.is_empty() || path.len() > self.config.max_depth {
            if path.len() > 1 {
                out.push(path.clone());
            }
            return;
        }

        for edge in next {
            path.push(edge.target.clone());
            on_path.insert(edge.target.clone());
            self.walk_critical(graph, &edge.target, path, on_path, out);
            on_path.remove(&edge.target);
            path.pop();
        }
    }

    /// Walk incoming edges back from `error_node` and rank its ancestors.
    ///
    /// Each ancestor scores `edge weight × ancestor error probability` for
    /// the edge it was reached through, keeping its best score. With no
    /// ancestors the error node is its own root cause.
    pub fn analyze_root_cause(
        &self,
        graph: &DependencyGraph,
        error_node: &str,
    ) -> Result<RootCauseAnalysis, GraphError> {
        let node = graph
            .get_node(error_node)
            .ok_or_else(|| GraphError::NodeNotFound {
                id: error_node.to_string(),
            })?;

        let mut best: HashMap<String, RootCauseCandidate> = HashMap::new();
        let mut visited: HashSet<String> = HashSet::from([error_node.to_string()]);
        let mut frontier = vec![error_node.to_string()];
        let mut depth = 0;

        while !frontier.is_empty() && depth < self.config.max_depth {
            depth += 1;
            let mut next = Vec::new();
            for current in &frontier {
                for edge in graph.incoming_edges(current) {
                    let Some(ancestor) = graph.get_node(&edge.source) else {
                        continue;
                    };
                    if edge.source == error_node {
                        continue;
                    }
                    let score = edge.weight() * ancestor.error_probability();
                    let candidate = best
                        .entry(edge.source.clone())
                        .or_insert_with(|| RootCauseCandidate {
                            id: edge.source.clone(),
                            score,
                            depth,
                        });
                    if score > candidate.score {
                        candidate.score = score;
                    }
                    if visited.insert(edge.source.clone()) {
                        next.push(edge.source.clone());
                    }
                }
            }
            frontier = next;
        }

        let mut ranked: Vec<RootCauseCandidate> = best.into_values().collect();
        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.depth.cmp(&b.depth))
                .then_with(|| a.id.cmp(&b.id))
        });

        if ranked.is_empty() {
            return Ok(RootCauseAnalysis {
                error_node: error_node.to_string(),
                primary: RootCauseCandidate {
                    id: error_node.to_string(),
                    score: node.error_probability(),
                    depth: 0,
                },
                alternatives: Vec::new(),
                path: vec![error_node.to_string()],
            });
        }

        let primary = ranked.remove(0);
        let path = graph.get_path(&primary.id, error_node)?;

        Ok(RootCauseAnalysis {
            error_node: error_node.to_string(),
            primary,
            alternatives: ranked,
            path,
        })
    }

    pub fn shortest_path(
        &self,
        graph: &DependencyGraph,
        source: &str,
        target: &str,
    ) -> Result<Vec<String>, GraphError> {
        graph.get_path(source, target)
    }

    /// Build the graph for `context` and run both analyses on its error node.
    pub fn analyze(
        &self,
        context: &ErrorContext,
    ) -> Result<(DependencyGraph, ImpactAnalysis, RootCauseAnalysis), GraphError> {
        let graph = self.build_graph(context);
        let error_node = Self::error_node_id(context);
        let impact = self.analyze_impact(&graph, &error_node)?;
        let root_cause = self.analyze_root_cause(&graph, &error_node)?;
        Ok((graph, impact, root_cause))
    }
}
