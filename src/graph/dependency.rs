//! Dependency graph arena
//!
//! Nodes are stored by id and edges in a flat list. Adjacency is kept as
//! index lists per node id, so there are no references between nodes.
//! An edge `A -> B` means a failure in `A` propagates to `B`.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

use crate::context::{clamp_unit, deserialize_unit};
use crate::errors::GraphError;

/// Kind of component in a dependency graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Service,
    Database,
    Cache,
    Queue,
    ExternalApi,
    #[default]
    Component,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Service => "service",
            NodeType::Database => "database",
            NodeType::Cache => "cache",
            NodeType::Queue => "queue",
            NodeType::ExternalApi => "external_api",
            NodeType::Component => "component",
        }
    }

    /// Best-effort mapping from a free-form component type.
    pub fn parse(s: &str) -> Self {
        let lower = s.to_ascii_lowercase();
        if lower.contains("db") || lower.contains("database") || lower.contains("sql") {
            NodeType::Database
        } else if lower.contains("cache") || lower.contains("redis") {
            NodeType::Cache
        } else if lower.contains("queue") || lower.contains("topic") || lower.contains("bus") {
            NodeType::Queue
        } else if lower.contains("external") || lower.contains("api") {
            NodeType::ExternalApi
        } else if lower.contains("service") {
            NodeType::Service
        } else {
            NodeType::Component
        }
    }
}

/// Relationship between two components
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    #[default]
    Standard,
    Critical,
    Optional,
    Async,
}

impl RelationshipKind {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" | "hard" | "required" => RelationshipKind::Critical,
            "optional" | "soft" => RelationshipKind::Optional,
            "async" | "asynchronous" | "event" => RelationshipKind::Async,
            _ => RelationshipKind::Standard,
        }
    }
}

/// A component in the graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub node_type: NodeType,
    #[serde(deserialize_with = "deserialize_unit")]
    error_probability: f64,
    #[serde(deserialize_with = "deserialize_unit")]
    health_score: f64,
    pub metadata: HashMap<String, String>,
    /// Set on the node the analysed error was raised by
    pub is_error_source: bool,
}

impl GraphNode {
    pub fn new(id: impl Into<String>, node_type: NodeType) -> Self {
        Self {
            id: id.into(),
            node_type,
            error_probability: 0.0,
            health_score: 1.0,
            metadata: HashMap::new(),
            is_error_source: false,
        }
    }

    pub fn with_error_probability(mut self, p: f64) -> Self {
        self.error_probability = clamp_unit(p);
        self
    }

    pub fn with_health_score(mut self, h: f64) -> Self {
        self.health_score = clamp_unit(h);
        self
    }

    pub fn with_meta(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub fn as_error_source(mut self) -> Self {
        self.is_error_source = true;
        self
    }

    pub fn error_probability(&self) -> f64 {
        self.error_probability
    }

    pub fn health_score(&self) -> f64 {
        self.health_score
    }
}

/// A directed relationship between two nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub kind: RelationshipKind,
    #[serde(deserialize_with = "deserialize_unit")]
    weight: f64,
}

impl GraphEdge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            kind: RelationshipKind::Standard,
            weight: 1.0,
        }
    }

    pub fn with_kind(mut self, kind: RelationshipKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = clamp_unit(weight);
        self
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }
}

/// Traversal direction for neighbour queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

/// What happened to a component since the graph was built
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    Error,
    Healthy,
}

/// Smoothing factor applied to observations.
const OBSERVATION_ALPHA: f64 = 0.3;

/// Directed graph of components, scoped to one analysis request.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DependencyGraph {
    pub nodes: HashMap<String, GraphNode>,
    pub edges: Vec<GraphEdge>,
    #[serde(skip)]
    outgoing: HashMap<String, Vec<usize>>,
    #[serde(skip)]
    incoming: HashMap<String, Vec<usize>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node. Ids are unique.
    pub fn add_node(&mut self, node: GraphNode) -> Result<(), GraphError> {
        if self.nodes.contains_key(&node.id) {
            return Err(GraphError::DuplicateNode { id: node.id });
        }
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Add a node, or return the existing one untouched.
    pub fn ensure_node(&mut self, node: GraphNode) -> &mut GraphNode {
        self.nodes.entry(node.id.clone()).or_insert(node)
    }

    /// Add an edge. Both endpoints must already exist.
    pub fn add_edge(&mut self, edge: GraphEdge) -> Result<(), GraphError> {
        for endpoint in [&edge.source, &edge.target] {
            if !self.nodes.contains_key(endpoint) {
                return Err(GraphError::InvalidReference {
                    source_id: edge.source.clone(),
                    target_id: edge.target.clone(),
                    missing: endpoint.clone(),
                });
            }
        }
        let idx = self.edges.len();
        self.outgoing.entry(edge.source.clone()).or_default().push(idx);
        self.incoming.entry(edge.target.clone()).or_default().push(idx);
        self.edges.push(edge);
        Ok(())
    }

    /// Remove a node and every edge touching it.
    pub fn remove_node(&mut self, id: &str) -> Result<GraphNode, GraphError> {
        let node = self
            .nodes
            .remove(id)
            .ok_or_else(|| GraphError::NodeNotFound { id: id.to_string() })?;
        self.edges.retain(|e| e.source != id && e.target != id);
        self.reindex();
        Ok(node)
    }

    fn reindex(&mut self) {
        self.outgoing.clear();
        self.incoming.clear();
        for (idx, edge) in self.edges.iter().enumerate() {
            self.outgoing.entry(edge.source.clone()).or_default().push(idx);
            self.incoming.entry(edge.target.clone()).or_default().push(idx);
        }
    }

    pub fn get_node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.get(id)
    }

    fn require(&self, id: &str) -> Result<&GraphNode, GraphError> {
        self.nodes
            .get(id)
            .ok_or_else(|| GraphError::NodeNotFound { id: id.to_string() })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Edges leaving `id`, in insertion order.
    pub fn outgoing_edges(&self, id: &str) -> Vec<&GraphEdge> {
        self.outgoing
            .get(id)
            .map(|indices| indices.iter().map(|&i| &self.edges[i]).collect())
            .unwrap_or_default()
    }

    /// Edges arriving at `id`, in insertion order.
    pub fn incoming_edges(&self, id: &str) -> Vec<&GraphEdge> {
        self.incoming
            .get(id)
            .map(|indices| indices.iter().map(|&i| &self.edges[i]).collect())
            .unwrap_or_default()
    }

    /// Neighbour ids of `id` in the given direction, deduplicated, in edge order.
    pub fn neighbors(&self, id: &str, direction: Direction) -> Result<Vec<String>, GraphError> {
        self.require(id)?;
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        if matches!(direction, Direction::Outgoing | Direction::Both) {
            for edge in self.outgoing_edges(id) {
                if seen.insert(edge.target.as_str()) {
                    out.push(edge.target.clone());
                }
            }
        }
        if matches!(direction, Direction::Incoming | Direction::Both) {
            for edge in self.incoming_edges(id) {
                if seen.insert(edge.source.as_str()) {
                    out.push(edge.source.clone());
                }
            }
        }
        Ok(out)
    }

    /// Shortest path by hop count along outgoing edges (BFS).
    ///
    /// Returns an empty vector when `target` is unreachable.
    pub fn get_path(&self, source: &str, target: &str) -> Result<Vec<String>, GraphError> {
        self.require(source)?;
        self.require(target)?;

        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(String, Vec<String>)> = VecDeque::new();
        queue.push_back((source.to_string(), vec![source.to_string()]));

        while let Some((current, path)) = queue.pop_front() {
            if !visited.insert(current.clone()) {
                continue;
            }
            if current == target {
                return Ok(path);
            }
            for edge in self.outgoing_edges(&current) {
                if !visited.contains(&edge.target) {
                    let mut next = path.clone();
                    next.push(edge.target.clone());
                    queue.push_back((edge.target.clone(), next));
                }
            }
        }

        Ok(Vec::new())
    }

    /// Detect cycles. Each cycle is reported once, starting and ending on
    /// the same node.
    pub fn find_cycles(&self) -> Vec<Vec<String>> {
        let mut cycles = Vec::new();
        let mut visited = HashSet::new();
        let mut on_stack = HashSet::new();

        let mut ids: Vec<&String> = self.nodes.keys().collect();
        ids.sort();

        for id in ids {
            if !visited.contains(id.as_str()) {
                let mut path = Vec::new();
                self.detect_cycle(id, &mut visited, &mut on_stack, &mut path, &mut cycles);
            }
        }
        cycles
    }

    fn detect_cycle(
        &self,
        id: &str,
        visited: &mut HashSet<String>,
        on_stack: &mut HashSet<String>,
        path: &mut Vec<String>,
        cycles: &mut Vec<Vec<String>>,
    ) {
        visited.insert(id.to_string());
        on_stack.insert(id.to_string());
        path.push(id.to_string());

        for edge in self.outgoing_edges(id) {
            if !visited.contains(&edge.target) {
                self.detect_cycle(&edge.target, visited, on_stack, path, cycles);
            } else if on_stack.contains(&edge.target) {
                if let Some(start) = path.iter().position(|x| x == &edge.target) {
                    let mut cycle = path[start..].to_vec();
                    cycle.push(edge.target.clone());
                    cycles.push(cycle);
                }
            }
        }

        path.pop();
        on_stack.remove(id);
    }

    /// Fold a new observation into a node's error probability and health.
    pub fn observe(&mut self, id: &str, observation: Observation) -> Result<(), GraphError> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| GraphError::NodeNotFound { id: id.to_string() })?;
        let p = node.error_probability;
        node.error_probability = match observation {
            Observation::Error => clamp_unit(p + (1.0 - p) * OBSERVATION_ALPHA),
            Observation::Healthy => clamp_unit(p * (1.0 - OBSERVATION_ALPHA)),
        };
        node.health_score = clamp_unit(1.0 - node.error_probability);
        Ok(())
    }

    /// Overwrite a node's scores. Values are clamped.
    pub fn set_scores(
        &mut self,
        id: &str,
        error_probability: f64,
        health_score: f64,
    ) -> Result<(), GraphError> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| GraphError::NodeNotFound { id: id.to_string() })?;
        node.error_probability = clamp_unit(error_probability);
        node.health_score = clamp_unit(health_score);
        Ok(())
    }

    /// Graph restricted to `ids`; unknown ids are ignored.
    pub fn subgraph(&self, ids: &[String]) -> DependencyGraph {
        let keep: HashSet<&String> = ids.iter().collect();
        let mut sub = DependencyGraph::new();
        for id in ids {
            if let Some(node) = self.nodes.get(id) {
                sub.ensure_node(node.clone());
            }
        }
        for edge in &self.edges {
            if keep.contains(&edge.source) && keep.contains(&edge.target) {
                let idx = sub.edges.len();
                sub.outgoing.entry(edge.source.clone()).or_default().push(idx);
                sub.incoming.entry(edge.target.clone()).or_default().push(idx);
                sub.edges.push(edge.clone());
            }
        }
        sub
    }
}
