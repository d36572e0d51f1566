//! Dependency graphs and the analyses run over them.

pub mod analyzer;
pub mod dependency;

pub use analyzer::{
    AffectedNode, GraphAnalyzer, ImpactAnalysis, ImpactScope, RootCauseAnalysis,
    RootCauseCandidate,
};
pub use dependency::{
    DependencyGraph, Direction, GraphEdge, GraphNode, NodeType, Observation, RelationshipKind,
};
