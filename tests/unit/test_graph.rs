//! Graph construction and analysis from reported error contexts

use faultmend::context::{ErrorContext, ErrorSeverity};
use faultmend::errors::GraphError;
use faultmend::graph::{
    DependencyGraph, Direction, GraphAnalyzer, GraphEdge, GraphNode, ImpactScope, NodeType,
};

const CONTEXT_JSON: &str = r#"{
    "error_type": "TimeoutException",
    "message": "payment call timed out",
    "service_name": "checkout",
    "operation_name": "Checkout",
    "component_id": "checkout-api",
    "severity": "critical",
    "dependencies": [
        {"component_id": "payments-db", "component_type": "database", "weight": 0.9,
         "direction": "upstream", "error_probability": 0.95},
        {"component_id": "session-cache", "weight": 0.5,
         "direction": "upstream", "error_probability": 0.2},
        {"component_id": "storefront", "relationship": "critical", "weight": 1.0,
         "direction": "downstream"}
    ]
}"#;

fn reported_context() -> ErrorContext {
    serde_json::from_str(CONTEXT_JSON).unwrap()
}

#[test]
fn test_reported_dependencies_become_edges() {
    let analyzer = GraphAnalyzer::default();
    let graph = analyzer.build_graph(&reported_context());

    assert_eq!(graph.node_count(), 4);
    assert_eq!(graph.edge_count(), 3);
    assert!(graph.get_node("checkout-api").unwrap().is_error_source);
    assert_eq!(
        graph.neighbors("checkout-api", Direction::Incoming).unwrap(),
        vec!["payments-db", "session-cache"]
    );
    assert_eq!(
        graph.neighbors("checkout-api", Direction::Outgoing).unwrap(),
        vec!["storefront"]
    );
}

#[test]
fn test_analysis_ranks_upstream_causes_and_downstream_impact() {
    let analyzer = GraphAnalyzer::default();
    let (_, impact, root_cause) = analyzer.analyze(&reported_context()).unwrap();

    // Only downstream components are affected.
    assert_eq!(impact.affected_ids(), vec!["storefront"]);
    assert!((impact.max_impact - 0.9 * 0.85).abs() < 1e-9);
    assert_eq!(impact.scope, ImpactScope::Limited);
    assert_eq!(impact.severity, ErrorSeverity::High);
    assert_eq!(impact.critical_paths, vec![vec!["checkout-api", "storefront"]]);

    assert_eq!(root_cause.primary.id, "payments-db");
    assert!((root_cause.primary.score - 0.9 * 0.95).abs() < 1e-9);
    assert_eq!(root_cause.alternatives.len(), 1);
    assert_eq!(root_cause.alternatives[0].id, "session-cache");
    assert_eq!(root_cause.path, vec!["payments-db", "checkout-api"]);
}

#[test]
fn test_missing_component_yields_single_node() {
    let mut ctx = reported_context();
    ctx.component_id = None;

    let analyzer = GraphAnalyzer::default();
    let (graph, impact, root_cause) = analyzer.analyze(&ctx).unwrap();
    assert_eq!(graph.node_count(), 1);
    assert!(graph.contains("checkout"));
    assert_eq!(impact.blast_radius, 0);
    assert_eq!(impact.scope, ImpactScope::Isolated);
    assert_eq!(root_cause.primary.id, "checkout");
    assert!(root_cause.alternatives.is_empty());
}

fn four_nodes() -> DependencyGraph {
    let mut g = DependencyGraph::new();
    for id in ["A", "B", "C", "D"] {
        g.add_node(GraphNode::new(id, NodeType::Service)).unwrap();
    }
    g
}

#[test]
fn test_get_path_follows_edge_direction() {
    let mut g = four_nodes();
    g.add_edge(GraphEdge::new("A", "B")).unwrap();
    g.add_edge(GraphEdge::new("B", "C")).unwrap();
    g.add_edge(GraphEdge::new("B", "D")).unwrap();

    assert_eq!(g.get_path("A", "D").unwrap(), vec!["A", "B", "D"]);
    assert!(g.get_path("D", "A").unwrap().is_empty());
    assert!(g.get_path("C", "D").unwrap().is_empty());
}

#[test]
fn test_unknown_nodes_are_reported() {
    let mut g = four_nodes();
    assert!(matches!(
        g.get_path("A", "Z"),
        Err(GraphError::NodeNotFound { id }) if id == "Z"
    ));
    assert!(matches!(
        g.add_edge(GraphEdge::new("A", "Z")),
        Err(GraphError::InvalidReference { missing, .. }) if missing == "Z"
    ));
    assert!(matches!(
        g.add_node(GraphNode::new("A", NodeType::Database)),
        Err(GraphError::DuplicateNode { .. })
    ));
    assert_eq!(g.edge_count(), 0);
}

#[test]
fn test_removing_node_drops_its_edges() {
    let mut g = four_nodes();
    g.add_edge(GraphEdge::new("A", "B")).unwrap();
    g.add_edge(GraphEdge::new("B", "C")).unwrap();
    g.add_edge(GraphEdge::new("C", "D")).unwrap();

    g.remove_node("B").unwrap();
    assert_eq!(g.edge_count(), 1);
    assert!(g.get_path("A", "D").unwrap().is_empty());
    assert!(g.neighbors("A", Direction::Both).unwrap().is_empty());
    assert!(matches!(
        g.remove_node("B"),
        Err(GraphError::NodeNotFound { .. })
    ));
}

#[test]
fn test_cycles_do_not_trap_analysis() {
    let mut g = four_nodes();
    g.set_scores("A", 0.9, 0.1).unwrap();
    g.add_edge(GraphEdge::new("A", "B").with_weight(1.0)).unwrap();
    g.add_edge(GraphEdge::new("B", "C").with_weight(1.0)).unwrap();
    g.add_edge(GraphEdge::new("C", "A").with_weight(1.0)).unwrap();

    let analyzer = GraphAnalyzer::default();
    let impact = analyzer.analyze_impact(&g, "A").unwrap();
    assert_eq!(impact.cycles.len(), 1);
    assert!(impact.score_of("A").is_none());
    assert!(impact.affected.iter().all(|a| a.score <= 1.0));

    let root = analyzer.analyze_root_cause(&g, "A").unwrap();
    assert_ne!(root.primary.id, "A");
}
