mod common;

use common::*;
use deepweave::graph::serialization::{decode_graph, encode_graph};
use deepweave::graph::{Graph, GraphError, Node};

#[test]
fn valid_linear_graph_passes() {
    let graph = linear_graph("g-valid");
    assert!(graph.validate().is_ok());
}

#[test]
fn empty_graph_rejected() {
    let graph = Graph::new("g-empty");
    assert!(matches!(graph.validate(), Err(GraphError::Empty)));
}

#[test]
fn structural_issues_are_aggregated() {
    let mut graph = Graph::new("g-broken");
    graph.nodes.push(Node::new("", "researcher"));
    graph.nodes.push(Node::new("dup", "researcher"));
    graph.nodes.push(Node::new("dup", ""));
    graph.edges.push(edge("dup", "ghost"));
    graph.edges.push(edge("dup", "dup"));

    match graph.validate() {
        Err(GraphError::Validation { issues }) => {
            assert!(issues.iter().any(|i| i.contains("empty ID")));
            assert!(issues.iter().any(|i| i.contains("duplicate node ID: dup")));
            assert!(issues.iter().any(|i| i.contains("no type specified")));
            assert!(issues.iter().any(|i| i.contains("'ghost' does not exist")));
            assert!(issues.iter().any(|i| i.contains("self-loop")));
        }
        other => panic!("expected aggregated validation error, got {other:?}"),
    }
}

#[test]
fn cycles_rejected() {
    let mut graph = linear_graph("g-cycle");
    graph.edges.push(edge("c", "a"));
    assert!(matches!(graph.validate(), Err(GraphError::Cycle { .. })));
}

#[test]
fn depth_three_accepted_four_rejected() {
    // Path of length 3: a -> b -> c
    let graph = linear_graph("g-depth3");
    assert!(graph.validate().is_ok());

    // Path of length 4: a -> b -> c -> d
    let mut deep = linear_graph("g-depth4");
    deep.nodes.push(researcher("d", "one layer too far"));
    deep.edges.push(edge("c", "d"));
    assert!(matches!(
        deep.validate(),
        Err(GraphError::DepthExceeded { limit: 3 })
    ));
}

#[test]
fn composite_config_keys_rejected() {
    for key in ["steps", "tasks", "pipeline", "subgraph", "batch"] {
        let mut graph = linear_graph("g-atomic");
        graph
            .find_node_mut("a")
            .unwrap()
            .config
            .insert(key.to_string(), "1".to_string());
        match graph.validate() {
            Err(GraphError::Validation { issues }) => {
                assert!(
                    issues.iter().any(|i| i.contains("violates atomicity")),
                    "key {key} should trip the atomicity check"
                );
            }
            other => panic!("expected atomicity rejection for {key}, got {other:?}"),
        }
    }
}

#[test]
fn json_round_trip_preserves_graph() {
    let graph = linear_graph("g-json");
    let json = encode_graph(&graph).unwrap();
    let decoded = decode_graph(&json).unwrap();
    assert_eq!(graph, decoded);
}

#[test]
fn decode_rejects_unknown_fields_and_cycles() {
    let with_unknown =
        r#"{"id":"g","nodes":[],"edges":[],"status":"CREATED","metadata":{},"extra_field":true}"#;
    assert!(decode_graph(with_unknown).is_err());

    let mut cyclic = linear_graph("g-cyclic-json");
    cyclic.edges.push(edge("c", "a"));
    let json = serde_json::to_string(&cyclic).unwrap();
    assert!(decode_graph(&json).is_err());
}
