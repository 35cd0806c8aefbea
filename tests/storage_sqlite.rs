mod common;

use std::sync::Arc;

use common::*;
use deepweave::graph::Graph;
use deepweave::storage::{EdgeState, GraphState, NodeState, SqliteStorage, Storage};
use deepweave::types::Status;

fn graph_state(id: &str) -> GraphState {
    let mut metadata = rustc_hash::FxHashMap::default();
    metadata.insert("goal".to_string(), "Quantum Computing".to_string());
    GraphState {
        id: id.to_string(),
        status: "CREATED".to_string(),
        metadata,
    }
}

fn node_state(id: &str) -> NodeState {
    let mut config = rustc_hash::FxHashMap::default();
    config.insert("query".to_string(), format!("query for {id}"));
    NodeState {
        node_id: id.to_string(),
        node_type: "researcher".to_string(),
        config,
        status: "CREATED".to_string(),
        relevance_score: 0.7,
        depth: 0,
        retry_count: 0,
        last_error: String::new(),
    }
}

#[tokio::test]
async fn init_schema_is_idempotent() {
    let storage = SqliteStorage::in_memory().await.unwrap();
    // A second initialization is a no-op, not an error.
    storage.init_schema().await.unwrap();
    storage.init_schema().await.unwrap();

    // The schema still works after repeated initialization.
    storage.save_graph(&graph_state("g-schema")).await.unwrap();
    let loaded = storage.load_graph("g-schema").await.unwrap().unwrap();
    assert_eq!(loaded.id, "g-schema");
}

#[tokio::test]
async fn graph_node_edge_rows_round_trip() {
    let storage = SqliteStorage::in_memory().await.unwrap();
    let graph = graph_state("g-rows");
    storage.save_graph(&graph).await.unwrap();

    let node = node_state("a");
    storage.save_node("g-rows", &node).await.unwrap();
    storage.save_edge("g-rows", "a", "b").await.unwrap();
    // Duplicate edges are ignored.
    storage.save_edge("g-rows", "a", "b").await.unwrap();

    let loaded_graph = storage.load_graph("g-rows").await.unwrap().unwrap();
    assert_eq!(loaded_graph, graph);

    let nodes = storage.load_nodes("g-rows").await.unwrap();
    assert_eq!(nodes, vec![node]);

    let edges = storage.load_edges("g-rows").await.unwrap();
    assert_eq!(
        edges,
        vec![EdgeState {
            from: "a".to_string(),
            to: "b".to_string()
        }]
    );

    storage
        .update_node_status("g-rows", "a", "FAILED", 2, "deadline exceeded")
        .await
        .unwrap();
    let nodes = storage.load_nodes("g-rows").await.unwrap();
    assert_eq!(nodes[0].status, "FAILED");
    assert_eq!(nodes[0].retry_count, 2);
    assert_eq!(nodes[0].last_error, "deadline exceeded");

    storage.update_graph_status("g-rows", "RUNNING").await.unwrap();
    assert_eq!(
        storage.load_graph("g-rows").await.unwrap().unwrap().status,
        "RUNNING"
    );
}

#[tokio::test]
async fn crash_recovery_restores_in_flight_run() {
    let storage = Arc::new(SqliteStorage::in_memory().await.unwrap());

    // Submit and partially execute: one researcher succeeded, another
    // still running when the process "dies".
    let mut graph = sibling_graph("g-crash");
    graph.set_storage(storage.clone());
    {
        let state = GraphState::from(&graph);
        let nodes: Vec<NodeState> = graph.nodes.iter().map(NodeState::from).collect();
        let edges: Vec<EdgeState> = Vec::new();
        storage
            .persist_initial_graph(&state, &nodes, &edges)
            .await
            .unwrap();
    }
    graph.set_status(Status::Running).await.unwrap();
    graph.evaluate_readiness().await.unwrap();
    graph.set_node_status("left", Status::Running).await.unwrap();
    graph.set_node_status("right", Status::Running).await.unwrap();
    graph.set_node_status("left", Status::Succeeded).await.unwrap();
    drop(graph); // crash

    let recovered = Graph::load_from_storage(storage.clone(), "g-crash")
        .await
        .unwrap();
    assert_eq!(recovered.status, Status::Running);
    assert_eq!(recovered.find_node("left").unwrap().status, Status::Succeeded);
    assert_eq!(recovered.find_node("right").unwrap().status, Status::Running);
}

#[tokio::test]
async fn crash_recovery_preserves_dynamic_expansion() {
    let storage = Arc::new(SqliteStorage::in_memory().await.unwrap());

    let mut graph = Graph::new("g-crash-signal");
    graph
        .metadata
        .insert("goal".to_string(), "Quantum Computing".to_string());
    graph.nodes.push(researcher("root", "quantum computing"));
    graph.set_storage(storage.clone());
    {
        let state = GraphState::from(&graph);
        let nodes: Vec<NodeState> = graph.nodes.iter().map(NodeState::from).collect();
        storage
            .persist_initial_graph(&state, &nodes, &[])
            .await
            .unwrap();
    }

    graph
        .receive_signal(deepweave::graph::Signal::entity_discovery("root", "Quantum"))
        .await
        .unwrap();
    drop(graph);

    let recovered = Graph::load_from_storage(storage, "g-crash-signal")
        .await
        .unwrap();
    let expanded = recovered.find_node("root-Quantum").expect("expanded node");
    assert_eq!(expanded.depth, 1);
    assert!(recovered
        .edges
        .iter()
        .any(|e| e.from == "root" && e.to == "root-Quantum"));
}
