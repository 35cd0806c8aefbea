mod common;

use std::sync::Arc;

use common::*;
use deepweave::graph::transitions::{is_valid_transition, StateMachine};
use deepweave::graph::GraphError;
use deepweave::storage::MemoryStorage;
use deepweave::types::Status;

#[test]
fn transition_relation_matches_lifecycle() {
    use Status::*;
    let allowed = [
        (Created, Pending),
        (Created, Running),
        (Created, Blocked),
        (Created, Cancelled),
        (Blocked, Pending),
        (Blocked, Cancelled),
        (Pending, Running),
        (Pending, Failed),
        (Pending, Cancelled),
        (Running, Succeeded),
        (Running, Failed),
        (Running, Retrying),
        (Running, Cancelled),
        (Retrying, Running),
        (Retrying, Failed),
        (Retrying, Cancelled),
        (Failed, Retrying),
        (Failed, Cancelled),
        (Cancelled, Created),
    ];
    for (from, to) in allowed {
        assert!(is_valid_transition(from, to), "{from} -> {to} should be allowed");
    }

    let forbidden = [
        (Created, Succeeded),
        (Blocked, Running),
        (Pending, Succeeded),
        (Running, Created),
        (Retrying, Succeeded),
        (Failed, Running),
        (Failed, Succeeded),
        (Succeeded, Running),
        (Succeeded, Failed),
        (Cancelled, Running),
    ];
    for (from, to) in forbidden {
        assert!(!is_valid_transition(from, to), "{from} -> {to} should be rejected");
    }
}

#[test]
fn state_machine_applies_valid_edges() {
    let sm = StateMachine::new(Status::Created);
    sm.transition(Status::Pending).unwrap();
    sm.transition(Status::Running).unwrap();
    sm.transition(Status::Retrying).unwrap();
    sm.transition(Status::Running).unwrap();
    sm.transition(Status::Succeeded).unwrap();
    assert!(sm.transition(Status::Running).is_err());
    assert_eq!(sm.status(), Status::Succeeded);
}

#[tokio::test]
async fn set_node_status_rejects_invalid_edge() {
    let mut graph = linear_graph("g-transitions");
    graph.set_node_status("a", Status::Running).await.unwrap();
    let err = graph.set_node_status("a", Status::Created).await.unwrap_err();
    assert!(matches!(err, GraphError::InvalidNodeTransition { .. }));

    let err = graph.set_node_status("missing", Status::Running).await.unwrap_err();
    assert!(matches!(err, GraphError::NodeNotFound { .. }));
}

#[tokio::test]
async fn readiness_follows_parent_completion() {
    let mut graph = linear_graph("g-readiness");
    graph.evaluate_readiness().await.unwrap();

    assert_eq!(graph.find_node("a").unwrap().status, Status::Pending);
    assert_eq!(graph.find_node("b").unwrap().status, Status::Blocked);
    assert_eq!(graph.find_node("c").unwrap().status, Status::Blocked);

    graph.set_node_status("a", Status::Running).await.unwrap();
    graph.set_node_status("a", Status::Succeeded).await.unwrap();
    graph.evaluate_readiness().await.unwrap();

    assert_eq!(graph.find_node("b").unwrap().status, Status::Pending);
    assert_eq!(graph.find_node("c").unwrap().status, Status::Blocked);
}

#[tokio::test]
async fn retrying_parent_keeps_child_blocked() {
    let mut graph = linear_graph("g-retrying-parent");
    graph.evaluate_readiness().await.unwrap();
    graph.set_node_status("a", Status::Running).await.unwrap();
    graph.set_node_status("a", Status::Retrying).await.unwrap();

    graph.evaluate_readiness().await.unwrap();
    assert_eq!(graph.find_node("b").unwrap().status, Status::Blocked);
}

#[tokio::test]
async fn diamond_waits_for_both_parents() {
    let mut graph = sibling_graph("g-diamond");
    graph.nodes.push(critic("join", "cross-check both branches"));
    graph.edges.push(edge("left", "join"));
    graph.edges.push(edge("right", "join"));

    graph.evaluate_readiness().await.unwrap();
    for id in ["left", "right"] {
        graph.set_node_status(id, Status::Running).await.unwrap();
    }
    graph.set_node_status("left", Status::Succeeded).await.unwrap();
    graph.evaluate_readiness().await.unwrap();
    assert_eq!(graph.find_node("join").unwrap().status, Status::Blocked);

    graph.set_node_status("right", Status::Succeeded).await.unwrap();
    graph.evaluate_readiness().await.unwrap();
    assert_eq!(graph.find_node("join").unwrap().status, Status::Pending);
}

#[tokio::test]
async fn readiness_is_idempotent_and_wal_quiet() {
    let storage = Arc::new(MemoryStorage::new());
    let mut graph = linear_graph("g-idempotent");
    graph.set_storage(storage.clone());

    graph.evaluate_readiness().await.unwrap();
    let statuses: Vec<Status> = graph.nodes.iter().map(|n| n.status).collect();
    let wal_after_first = storage.wal_len("g-idempotent");

    graph.evaluate_readiness().await.unwrap();
    let statuses_again: Vec<Status> = graph.nodes.iter().map(|n| n.status).collect();

    assert_eq!(statuses, statuses_again);
    // No statuses changed, so no new WAL entries were appended.
    assert_eq!(storage.wal_len("g-idempotent"), wal_after_first);
}
