mod common;

use common::*;
use deepweave::types::Status;

#[tokio::test]
async fn schedules_by_relevance_then_id() {
    let mut graph = sibling_graph("g-sched-relevance");
    graph.find_node_mut("left").unwrap().relevance_score = 0.2;
    graph.find_node_mut("right").unwrap().relevance_score = 0.9;
    graph.evaluate_readiness().await.unwrap();

    let first = graph.schedule_next().await.unwrap().unwrap();
    assert_eq!(first.id, "right");
    assert_eq!(first.status, Status::Running);

    let second = graph.schedule_next().await.unwrap().unwrap();
    assert_eq!(second.id, "left");
}

#[tokio::test]
async fn equal_relevance_breaks_ties_lexicographically() {
    let mut graph = sibling_graph("g-sched-ties");
    graph.find_node_mut("left").unwrap().relevance_score = 0.5;
    graph.find_node_mut("right").unwrap().relevance_score = 0.5;
    graph.evaluate_readiness().await.unwrap();

    let batch = graph.schedule_next_batch(2).await.unwrap();
    let ids: Vec<&str> = batch.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(ids, vec!["left", "right"]);
}

#[tokio::test]
async fn batch_respects_limit_and_skips_blocked() {
    let mut graph = linear_graph("g-sched-batch");
    graph.evaluate_readiness().await.unwrap();

    // Only "a" is PENDING; "b" and "c" are blocked behind it.
    let batch = graph.schedule_next_batch(5).await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].id, "a");
    assert_eq!(graph.ready_node_count(), 0);
    assert_eq!(graph.running_node_count(), 1);

    // Nothing pending: an empty batch, not an error.
    let empty = graph.schedule_next_batch(5).await.unwrap();
    assert!(empty.is_empty());
}

#[tokio::test]
async fn schedule_next_returns_none_when_idle() {
    let mut graph = linear_graph("g-sched-idle");
    assert!(graph.schedule_next().await.unwrap().is_none());
}
