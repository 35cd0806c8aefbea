mod common;

use std::sync::Arc;

use common::*;
use deepweave::executor::{cancel_channel, DagExecutor};
use deepweave::graph::Graph;
use deepweave::storage::MemoryStorage;
use deepweave::types::Status;

fn executor_with(dispatcher: Arc<ScriptedDispatcher>) -> DagExecutor {
    DagExecutor::new(dispatcher, test_settings()).with_retry_policy(fast_policy())
}

#[tokio::test]
async fn linear_pipeline_succeeds_end_to_end() {
    let dispatcher = Arc::new(ScriptedDispatcher::new());
    let executor = executor_with(dispatcher.clone());
    let mut graph = linear_graph("g-linear");

    let (_cancel_tx, cancel) = cancel_channel();
    let result = executor.execute(&mut graph, "run-linear", cancel).await.unwrap();

    assert!(result.success);
    assert!(!result.partial_success);
    assert_eq!(result.succeeded_nodes, vec!["a", "b", "c"]);
    assert!(result.failed_nodes.is_empty());
    assert!(result.final_report.as_deref().unwrap_or("").contains("report"));
    assert!(result.artifact_uri.is_some());
    assert_eq!(graph.status, Status::Succeeded);

    // One attempt per node, no failures.
    for id in ["a", "b", "c"] {
        let metrics = &result.retry_metrics[id];
        assert_eq!(metrics.total_attempts, 1);
        assert_eq!(metrics.failure_count, 0);
    }
}

#[tokio::test]
async fn transient_failures_are_retried_to_success() {
    let dispatcher = Arc::new(ScriptedDispatcher::new());
    dispatcher.script_research(
        "a",
        vec![
            Err(deadline_exceeded()),
            Err(deadline_exceeded()),
            Ok(vec![ScriptedDispatcher::default_claim("a", "quantum")]),
        ],
    );
    let executor = executor_with(dispatcher.clone());
    let mut graph = linear_graph("g-transient");

    let (_cancel_tx, cancel) = cancel_channel();
    let result = executor.execute(&mut graph, "run-transient", cancel).await.unwrap();

    assert!(result.success);
    assert_eq!(dispatcher.research_calls("a"), 3);

    let metrics = &result.retry_metrics["a"];
    assert_eq!(metrics.total_attempts, 3);
    assert_eq!(metrics.failure_count, 2);
    assert_eq!(metrics.transient_errors, 2);
    assert_eq!(metrics.success_count, 1);
}

#[tokio::test]
async fn permanent_errors_fail_without_retry() {
    let dispatcher = Arc::new(ScriptedDispatcher::new());
    dispatcher.script_research("solo", vec![Err(invalid_argument())]);
    let executor = executor_with(dispatcher.clone());

    let mut graph = Graph::new("g-permanent");
    graph.metadata.insert("goal".into(), "Quantum Computing".into());
    graph.nodes.push(researcher("solo", "quantum"));

    let (_cancel_tx, cancel) = cancel_channel();
    let result = executor.execute(&mut graph, "run-permanent", cancel).await.unwrap();

    assert!(!result.success);
    assert!(!result.partial_success);
    assert_eq!(dispatcher.research_calls("solo"), 1);
    assert!(result.failed_nodes.contains_key("solo"));
    assert_eq!(result.retry_metrics["solo"].total_attempts, 1);
    assert_eq!(result.retry_metrics["solo"].permanent_errors, 1);
}

#[tokio::test]
async fn sibling_failure_is_isolated() {
    let dispatcher = Arc::new(ScriptedDispatcher::new());
    dispatcher.script_research("right", vec![Err(invalid_argument())]);
    let executor = executor_with(dispatcher.clone());
    let mut graph = sibling_graph("g-siblings");

    let (_cancel_tx, cancel) = cancel_channel();
    let result = executor.execute(&mut graph, "run-siblings", cancel).await.unwrap();

    assert!(!result.success);
    assert!(result.partial_success);
    assert_eq!(result.succeeded_nodes, vec!["left"]);
    assert_eq!(result.failed_nodes.len(), 1);
    assert!(result.failed_nodes.contains_key("right"));
    assert_eq!(graph.find_node("left").unwrap().status, Status::Succeeded);
    assert_eq!(graph.find_node("right").unwrap().status, Status::Failed);
}

#[tokio::test]
async fn exhausted_retries_count_initial_plus_three() {
    let dispatcher = Arc::new(ScriptedDispatcher::new());
    dispatcher.script_research(
        "solo",
        vec![
            Err(unavailable()),
            Err(unavailable()),
            Err(unavailable()),
            Err(unavailable()),
            Err(unavailable()),
        ],
    );
    let executor = executor_with(dispatcher.clone());

    let mut graph = Graph::new("g-exhausted");
    graph.metadata.insert("goal".into(), "Quantum Computing".into());
    graph.nodes.push(researcher("solo", "quantum"));

    let (_cancel_tx, cancel) = cancel_channel();
    let result = executor.execute(&mut graph, "run-exhausted", cancel).await.unwrap();

    assert!(!result.success);
    // MaxAttempts=3 means exactly 4 invocations: 1 initial + 3 retries.
    assert_eq!(dispatcher.research_calls("solo"), 4);
    assert_eq!(result.retry_metrics["solo"].total_attempts, 4);
    assert_eq!(result.retry_metrics["solo"].failure_count, 4);
    assert_eq!(graph.find_node("solo").unwrap().retry_count, 3);
}

#[tokio::test]
async fn blocked_dependents_report_deadlock() {
    let dispatcher = Arc::new(ScriptedDispatcher::new());
    dispatcher.script_research("a", vec![Err(invalid_argument())]);
    let executor = executor_with(dispatcher.clone());
    let mut graph = linear_graph("g-deadlock");

    let (_cancel_tx, cancel) = cancel_channel();
    let result = executor.execute(&mut graph, "run-deadlock", cancel).await.unwrap();

    assert!(!result.success);
    assert!(result.error_message.contains("deadlock"));
    assert_eq!(graph.find_node("b").unwrap().status, Status::Blocked);
    assert_eq!(graph.find_node("c").unwrap().status, Status::Blocked);
}

#[tokio::test]
async fn unknown_node_type_fails_permanently() {
    let dispatcher = Arc::new(ScriptedDispatcher::new());
    let executor = executor_with(dispatcher.clone());

    let mut graph = Graph::new("g-unknown-type");
    graph.metadata.insert("goal".into(), "Quantum Computing".into());
    let mut node = deepweave::graph::Node::new("weird", "teleporter");
    node.relevance_score = 0.5;
    graph.nodes.push(node);

    let (_cancel_tx, cancel) = cancel_channel();
    let result = executor.execute(&mut graph, "run-unknown", cancel).await.unwrap();

    assert!(!result.success);
    let error = &result.failed_nodes["weird"];
    assert!(error.contains("unknown node type"));
    assert_eq!(result.retry_metrics["weird"].total_attempts, 1);
}

#[tokio::test]
async fn invalid_graph_rejected_before_execution() {
    let dispatcher = Arc::new(ScriptedDispatcher::new());
    let executor = executor_with(dispatcher.clone());

    let mut graph = linear_graph("g-invalid");
    graph.edges.push(edge("c", "a"));

    let (_cancel_tx, cancel) = cancel_channel();
    assert!(executor.execute(&mut graph, "run-invalid", cancel).await.is_err());
    assert_eq!(dispatcher.research_calls("a"), 0);
}

#[tokio::test]
async fn durable_run_can_be_recovered() {
    let storage = Arc::new(MemoryStorage::new());
    let dispatcher = Arc::new(ScriptedDispatcher::new());
    let executor = executor_with(dispatcher.clone()).with_storage(storage.clone());
    let mut graph = linear_graph("g-durable");

    let (_cancel_tx, cancel) = cancel_channel();
    let result = executor.execute(&mut graph, "run-durable", cancel).await.unwrap();
    assert!(result.success);

    let recovered = executor.recover_graph("g-durable").await.unwrap();
    assert_eq!(recovered.status, Status::Succeeded);
    for id in ["a", "b", "c"] {
        assert_eq!(recovered.find_node(id).unwrap().status, Status::Succeeded);
    }
    assert_eq!(recovered.edges.len(), 2);
}

#[tokio::test]
async fn cancellation_interrupts_execution() {
    let dispatcher = Arc::new(ScriptedDispatcher::new());
    // Endless transient failures keep the run in backoff until cancelled.
    dispatcher.script_research("a", vec![Err(unavailable()); 50]);
    let executor = DagExecutor::new(dispatcher.clone(), test_settings()).with_retry_policy(
        deepweave::retry::RetryPolicy {
            max_attempts: 40,
            initial_delay: std::time::Duration::from_millis(50),
            backoff_multiplier: 1.0,
            max_delay: std::time::Duration::from_millis(50),
        },
    );
    let mut graph = linear_graph("g-cancel");

    let (cancel_tx, cancel) = cancel_channel();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(60)).await;
        let _ = cancel_tx.send(true);
    });

    let err = executor.execute(&mut graph, "run-cancel", cancel).await.unwrap_err();
    assert!(matches!(err, deepweave::executor::ExecutorError::Cancelled));
}
