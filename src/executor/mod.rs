//! The execution engine: one supervisor task drives graph state, N worker
//! tasks each run exactly one node, and a single completion channel carries
//! results back.
//!
//! All graph mutations happen on the supervisor, so the main loop needs no
//! graph lock: workers report lifecycle events (`Retrying`, `Resumed`,
//! `Finished`) and the supervisor applies the corresponding transitions,
//! WAL-logging each one before it lands.

mod worker;

use std::sync::Arc;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::instrument;

use crate::config::Settings;
use crate::dispatch::{
    AtomicClaim, CritiqueResult, DispatchError, ResearchRequest, SynthesizeRequest,
    SynthesizeResponse, VerifyRequest, VerifyResponse, WorkerDispatcher,
};
use crate::graph::{Graph, GraphError, Node};
use crate::limits::{LockManager, RateLimiterManager};
use crate::retry::{BreakerRegistry, CheckpointStore, InMemoryCheckpointStore, NodeMetrics, RetryMetrics, RetryPolicy};
use crate::storage::{EdgeState, GraphState, NodeState, Storage, StorageError};
use crate::types::Status;

pub use worker::WorkerEvent;

/// Cooperative cancellation signal for one execution.
pub type CancelSignal = watch::Receiver<bool>;

/// Create a cancellation pair. Send `true` (or drop the sender after the
/// run) to interrupt RPCs, backoff sleeps, and the supervisor's waits.
#[must_use]
pub fn cancel_channel() -> (watch::Sender<bool>, CancelSignal) {
    watch::channel(false)
}

/// Errors that abort an execution outright. Per-node failures are contained
/// in the [`ExecutionResult`]; only driver-loop invariant breaks and fatal
/// recovery errors surface here.
#[derive(Debug, Error, Diagnostic)]
pub enum ExecutorError {
    #[error(transparent)]
    #[diagnostic(code(deepweave::executor::graph))]
    Graph(#[from] GraphError),

    #[error("execution cancelled")]
    #[diagnostic(code(deepweave::executor::cancelled))]
    Cancelled,

    #[error(transparent)]
    #[diagnostic(code(deepweave::executor::storage))]
    Storage(#[from] StorageError),

    #[error("no storage backend available")]
    #[diagnostic(code(deepweave::executor::no_storage))]
    NoStorage,

    #[error("completion channel closed unexpectedly")]
    #[diagnostic(code(deepweave::executor::channel))]
    ChannelClosed,
}

/// Typed output of one node, kept for downstream input gathering.
#[derive(Clone, Debug)]
pub enum NodeOutput {
    Claims(Vec<AtomicClaim>),
    Verification(VerifyResponse),
    Report(SynthesizeResponse),
}

/// A single node's execution outcome, sent over the completion channel.
#[derive(Debug)]
pub struct NodeResult {
    pub node_id: String,
    pub outcome: Result<NodeOutput, DispatchError>,
}

/// Final outcome of a run.
#[derive(Clone, Debug)]
pub struct ExecutionResult {
    pub graph_id: String,
    pub success: bool,
    /// Some nodes succeeded but not all.
    pub partial_success: bool,
    pub succeeded_nodes: Vec<String>,
    /// node_id -> last error message
    pub failed_nodes: FxHashMap<String, String>,
    pub final_report: Option<String>,
    pub artifact_uri: Option<String>,
    pub error_message: String,
    pub retry_metrics: FxHashMap<String, NodeMetrics>,
}

/// Inputs a worker needs, gathered on the supervisor at dispatch time.
/// Parents are `SUCCEEDED` by then, so gathering is race-free.
#[derive(Clone, Debug)]
pub(crate) enum NodeInput {
    Research(ResearchRequest),
    Verify(VerifyRequest),
    Synthesize(SynthesizeRequest),
    /// Construction failed; the worker fails immediately with this error.
    Invalid(DispatchError),
}

/// Orchestrates scheduling, dispatch, failure handling, and termination.
pub struct DagExecutor {
    dispatcher: Arc<dyn WorkerDispatcher>,
    max_workers: usize,
    settings: Settings,
    rate_limiters: Arc<RateLimiterManager>,
    lock_manager: Option<Arc<LockManager>>,
    retry_policy: RetryPolicy,
    breakers: Arc<BreakerRegistry>,
    checkpoints: Arc<dyn CheckpointStore>,
    metrics: Arc<RetryMetrics>,
    storage: Option<Arc<dyn Storage>>,
}

impl DagExecutor {
    /// Build an executor from settings: rate limiters seeded per node type,
    /// in-memory checkpoints, default retry policy, no persistence.
    /// Use the `with_*` methods to swap parts in.
    #[must_use]
    pub fn new(dispatcher: Arc<dyn WorkerDispatcher>, settings: Settings) -> Self {
        let rate_limiters = Arc::new(RateLimiterManager::new(settings.rate_limits()));
        DagExecutor {
            dispatcher,
            max_workers: settings.max_workers.max(1),
            rate_limiters,
            lock_manager: None,
            retry_policy: RetryPolicy::default(),
            breakers: Arc::new(BreakerRegistry::default()),
            checkpoints: Arc::new(InMemoryCheckpointStore::new()),
            metrics: Arc::new(RetryMetrics::new()),
            storage: None,
            settings,
        }
    }

    #[must_use]
    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    #[must_use]
    pub fn with_lock_manager(mut self, lock_manager: Arc<LockManager>) -> Self {
        self.lock_manager = Some(lock_manager);
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    #[must_use]
    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = store;
        self
    }

    #[must_use]
    pub fn with_breakers(mut self, breakers: Arc<BreakerRegistry>) -> Self {
        self.breakers = breakers;
        self
    }

    /// Retry metrics collector for this executor.
    #[must_use]
    pub fn metrics(&self) -> &Arc<RetryMetrics> {
        &self.metrics
    }

    /// Run the graph to completion with dependency-aware parallel
    /// scheduling. Per-node failures are contained; the returned
    /// [`ExecutionResult`] distinguishes full success, partial success,
    /// total failure, and deadlock.
    #[instrument(skip(self, graph, cancel), fields(graph_id = %graph.id, run_id), err)]
    pub async fn execute(
        &self,
        graph: &mut Graph,
        run_id: &str,
        mut cancel: CancelSignal,
    ) -> Result<ExecutionResult, ExecutorError> {
        tracing::info!(
            graph_id = %graph.id,
            max_workers = self.max_workers,
            "starting graph execution"
        );

        graph.validate()?;

        if let Some(storage) = &self.storage {
            if graph.storage().is_none() {
                graph.set_storage(storage.clone());
            }
        }
        if let Some(storage) = graph.storage().cloned() {
            let state = GraphState::from(&*graph);
            let nodes: Vec<NodeState> = graph.nodes.iter().map(NodeState::from).collect();
            let edges: Vec<EdgeState> = graph
                .edges
                .iter()
                .map(|e| EdgeState {
                    from: e.from.clone(),
                    to: e.to.clone(),
                })
                .collect();
            if let Err(err) = storage.persist_initial_graph(&state, &nodes, &edges).await {
                tracing::warn!(graph_id = %graph.id, error = %err, "failed to persist initial graph");
            }
        }

        graph.set_status(Status::Running).await?;
        graph.evaluate_readiness().await?;

        let (events_tx, mut events_rx) = mpsc::channel::<WorkerEvent>(self.max_workers);
        let mut in_flight: usize = 0;
        let mut outputs: FxHashMap<String, NodeOutput> = FxHashMap::default();

        loop {
            if *cancel.borrow() {
                return Err(ExecutorError::Cancelled);
            }

            let available = self.max_workers.saturating_sub(in_flight);
            if available > 0 {
                let batch = graph.schedule_next_batch(available).await?;
                for node in batch {
                    let input = self.build_input(graph, &node, &outputs, run_id);
                    let ctx = worker::WorkerContext {
                        dispatcher: self.dispatcher.clone(),
                        policy: self.retry_policy,
                        breakers: self.breakers.clone(),
                        checkpoints: self.checkpoints.clone(),
                        metrics: self.metrics.clone(),
                        rate_limiters: self.rate_limiters.clone(),
                        lock_manager: self.lock_manager.clone(),
                        node_timeout: self.settings.node_execution_timeout,
                        run_id: run_id.to_string(),
                        events: events_tx.clone(),
                        cancel: cancel.clone(),
                    };
                    in_flight += 1;
                    tokio::spawn(worker::run_node(ctx, node, input));
                }
            }

            if in_flight > 0 {
                let event = tokio::select! {
                    event = events_rx.recv() => event.ok_or(ExecutorError::ChannelClosed)?,
                    _ = cancel.changed() => return Err(ExecutorError::Cancelled),
                };

                match event {
                    WorkerEvent::Retrying {
                        node_id,
                        attempt,
                        error,
                    } => {
                        if let Some(node) = graph.find_node_mut(&node_id) {
                            node.retry_count = attempt;
                            node.last_error = error;
                        }
                        graph.set_node_status(&node_id, Status::Retrying).await?;
                    }
                    WorkerEvent::Resumed { node_id } => {
                        graph.set_node_status(&node_id, Status::Running).await?;
                    }
                    WorkerEvent::Finished(result) => {
                        in_flight -= 1;
                        match result.outcome {
                            Ok(output) => {
                                outputs.insert(result.node_id.clone(), output);
                                graph.set_node_status(&result.node_id, Status::Succeeded).await?;
                            }
                            Err(err) => {
                                tracing::warn!(node_id = %result.node_id, error = %err, "node failed");
                                if let Some(node) = graph.find_node_mut(&result.node_id) {
                                    node.last_error = err.to_string();
                                }
                                graph.set_node_status(&result.node_id, Status::Failed).await?;
                            }
                        }
                        graph.evaluate_readiness().await?;
                        self.maybe_snapshot(graph).await;
                    }
                }
            }

            if in_flight == 0 && graph.ready_node_count() == 0 {
                return self.classify_outcome(graph, &outputs).await;
            }
        }
    }

    /// Snapshot when the unreplayed WAL has grown past the threshold.
    async fn maybe_snapshot(&self, graph: &Graph) {
        let Some(storage) = graph.storage() else {
            return;
        };
        match storage.should_create_snapshot(&graph.id).await {
            Ok(true) => {
                if let Err(err) = storage.create_snapshot(&graph.id).await {
                    tracing::warn!(graph_id = %graph.id, error = %err, "failed to create snapshot");
                }
            }
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(graph_id = %graph.id, error = %err, "snapshot check failed");
            }
        }
    }

    /// Termination check: with nothing in flight and nothing schedulable,
    /// decide between deadlock, full success, partial success, and total
    /// failure.
    async fn classify_outcome(
        &self,
        graph: &mut Graph,
        outputs: &FxHashMap<String, NodeOutput>,
    ) -> Result<ExecutionResult, ExecutorError> {
        let mut succeeded_nodes: Vec<String> = Vec::new();
        let mut failed_nodes: FxHashMap<String, String> = FxHashMap::default();
        let mut stuck: Option<(String, Status)> = None;
        for node in &graph.nodes {
            match node.status {
                Status::Pending | Status::Running | Status::Blocked | Status::Retrying => {
                    stuck = Some((node.id.clone(), node.status));
                    break;
                }
                Status::Failed => {
                    failed_nodes.insert(node.id.clone(), node.last_error.clone());
                }
                Status::Succeeded => succeeded_nodes.push(node.id.clone()),
                Status::Created | Status::Cancelled => {}
            }
        }

        // Unfinished work with nothing in flight and nothing schedulable:
        // the run can no longer progress.
        if let Some((node_id, status)) = stuck {
            tracing::error!(
                graph_id = %graph.id,
                node_id = %node_id,
                status = %status,
                "execution deadlocked"
            );
            graph.set_status(Status::Failed).await?;
            return Ok(ExecutionResult {
                graph_id: graph.id.clone(),
                success: false,
                partial_success: false,
                succeeded_nodes: Vec::new(),
                failed_nodes: FxHashMap::default(),
                final_report: None,
                artifact_uri: None,
                error_message: "execution deadlocked: nodes are blocked".to_string(),
                retry_metrics: self.metrics.all_metrics(),
            });
        }
        succeeded_nodes.sort();

        let (final_report, artifact_uri) = extract_final_result(graph, outputs);

        if !failed_nodes.is_empty() {
            graph.set_status(Status::Failed).await?;
            if !succeeded_nodes.is_empty() {
                tracing::info!(
                    graph_id = %graph.id,
                    succeeded = succeeded_nodes.len(),
                    failed = failed_nodes.len(),
                    "graph completed with partial success"
                );
                let error_message = format!(
                    "{} nodes failed, {} succeeded",
                    failed_nodes.len(),
                    succeeded_nodes.len()
                );
                return Ok(ExecutionResult {
                    graph_id: graph.id.clone(),
                    success: false,
                    partial_success: true,
                    succeeded_nodes,
                    failed_nodes,
                    final_report,
                    artifact_uri,
                    error_message,
                    retry_metrics: self.metrics.all_metrics(),
                });
            }
            let error_message = format!(
                "all critical nodes failed: {} total failures",
                failed_nodes.len()
            );
            return Ok(ExecutionResult {
                graph_id: graph.id.clone(),
                success: false,
                partial_success: false,
                succeeded_nodes,
                failed_nodes,
                final_report: None,
                artifact_uri: None,
                error_message,
                retry_metrics: self.metrics.all_metrics(),
            });
        }

        // No failures: full success when a synthesizer produced a report.
        let success = final_report.is_some();
        graph
            .set_status(if success { Status::Succeeded } else { Status::Failed })
            .await?;
        tracing::info!(
            graph_id = %graph.id,
            nodes = succeeded_nodes.len(),
            success,
            "graph completed"
        );
        Ok(ExecutionResult {
            graph_id: graph.id.clone(),
            success,
            partial_success: false,
            succeeded_nodes,
            failed_nodes,
            error_message: if success {
                String::new()
            } else {
                "no synthesizer output found".to_string()
            },
            final_report,
            artifact_uri,
            retry_metrics: self.metrics.all_metrics(),
        })
    }

    /// Gather a node's typed input from its config and its succeeded
    /// parents' outputs.
    fn build_input(
        &self,
        graph: &Graph,
        node: &Node,
        outputs: &FxHashMap<String, NodeOutput>,
        run_id: &str,
    ) -> NodeInput {
        match node.node_type.as_str() {
            "researcher" | "agent" => {
                let query = match node.config.get("query").or_else(|| node.config.get("entity")) {
                    Some(query) => query.clone(),
                    None => {
                        return NodeInput::Invalid(DispatchError::InvalidInput(format!(
                            "researcher node '{}' missing 'query' in config",
                            node.id
                        )))
                    }
                };
                NodeInput::Research(ResearchRequest {
                    query,
                    source_node_id: node.id.clone(),
                    run_id: run_id.to_string(),
                    config: node.config.clone(),
                })
            }
            "critic" => {
                let Some(task) = node.config.get("task").cloned() else {
                    return NodeInput::Invalid(DispatchError::InvalidInput(format!(
                        "critic node '{}' missing 'task' in config",
                        node.id
                    )));
                };
                let mut claims: Vec<AtomicClaim> = Vec::new();
                for edge in graph.edges.iter().filter(|e| e.to == node.id) {
                    match outputs.get(&edge.from) {
                        Some(NodeOutput::Claims(parent_claims)) => {
                            claims.extend(parent_claims.iter().cloned());
                        }
                        Some(_) => {}
                        None => {
                            return NodeInput::Invalid(DispatchError::InvalidInput(format!(
                                "parent node '{}' output unavailable",
                                edge.from
                            )))
                        }
                    }
                }
                NodeInput::Verify(VerifyRequest {
                    claims,
                    task,
                    run_id: run_id.to_string(),
                })
            }
            "synthesizer" => {
                let mut results: Vec<CritiqueResult> = Vec::new();
                for edge in graph.edges.iter().filter(|e| e.to == node.id) {
                    match outputs.get(&edge.from) {
                        Some(NodeOutput::Verification(response)) => {
                            results.extend(response.results.iter().cloned());
                        }
                        Some(_) => {}
                        None => {
                            return NodeInput::Invalid(DispatchError::InvalidInput(format!(
                                "parent node '{}' output unavailable",
                                edge.from
                            )))
                        }
                    }
                }
                let mut context = FxHashMap::default();
                if let Some(query) = node.config.get("query") {
                    context.insert(
                        "report_title".to_string(),
                        format!("Deep Research Report: {query}"),
                    );
                    context.insert(
                        "introduction".to_string(),
                        "This report was generated from concurrent DAG execution over verified claims."
                            .to_string(),
                    );
                }
                NodeInput::Synthesize(SynthesizeRequest {
                    verification_results: results,
                    context,
                    run_id: run_id.to_string(),
                })
            }
            other => NodeInput::Invalid(DispatchError::UnknownNodeType(other.to_string())),
        }
    }

    /// Recover a graph from persistent storage, ready to resume execution.
    #[instrument(skip(self), err)]
    pub async fn recover_graph(&self, graph_id: &str) -> Result<Graph, ExecutorError> {
        let storage = self.storage.clone().ok_or(ExecutorError::NoStorage)?;
        let graph = Graph::load_from_storage(storage, graph_id).await?;
        tracing::info!(
            graph_id,
            nodes = graph.nodes.len(),
            status = %graph.status,
            "recovered graph from storage"
        );
        Ok(graph)
    }

    /// Release executor resources.
    pub async fn close(&self) -> Result<(), ExecutorError> {
        if let Some(storage) = &self.storage {
            storage.close().await?;
        }
        Ok(())
    }
}

/// Pull the final report out of a succeeded synthesizer node, if any.
fn extract_final_result(
    graph: &Graph,
    outputs: &FxHashMap<String, NodeOutput>,
) -> (Option<String>, Option<String>) {
    for node in &graph.nodes {
        if node.node_type == "synthesizer" && node.status == Status::Succeeded {
            if let Some(NodeOutput::Report(response)) = outputs.get(&node.id) {
                let artifact = if response.artifact_uri.is_empty() {
                    None
                } else {
                    Some(response.artifact_uri.clone())
                };
                return (Some(response.report.clone()), artifact);
            }
        }
    }
    (None, None)
}
