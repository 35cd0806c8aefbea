//! Graph model and structural validation.
//!
//! A [`Graph`] owns its [`Node`]s and [`Edge`]s by value; edges are pure
//! (from, to) id pairs, so there are no ownership cycles. The optional
//! storage handle makes every mutation durable (WAL-before-apply); a graph
//! without storage is fully functional but volatile.
//!
//! Submodules:
//! - [`transitions`]: the status transition relation and setters
//! - [`scheduler`]: ready-node selection for parallel dispatch
//! - [`signal`]: runtime expansion from worker-discovered entities
//! - [`scoring`]: relevance score maintenance
//! - [`serialization`]: strict JSON round-trip helpers

pub mod scheduler;
pub mod scoring;
pub mod serialization;
pub mod signal;
pub mod transitions;

use std::sync::Arc;

use miette::Diagnostic;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;

use crate::storage::{NodeState, Storage};
use crate::types::Status;

pub use signal::Signal;

/// Longest permitted path length, a guard against runaway dynamic expansion.
pub const MAX_GRAPH_DEPTH: usize = 3;

/// Config keys that imply composite behavior and violate node atomicity.
pub const RESERVED_CONFIG_KEYS: [&str; 5] = ["steps", "tasks", "pipeline", "subgraph", "batch"];

/// Errors produced by graph construction, validation, and mutation.
#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error("graph is empty: no nodes defined")]
    #[diagnostic(code(deepweave::graph::empty))]
    Empty,

    /// Aggregation of all structural issues found in validation steps 1-3.
    #[error("graph validation failed with {} errors: {}", .issues.len(), .issues.first().map(String::as_str).unwrap_or(""))]
    #[diagnostic(
        code(deepweave::graph::validation),
        help("Fix every listed issue; ids must be unique, edges must reference existing nodes.")
    )]
    Validation { issues: Vec<String> },

    #[error("cycle detected starting at or involving node '{node_id}'")]
    #[diagnostic(code(deepweave::graph::cycle))]
    Cycle { node_id: String },

    #[error("graph exceeds max depth of {limit} layers")]
    #[diagnostic(
        code(deepweave::graph::depth),
        help("Dynamic expansion and submitted graphs are both bounded by the depth guard.")
    )]
    DepthExceeded { limit: usize },

    #[error("invalid status transition: {from} -> {to}")]
    #[diagnostic(code(deepweave::graph::transition))]
    InvalidTransition { from: Status, to: Status },

    #[error("invalid node status transition for {node_id}: {from} -> {to}")]
    #[diagnostic(code(deepweave::graph::node_transition))]
    InvalidNodeTransition {
        node_id: String,
        from: Status,
        to: Status,
    },

    #[error("invalid graph status transition: {from} -> {to}")]
    #[diagnostic(code(deepweave::graph::graph_transition))]
    InvalidGraphTransition { from: Status, to: Status },

    #[error("node {node_id} not found in graph")]
    #[diagnostic(code(deepweave::graph::node_not_found))]
    NodeNotFound { node_id: String },

    #[error("relevance score must be between 0.0 and 1.0, got {score}")]
    #[diagnostic(code(deepweave::graph::relevance_range))]
    RelevanceOutOfRange { score: f64 },

    #[error("{0}")]
    #[diagnostic(code(deepweave::graph::signal))]
    SignalMalformed(String),

    #[error("graph missing 'goal' in metadata")]
    #[diagnostic(code(deepweave::graph::missing_goal))]
    MissingGoal,

    #[error("entity '{entity}' not relevant to goal '{goal}'")]
    #[diagnostic(code(deepweave::graph::not_relevant))]
    NotRelevant { entity: String, goal: String },

    #[error("max expansion depth reached")]
    #[diagnostic(code(deepweave::graph::expansion_depth))]
    MaxExpansionDepth,

    #[error(transparent)]
    #[diagnostic(code(deepweave::graph::storage))]
    Storage(#[from] crate::storage::StorageError),
}

/// A single atomic unit of work in the pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub config: FxHashMap<String, String>,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub relevance_score: f64,
    #[serde(default)]
    pub depth: u32,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_error: String,
}

impl Node {
    /// Build a node in its initial state.
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Node {
            id: id.into(),
            node_type: node_type.into(),
            config: FxHashMap::default(),
            status: Status::Created,
            relevance_score: 0.0,
            depth: 0,
            retry_count: 0,
            last_error: String::new(),
        }
    }

    /// Reject configurations that describe substeps rather than one unit of
    /// work. Returns the offending issue text for aggregation.
    pub fn check_atomic(&self) -> Option<String> {
        for key in RESERVED_CONFIG_KEYS {
            if self.config.contains_key(key) {
                return Some(format!(
                    "node '{}' violates atomicity: config key '{}' implies composite behavior",
                    self.id, key
                ));
            }
        }
        None
    }
}

/// Directed dependency between two nodes, by id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Edge {
    pub from: String,
    pub to: String,
}

/// The DAG: nodes, edges, run status, and metadata (always carries `goal`).
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Graph {
    pub id: String,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub metadata: FxHashMap<String, String>,
    #[serde(skip)]
    storage: Option<Arc<dyn Storage>>,
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("id", &self.id)
            .field("nodes", &self.nodes.len())
            .field("edges", &self.edges.len())
            .field("status", &self.status)
            .field("durable", &self.storage.is_some())
            .finish()
    }
}

impl PartialEq for Graph {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.nodes == other.nodes
            && self.edges == other.edges
            && self.status == other.status
            && self.metadata == other.metadata
    }
}

impl Graph {
    /// Create an empty volatile graph.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Graph {
            id: id.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
            status: Status::Created,
            metadata: FxHashMap::default(),
            storage: None,
        }
    }

    /// Create a graph bound to a storage backend. A `None`-equivalent is
    /// [`Graph::new`]: the engine stays fully functional, just non-durable.
    #[must_use]
    pub fn with_storage(id: impl Into<String>, storage: Arc<dyn Storage>) -> Self {
        let mut g = Graph::new(id);
        g.storage = Some(storage);
        g
    }

    /// Attach a storage backend to an existing graph.
    pub fn set_storage(&mut self, storage: Arc<dyn Storage>) {
        self.storage = Some(storage);
    }

    /// The attached storage backend, if any.
    #[must_use]
    pub fn storage(&self) -> Option<&Arc<dyn Storage>> {
        self.storage.as_ref()
    }

    #[must_use]
    pub fn find_node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn find_node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    /// Ids of every node with an edge into `id`.
    #[must_use]
    pub fn parents_of(&self, id: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.to == id)
            .map(|e| e.from.as_str())
            .collect()
    }

    /// Structural and semantic validation, in order: non-empty, unique
    /// non-empty ids and types, edge endpoint existence and self-loops,
    /// acyclicity, longest-path bound, node atomicity.
    ///
    /// Steps 1-3 aggregate every issue found; cycle and depth checks
    /// short-circuit on the first violation.
    #[instrument(skip(self), fields(graph_id = %self.id), err)]
    pub fn validate(&self) -> Result<(), GraphError> {
        if self.nodes.is_empty() {
            return Err(GraphError::Empty);
        }

        let mut issues: Vec<String> = Vec::new();
        let mut seen: FxHashSet<&str> = FxHashSet::default();
        for node in &self.nodes {
            if node.id.is_empty() {
                issues.push("found node with empty ID".to_string());
                continue;
            }
            if !seen.insert(node.id.as_str()) {
                issues.push(format!("duplicate node ID: {}", node.id));
            }
            if node.node_type.is_empty() {
                issues.push(format!("node {} has no type specified", node.id));
            }
            if let Some(issue) = node.check_atomic() {
                issues.push(issue);
            }
        }

        // Adjacency over valid endpoints only, so the cycle and depth passes
        // never chase dangling ids.
        let mut adj: FxHashMap<&str, Vec<&str>> = FxHashMap::default();
        for edge in &self.edges {
            if !seen.contains(edge.from.as_str()) {
                issues.push(format!("edge source node '{}' does not exist", edge.from));
            }
            if !seen.contains(edge.to.as_str()) {
                issues.push(format!("edge target node '{}' does not exist", edge.to));
            }
            if edge.from == edge.to {
                issues.push(format!("self-loop detected on node '{}'", edge.from));
            }
            if seen.contains(edge.from.as_str()) && seen.contains(edge.to.as_str()) {
                adj.entry(edge.from.as_str()).or_default().push(edge.to.as_str());
            }
        }

        if !issues.is_empty() {
            return Err(GraphError::Validation { issues });
        }

        self.check_cycles(&adj)?;
        self.check_depth(&adj, MAX_GRAPH_DEPTH)?;
        Ok(())
    }

    /// DFS with recursion-stack coloring.
    fn check_cycles(&self, adj: &FxHashMap<&str, Vec<&str>>) -> Result<(), GraphError> {
        fn visit<'a>(
            id: &'a str,
            adj: &FxHashMap<&'a str, Vec<&'a str>>,
            visited: &mut FxHashSet<&'a str>,
            stack: &mut FxHashSet<&'a str>,
        ) -> bool {
            visited.insert(id);
            stack.insert(id);
            if let Some(next) = adj.get(id) {
                for neighbor in next {
                    if !visited.contains(neighbor) {
                        if visit(neighbor, adj, visited, stack) {
                            return true;
                        }
                    } else if stack.contains(neighbor) {
                        return true;
                    }
                }
            }
            stack.remove(id);
            false
        }

        let mut visited = FxHashSet::default();
        let mut stack = FxHashSet::default();
        for node in &self.nodes {
            if visited.contains(node.id.as_str()) {
                continue;
            }
            if visit(node.id.as_str(), adj, &mut visited, &mut stack) {
                return Err(GraphError::Cycle {
                    node_id: node.id.clone(),
                });
            }
        }
        Ok(())
    }

    /// Memoized longest-path check. Assumes acyclicity (checked first).
    fn check_depth(&self, adj: &FxHashMap<&str, Vec<&str>>, limit: usize) -> Result<(), GraphError> {
        fn longest<'a>(
            id: &'a str,
            adj: &FxHashMap<&'a str, Vec<&'a str>>,
            memo: &mut FxHashMap<&'a str, usize>,
        ) -> usize {
            if let Some(d) = memo.get(id) {
                return *d;
            }
            let mut max_child = 0;
            if let Some(next) = adj.get(id) {
                for neighbor in next {
                    max_child = max_child.max(longest(neighbor, adj, memo));
                }
            }
            let depth = 1 + max_child;
            memo.insert(id, depth);
            depth
        }

        let mut memo = FxHashMap::default();
        for node in &self.nodes {
            if longest(node.id.as_str(), adj, &mut memo) > limit {
                return Err(GraphError::DepthExceeded { limit });
            }
        }
        Ok(())
    }

    /// Sweep every `CREATED`/`BLOCKED` node: all parents `SUCCEEDED` makes
    /// it `PENDING`, anything unfinished (including `RETRYING`) keeps it
    /// `BLOCKED`. Idempotent when nothing changed since the last sweep.
    #[instrument(skip(self), fields(graph_id = %self.id), err)]
    pub async fn evaluate_readiness(&mut self) -> Result<(), GraphError> {
        let statuses: FxHashMap<&str, Status> =
            self.nodes.iter().map(|n| (n.id.as_str(), n.status)).collect();

        let mut decisions: Vec<(String, Status)> = Vec::new();
        for node in &self.nodes {
            if !matches!(node.status, Status::Created | Status::Blocked) {
                continue;
            }
            let all_parents_succeeded = self
                .parents_of(&node.id)
                .iter()
                .all(|p| statuses.get(p).copied() == Some(Status::Succeeded));
            let target = if all_parents_succeeded {
                Status::Pending
            } else {
                Status::Blocked
            };
            if target != node.status {
                decisions.push((node.id.clone(), target));
            }
        }

        for (id, target) in decisions {
            self.set_node_status(&id, target).await?;
        }
        Ok(())
    }

    /// Persist one node row when storage is attached.
    pub(crate) async fn persist_node(&self, node: &Node) {
        if let Some(store) = &self.storage {
            let state = NodeState::from(node);
            if let Err(err) = store.save_node(&self.id, &state).await {
                tracing::warn!(graph_id = %self.id, node_id = %node.id, error = %err, "failed to persist node");
            }
        }
    }

    /// Persist one edge row when storage is attached.
    pub(crate) async fn persist_edge(&self, from: &str, to: &str) {
        if let Some(store) = &self.storage {
            if let Err(err) = store.save_edge(&self.id, from, to).await {
                tracing::warn!(graph_id = %self.id, from, to, error = %err, "failed to persist edge");
            }
        }
    }

    /// Rehydrate a graph from its snapshot + WAL replay.
    #[instrument(skip(storage), err)]
    pub async fn load_from_storage(
        storage: Arc<dyn Storage>,
        graph_id: &str,
    ) -> Result<Graph, GraphError> {
        let recovered = storage
            .recover_graph(graph_id)
            .await?
            .ok_or_else(|| crate::storage::StorageError::NotFound(graph_id.to_string()))?;

        let mut graph = Graph::with_storage(recovered.graph.id.clone(), storage);
        graph.status = Status::parse(&recovered.graph.status).ok_or_else(|| {
            crate::storage::StorageError::Backend {
                message: format!("unknown persisted graph status '{}'", recovered.graph.status),
            }
        })?;
        graph.metadata = recovered.graph.metadata.clone();

        let mut nodes: Vec<NodeState> = recovered.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        for state in nodes {
            graph.nodes.push(Node::try_from(&state).map_err(GraphError::Storage)?);
        }
        for edge in &recovered.edges {
            graph.edges.push(Edge {
                from: edge.from.clone(),
                to: edge.to.clone(),
            });
        }
        Ok(graph)
    }
}
