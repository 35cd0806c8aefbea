//! Durable graph state: storage contract, persisted models, and backends.
//!
//! The storage layer owns no in-memory graph state; it persists and
//! reconstructs. Persisted models are explicit serde structs decoupled from
//! the in-memory [`Graph`](crate::graph::Graph) so the backends stay lean
//! and declarative.
//!
//! Backends:
//! - [`SqliteStorage`]: embedded, WAL-journaled SQLite via sqlx
//! - [`MemoryStorage`]: volatile store for tests and non-durable runs

pub mod memory;
pub mod recovery;
pub mod sqlite;
pub mod wal;

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::graph::{Graph, Node};
use crate::types::Status;

pub use memory::MemoryStorage;
pub use recovery::RecoveredGraphState;
pub use sqlite::SqliteStorage;
pub use wal::{Mutation, WalEntry};

/// Errors surfaced by storage backends and WAL replay.
#[derive(Debug, Error, Diagnostic)]
pub enum StorageError {
    #[error("storage backend error: {message}")]
    #[diagnostic(
        code(deepweave::storage::backend),
        help("Check that the database file is accessible and the schema is initialized.")
    )]
    Backend { message: String },

    #[error("JSON serialization error: {source}")]
    #[diagnostic(code(deepweave::storage::serde))]
    Serde {
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown mutation type: {0}")]
    #[diagnostic(code(deepweave::storage::unknown_mutation))]
    UnknownMutation(String),

    #[error("WAL replay failed at sequence {sequence}: {message}")]
    #[diagnostic(
        code(deepweave::storage::replay),
        help("Replay errors are fatal; the log no longer matches the schema it was written with.")
    )]
    Replay { sequence: i64, message: String },

    #[error("no stored state found for graph {0}")]
    #[diagnostic(code(deepweave::storage::not_found))]
    NotFound(String),
}

/// Persisted graph metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphState {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub metadata: FxHashMap<String, String>,
}

impl From<&Graph> for GraphState {
    fn from(g: &Graph) -> Self {
        GraphState {
            id: g.id.clone(),
            status: g.status.encode().to_string(),
            metadata: g.metadata.clone(),
        }
    }
}

/// Persisted node state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
    pub node_id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub config: FxHashMap<String, String>,
    pub status: String,
    #[serde(default)]
    pub relevance_score: f64,
    #[serde(default)]
    pub depth: u32,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub last_error: String,
}

impl From<&Node> for NodeState {
    fn from(n: &Node) -> Self {
        NodeState {
            node_id: n.id.clone(),
            node_type: n.node_type.clone(),
            config: n.config.clone(),
            status: n.status.encode().to_string(),
            relevance_score: n.relevance_score,
            depth: n.depth,
            retry_count: n.retry_count,
            last_error: n.last_error.clone(),
        }
    }
}

impl TryFrom<&NodeState> for Node {
    type Error = StorageError;

    fn try_from(state: &NodeState) -> Result<Self, StorageError> {
        let status = Status::parse(&state.status).ok_or_else(|| StorageError::Backend {
            message: format!(
                "unknown persisted status '{}' for node {}",
                state.status, state.node_id
            ),
        })?;
        Ok(Node {
            id: state.node_id.clone(),
            node_type: state.node_type.clone(),
            config: state.config.clone(),
            status,
            relevance_score: state.relevance_score,
            depth: state.depth,
            retry_count: state.retry_count,
            last_error: state.last_error.clone(),
        })
    }
}

/// Persisted edge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeState {
    pub from: String,
    pub to: String,
}

/// A full-state snapshot at a given WAL sequence number.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    pub graph_id: String,
    pub sequence_num: i64,
    pub data: Vec<u8>,
}

/// Persistence contract for graph state, the mutation log, and snapshots.
///
/// Implementations must be internally thread-safe: workers append WAL
/// entries for their own lifecycle while the supervisor persists graph
/// mutations. Multi-row operations (`persist_initial_graph`,
/// `create_snapshot`) are atomic within a backend transaction where the
/// backend supports one.
#[async_trait]
pub trait Storage: Send + Sync {
    // Graph rows
    async fn save_graph(&self, graph: &GraphState) -> Result<(), StorageError>;
    async fn load_graph(&self, graph_id: &str) -> Result<Option<GraphState>, StorageError>;
    async fn update_graph_status(&self, graph_id: &str, status: &str) -> Result<(), StorageError>;
    async fn delete_graph(&self, graph_id: &str) -> Result<(), StorageError>;

    // Node rows
    async fn save_node(&self, graph_id: &str, node: &NodeState) -> Result<(), StorageError>;
    async fn load_nodes(&self, graph_id: &str) -> Result<Vec<NodeState>, StorageError>;
    async fn update_node_status(
        &self,
        graph_id: &str,
        node_id: &str,
        status: &str,
        retry_count: u32,
        last_error: &str,
    ) -> Result<(), StorageError>;

    // Edge rows
    async fn save_edge(&self, graph_id: &str, from: &str, to: &str) -> Result<(), StorageError>;
    async fn load_edges(&self, graph_id: &str) -> Result<Vec<EdgeState>, StorageError>;

    // Write-ahead log
    async fn append_wal(&self, entry: &WalEntry) -> Result<i64, StorageError>;
    async fn unreplayed_wal(&self, graph_id: &str) -> Result<Vec<WalEntry>, StorageError>;
    async fn mark_wal_replayed(&self, graph_id: &str, up_to_seq: i64) -> Result<(), StorageError>;
    /// Append a mutation with automatic per-graph sequence numbering.
    async fn log_mutation(&self, graph_id: &str, mutation: Mutation) -> Result<(), StorageError>;
    /// Delete replayed entries below `before_seq`; returns the rows removed.
    async fn cleanup_old_wal(&self, graph_id: &str, before_seq: i64) -> Result<u64, StorageError>;

    // Snapshots
    async fn save_snapshot(&self, graph_id: &str, seq: i64, data: &[u8]) -> Result<(), StorageError>;
    async fn load_snapshot(&self, graph_id: &str) -> Result<Option<Snapshot>, StorageError>;
    async fn should_create_snapshot(&self, graph_id: &str) -> Result<bool, StorageError>;
    async fn create_snapshot(&self, graph_id: &str) -> Result<(), StorageError>;

    /// Reconstruct graph state from the latest snapshot plus WAL replay.
    async fn recover_graph(
        &self,
        graph_id: &str,
    ) -> Result<Option<RecoveredGraphState>, StorageError>;

    /// Persist a freshly submitted graph (graph row, nodes, edges, and the
    /// corresponding WAL entries) as one atomic unit.
    async fn persist_initial_graph(
        &self,
        graph: &GraphState,
        nodes: &[NodeState],
        edges: &[EdgeState],
    ) -> Result<(), StorageError>;

    async fn close(&self) -> Result<(), StorageError>;
}

/// Unreplayed-entry threshold that triggers a snapshot.
pub const SNAPSHOT_WAL_THRESHOLD: usize = 100;
