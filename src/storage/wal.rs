//! Write-ahead log entry and mutation taxonomy.
//!
//! Every mutating operation appends one [`Mutation`] before (or in the same
//! transaction as) the in-memory change. Payloads are explicit serde structs
//! so replay stays deterministic across schema evolution.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::{GraphState, NodeState, StorageError};

pub const MUTATION_CREATE_GRAPH: &str = "CREATE_GRAPH";
pub const MUTATION_UPDATE_GRAPH_STATUS: &str = "UPDATE_GRAPH_STATUS";
pub const MUTATION_ADD_NODE: &str = "ADD_NODE";
pub const MUTATION_UPDATE_NODE_STATUS: &str = "UPDATE_NODE_STATUS";
pub const MUTATION_ADD_EDGE: &str = "ADD_EDGE";
pub const MUTATION_SIGNAL_RECEIVED: &str = "SIGNAL_RECEIVED";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreateGraphPayload {
    pub graph: GraphState,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateGraphStatusPayload {
    pub old_status: String,
    pub new_status: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AddNodePayload {
    pub node: NodeState,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateNodeStatusPayload {
    pub node_id: String,
    pub old_status: String,
    pub new_status: String,
    pub retry_count: u32,
    pub last_error: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddEdgePayload {
    pub from: String,
    pub to: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalReceivedPayload {
    pub signal_type: String,
    pub source: String,
    #[serde(default)]
    pub payload: FxHashMap<String, String>,
}

/// A typed mutation. The discriminant string is stored in its own column;
/// the payload is stored as JSON.
#[derive(Clone, Debug, PartialEq)]
pub enum Mutation {
    CreateGraph(CreateGraphPayload),
    UpdateGraphStatus(UpdateGraphStatusPayload),
    AddNode(AddNodePayload),
    UpdateNodeStatus(UpdateNodeStatusPayload),
    AddEdge(AddEdgePayload),
    SignalReceived(SignalReceivedPayload),
}

impl Mutation {
    /// Discriminant string for the `mutation_type` column.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Mutation::CreateGraph(_) => MUTATION_CREATE_GRAPH,
            Mutation::UpdateGraphStatus(_) => MUTATION_UPDATE_GRAPH_STATUS,
            Mutation::AddNode(_) => MUTATION_ADD_NODE,
            Mutation::UpdateNodeStatus(_) => MUTATION_UPDATE_NODE_STATUS,
            Mutation::AddEdge(_) => MUTATION_ADD_EDGE,
            Mutation::SignalReceived(_) => MUTATION_SIGNAL_RECEIVED,
        }
    }

    /// Encode the payload as JSON.
    pub fn encode_payload(&self) -> Result<String, StorageError> {
        let result = match self {
            Mutation::CreateGraph(p) => serde_json::to_string(p),
            Mutation::UpdateGraphStatus(p) => serde_json::to_string(p),
            Mutation::AddNode(p) => serde_json::to_string(p),
            Mutation::UpdateNodeStatus(p) => serde_json::to_string(p),
            Mutation::AddEdge(p) => serde_json::to_string(p),
            Mutation::SignalReceived(p) => serde_json::to_string(p),
        };
        result.map_err(|e| StorageError::Serde { source: e })
    }

    /// Decode a payload by its stored discriminant.
    pub fn decode(kind: &str, payload: &str) -> Result<Mutation, StorageError> {
        let serde_err = |e| StorageError::Serde { source: e };
        match kind {
            MUTATION_CREATE_GRAPH => Ok(Mutation::CreateGraph(
                serde_json::from_str(payload).map_err(serde_err)?,
            )),
            MUTATION_UPDATE_GRAPH_STATUS => Ok(Mutation::UpdateGraphStatus(
                serde_json::from_str(payload).map_err(serde_err)?,
            )),
            MUTATION_ADD_NODE => Ok(Mutation::AddNode(
                serde_json::from_str(payload).map_err(serde_err)?,
            )),
            MUTATION_UPDATE_NODE_STATUS => Ok(Mutation::UpdateNodeStatus(
                serde_json::from_str(payload).map_err(serde_err)?,
            )),
            MUTATION_ADD_EDGE => Ok(Mutation::AddEdge(
                serde_json::from_str(payload).map_err(serde_err)?,
            )),
            MUTATION_SIGNAL_RECEIVED => Ok(Mutation::SignalReceived(
                serde_json::from_str(payload).map_err(serde_err)?,
            )),
            other => Err(StorageError::UnknownMutation(other.to_string())),
        }
    }
}

/// One row of the write-ahead log.
#[derive(Clone, Debug, PartialEq)]
pub struct WalEntry {
    /// Row id (autoincrement); 0 until assigned by the backend.
    pub id: i64,
    pub graph_id: String,
    pub mutation: Mutation,
    /// Per-graph, strictly monotonically increasing.
    pub sequence_num: i64,
    pub replayed: bool,
}

impl WalEntry {
    #[must_use]
    pub fn new(graph_id: impl Into<String>, mutation: Mutation, sequence_num: i64) -> Self {
        WalEntry {
            id: 0,
            graph_id: graph_id.into(),
            mutation,
            sequence_num,
            replayed: false,
        }
    }
}
