//! Crash recovery: snapshot decoding and deterministic WAL replay.
//!
//! This module performs no I/O. Backends load the snapshot and the
//! unreplayed entries, then drive [`apply_wal_entry`] in sequence order;
//! the result must be byte-identical to the state present when the last
//! entry was written.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::wal::{Mutation, WalEntry};
use super::{EdgeState, GraphState, NodeState, StorageError};

/// A graph reconstructed from storage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecoveredGraphState {
    pub graph: GraphState,
    /// node_id -> state
    pub nodes: FxHashMap<String, NodeState>,
    pub edges: Vec<EdgeState>,
}

impl RecoveredGraphState {
    /// Empty state to replay a full log into when no snapshot exists.
    #[must_use]
    pub fn empty(graph_id: &str) -> Self {
        RecoveredGraphState {
            graph: GraphState {
                id: graph_id.to_string(),
                status: crate::types::Status::Created.encode().to_string(),
                metadata: FxHashMap::default(),
            },
            nodes: FxHashMap::default(),
            edges: Vec::new(),
        }
    }
}

/// Apply a single WAL mutation to the recovered state.
pub fn apply_wal_entry(
    state: &mut RecoveredGraphState,
    entry: &WalEntry,
) -> Result<(), StorageError> {
    match &entry.mutation {
        Mutation::CreateGraph(p) => {
            state.graph = p.graph.clone();
        }
        Mutation::UpdateGraphStatus(p) => {
            state.graph.status = p.new_status.clone();
        }
        Mutation::AddNode(p) => {
            state.nodes.insert(p.node.node_id.clone(), p.node.clone());
        }
        Mutation::UpdateNodeStatus(p) => {
            let node = state.nodes.get_mut(&p.node_id).ok_or_else(|| {
                StorageError::Replay {
                    sequence: entry.sequence_num,
                    message: format!("node {} not found for status update", p.node_id),
                }
            })?;
            node.status = p.new_status.clone();
            node.retry_count = p.retry_count;
            node.last_error = p.last_error.clone();
        }
        Mutation::AddEdge(p) => {
            state.edges.push(EdgeState {
                from: p.from.clone(),
                to: p.to.clone(),
            });
        }
        // Signals are informational; they do not modify core state.
        Mutation::SignalReceived(_) => {}
    }
    Ok(())
}

/// Serialize a snapshot blob.
pub fn encode_snapshot(state: &RecoveredGraphState) -> Result<Vec<u8>, StorageError> {
    serde_json::to_vec(state).map_err(|e| StorageError::Serde { source: e })
}

/// Deserialize a snapshot blob.
pub fn decode_snapshot(data: &[u8]) -> Result<RecoveredGraphState, StorageError> {
    serde_json::from_slice(data).map_err(|e| StorageError::Serde { source: e })
}

/// Shared replay driver used by both backends: start from the snapshot (or
/// empty state), apply every entry in order, and report the last applied
/// sequence number.
pub(crate) fn replay(
    graph_id: &str,
    snapshot: Option<&super::Snapshot>,
    entries: &[WalEntry],
) -> Result<(RecoveredGraphState, i64), StorageError> {
    let (mut state, mut last_seq) = match snapshot {
        Some(snap) => (decode_snapshot(&snap.data)?, snap.sequence_num),
        None => (RecoveredGraphState::empty(graph_id), 0),
    };

    for entry in entries {
        apply_wal_entry(&mut state, entry)?;
        last_seq = entry.sequence_num;
    }
    Ok((state, last_seq))
}

#[cfg(test)]
mod tests {
    use super::super::wal::*;
    use super::*;

    #[test]
    fn snapshot_round_trip() {
        let mut state = RecoveredGraphState::empty("g");
        state.graph.status = "RUNNING".into();
        state.nodes.insert(
            "a".into(),
            NodeState {
                node_id: "a".into(),
                node_type: "researcher".into(),
                config: FxHashMap::default(),
                status: "SUCCEEDED".into(),
                relevance_score: 0.5,
                depth: 0,
                retry_count: 1,
                last_error: String::new(),
            },
        );
        state.edges.push(EdgeState {
            from: "a".into(),
            to: "b".into(),
        });

        let blob = encode_snapshot(&state).unwrap();
        assert_eq!(decode_snapshot(&blob).unwrap(), state);
    }

    #[test]
    fn status_update_requires_existing_node() {
        let mut state = RecoveredGraphState::empty("g");
        let entry = WalEntry::new(
            "g",
            Mutation::UpdateNodeStatus(UpdateNodeStatusPayload {
                node_id: "ghost".into(),
                old_status: "RUNNING".into(),
                new_status: "FAILED".into(),
                retry_count: 0,
                last_error: String::new(),
            }),
            1,
        );
        assert!(matches!(
            apply_wal_entry(&mut state, &entry),
            Err(StorageError::Replay { sequence: 1, .. })
        ));
    }
}
