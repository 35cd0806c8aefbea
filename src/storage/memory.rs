//! Volatile storage backend for tests and non-durable runs.
//!
//! Semantically equivalent to [`SqliteStorage`](super::SqliteStorage):
//! identical sequencing, replay, and snapshot behavior, minus durability.

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use super::recovery::{self, RecoveredGraphState};
use super::wal::{Mutation, WalEntry};
use super::{EdgeState, GraphState, NodeState, Snapshot, Storage, StorageError, SNAPSHOT_WAL_THRESHOLD};

#[derive(Default)]
struct Inner {
    graphs: FxHashMap<String, GraphState>,
    /// graph_id -> nodes in insertion order (upserted by node_id)
    nodes: FxHashMap<String, Vec<NodeState>>,
    edges: FxHashMap<String, Vec<EdgeState>>,
    wal: FxHashMap<String, Vec<WalEntry>>,
    snapshots: FxHashMap<String, Snapshot>,
    seq_numbers: FxHashMap<String, i64>,
    next_row_id: i64,
}

/// In-memory implementation of the [`Storage`] contract.
#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage").finish()
    }
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        MemoryStorage::default()
    }

    /// Total WAL entries recorded for a graph (replayed or not); test hook.
    #[must_use]
    pub fn wal_len(&self, graph_id: &str) -> usize {
        self.inner
            .lock()
            .wal
            .get(graph_id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// All WAL entries for a graph in sequence order; test hook.
    #[must_use]
    pub fn wal_entries(&self, graph_id: &str) -> Vec<WalEntry> {
        self.inner
            .lock()
            .wal
            .get(graph_id)
            .cloned()
            .unwrap_or_default()
    }
}

impl Inner {
    fn next_seq(&mut self, graph_id: &str) -> i64 {
        let seq = self.seq_numbers.entry(graph_id.to_string()).or_insert(1);
        let current = *seq;
        *seq += 1;
        current
    }

    fn push_wal(&mut self, mut entry: WalEntry) -> i64 {
        self.next_row_id += 1;
        entry.id = self.next_row_id;
        let id = entry.id;
        self.wal.entry(entry.graph_id.clone()).or_default().push(entry);
        id
    }

    fn upsert_node(&mut self, graph_id: &str, node: &NodeState) {
        let nodes = self.nodes.entry(graph_id.to_string()).or_default();
        match nodes.iter_mut().find(|n| n.node_id == node.node_id) {
            Some(existing) => *existing = node.clone(),
            None => nodes.push(node.clone()),
        }
    }

    fn upsert_edge(&mut self, graph_id: &str, from: &str, to: &str) {
        let edges = self.edges.entry(graph_id.to_string()).or_default();
        if !edges.iter().any(|e| e.from == from && e.to == to) {
            edges.push(EdgeState {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn save_graph(&self, graph: &GraphState) -> Result<(), StorageError> {
        self.inner
            .lock()
            .graphs
            .insert(graph.id.clone(), graph.clone());
        Ok(())
    }

    async fn load_graph(&self, graph_id: &str) -> Result<Option<GraphState>, StorageError> {
        Ok(self.inner.lock().graphs.get(graph_id).cloned())
    }

    async fn update_graph_status(&self, graph_id: &str, status: &str) -> Result<(), StorageError> {
        if let Some(graph) = self.inner.lock().graphs.get_mut(graph_id) {
            graph.status = status.to_string();
        }
        Ok(())
    }

    async fn delete_graph(&self, graph_id: &str) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        inner.graphs.remove(graph_id);
        inner.nodes.remove(graph_id);
        inner.edges.remove(graph_id);
        inner.wal.remove(graph_id);
        inner.snapshots.remove(graph_id);
        inner.seq_numbers.remove(graph_id);
        Ok(())
    }

    async fn save_node(&self, graph_id: &str, node: &NodeState) -> Result<(), StorageError> {
        self.inner.lock().upsert_node(graph_id, node);
        Ok(())
    }

    async fn load_nodes(&self, graph_id: &str) -> Result<Vec<NodeState>, StorageError> {
        Ok(self
            .inner
            .lock()
            .nodes
            .get(graph_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn update_node_status(
        &self,
        graph_id: &str,
        node_id: &str,
        status: &str,
        retry_count: u32,
        last_error: &str,
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        if let Some(nodes) = inner.nodes.get_mut(graph_id) {
            if let Some(node) = nodes.iter_mut().find(|n| n.node_id == node_id) {
                node.status = status.to_string();
                node.retry_count = retry_count;
                node.last_error = last_error.to_string();
            }
        }
        Ok(())
    }

    async fn save_edge(&self, graph_id: &str, from: &str, to: &str) -> Result<(), StorageError> {
        self.inner.lock().upsert_edge(graph_id, from, to);
        Ok(())
    }

    async fn load_edges(&self, graph_id: &str) -> Result<Vec<EdgeState>, StorageError> {
        Ok(self
            .inner
            .lock()
            .edges
            .get(graph_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn append_wal(&self, entry: &WalEntry) -> Result<i64, StorageError> {
        Ok(self.inner.lock().push_wal(entry.clone()))
    }

    async fn unreplayed_wal(&self, graph_id: &str) -> Result<Vec<WalEntry>, StorageError> {
        let mut entries: Vec<WalEntry> = self
            .inner
            .lock()
            .wal
            .get(graph_id)
            .map(|entries| entries.iter().filter(|e| !e.replayed).cloned().collect())
            .unwrap_or_default();
        entries.sort_by_key(|e| e.sequence_num);
        Ok(entries)
    }

    async fn mark_wal_replayed(&self, graph_id: &str, up_to_seq: i64) -> Result<(), StorageError> {
        if let Some(entries) = self.inner.lock().wal.get_mut(graph_id) {
            for entry in entries.iter_mut() {
                if entry.sequence_num <= up_to_seq {
                    entry.replayed = true;
                }
            }
        }
        Ok(())
    }

    async fn log_mutation(&self, graph_id: &str, mutation: Mutation) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        let seq = inner.next_seq(graph_id);
        inner.push_wal(WalEntry::new(graph_id, mutation, seq));
        Ok(())
    }

    async fn cleanup_old_wal(&self, graph_id: &str, before_seq: i64) -> Result<u64, StorageError> {
        let mut inner = self.inner.lock();
        let Some(entries) = inner.wal.get_mut(graph_id) else {
            return Ok(0);
        };
        let before = entries.len();
        entries.retain(|e| !(e.replayed && e.sequence_num < before_seq));
        Ok((before - entries.len()) as u64)
    }

    async fn save_snapshot(
        &self,
        graph_id: &str,
        seq: i64,
        data: &[u8],
    ) -> Result<(), StorageError> {
        self.inner.lock().snapshots.insert(
            graph_id.to_string(),
            Snapshot {
                graph_id: graph_id.to_string(),
                sequence_num: seq,
                data: data.to_vec(),
            },
        );
        Ok(())
    }

    async fn load_snapshot(&self, graph_id: &str) -> Result<Option<Snapshot>, StorageError> {
        Ok(self.inner.lock().snapshots.get(graph_id).cloned())
    }

    async fn should_create_snapshot(&self, graph_id: &str) -> Result<bool, StorageError> {
        let unreplayed = self
            .inner
            .lock()
            .wal
            .get(graph_id)
            .map(|entries| entries.iter().filter(|e| !e.replayed).count())
            .unwrap_or(0);
        Ok(unreplayed >= SNAPSHOT_WAL_THRESHOLD)
    }

    async fn create_snapshot(&self, graph_id: &str) -> Result<(), StorageError> {
        let (state, seq) = {
            let inner = self.inner.lock();
            let graph = inner
                .graphs
                .get(graph_id)
                .cloned()
                .ok_or_else(|| StorageError::NotFound(graph_id.to_string()))?;
            let mut state = RecoveredGraphState {
                graph,
                nodes: FxHashMap::default(),
                edges: inner.edges.get(graph_id).cloned().unwrap_or_default(),
            };
            for node in inner.nodes.get(graph_id).cloned().unwrap_or_default() {
                state.nodes.insert(node.node_id.clone(), node);
            }
            let seq = inner.seq_numbers.get(graph_id).copied().unwrap_or(1) - 1;
            (state, seq)
        };

        let data = recovery::encode_snapshot(&state)?;
        self.save_snapshot(graph_id, seq, &data).await?;

        let cleanup_before = seq - SNAPSHOT_WAL_THRESHOLD as i64;
        if cleanup_before > 0 {
            self.cleanup_old_wal(graph_id, cleanup_before).await?;
        }
        Ok(())
    }

    async fn recover_graph(
        &self,
        graph_id: &str,
    ) -> Result<Option<RecoveredGraphState>, StorageError> {
        let snapshot = self.load_snapshot(graph_id).await?;
        let entries = self.unreplayed_wal(graph_id).await?;

        if snapshot.is_none() && entries.is_empty() {
            return Ok(None);
        }

        let (state, last_seq) = recovery::replay(graph_id, snapshot.as_ref(), &entries)?;
        if !entries.is_empty() {
            self.mark_wal_replayed(graph_id, last_seq).await?;
        }
        Ok(Some(state))
    }

    async fn persist_initial_graph(
        &self,
        graph: &GraphState,
        nodes: &[NodeState],
        edges: &[EdgeState],
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        inner.graphs.insert(graph.id.clone(), graph.clone());
        let seq = inner.next_seq(&graph.id);
        inner.push_wal(WalEntry::new(
            &graph.id,
            Mutation::CreateGraph(super::wal::CreateGraphPayload {
                graph: graph.clone(),
            }),
            seq,
        ));
        for node in nodes {
            inner.upsert_node(&graph.id, node);
            let seq = inner.next_seq(&graph.id);
            inner.push_wal(WalEntry::new(
                &graph.id,
                Mutation::AddNode(super::wal::AddNodePayload { node: node.clone() }),
                seq,
            ));
        }
        for edge in edges {
            inner.upsert_edge(&graph.id, &edge.from, &edge.to);
            let seq = inner.next_seq(&graph.id);
            inner.push_wal(WalEntry::new(
                &graph.id,
                Mutation::AddEdge(super::wal::AddEdgePayload {
                    from: edge.from.clone(),
                    to: edge.to.clone(),
                }),
                seq,
            ));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
