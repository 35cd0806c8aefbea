//! Ready-node selection for parallel dispatch.
//!
//! The scheduler is purely functional over graph state: it picks `PENDING`
//! nodes and transitions them to `RUNNING`; dispatching the work belongs to
//! the executor. Sort stability is crucial for deterministic replayability.

use tracing::instrument;

use crate::types::Status;

use super::{Graph, GraphError, Node};

impl Graph {
    /// Select up to `max_nodes` from the `PENDING` pool and transition them
    /// atomically to `RUNNING`.
    ///
    /// Selection policy:
    /// 1. highest relevance score first,
    /// 2. lowest id as the deterministic tie-breaker.
    ///
    /// If any transition fails, nodes already moved in this batch are rolled
    /// back to `PENDING` before the error is returned. Returns clones of the
    /// scheduled nodes (now `RUNNING`).
    #[instrument(skip(self), fields(graph_id = %self.id), err)]
    pub async fn schedule_next_batch(&mut self, max_nodes: usize) -> Result<Vec<Node>, GraphError> {
        let max_nodes = max_nodes.max(1);

        let mut candidates: Vec<(f64, String)> = self
            .nodes
            .iter()
            .filter(|n| n.status == Status::Pending)
            .map(|n| (n.relevance_score, n.id.clone()))
            .collect();

        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        candidates.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.cmp(&b.1))
        });
        candidates.truncate(max_nodes.min(candidates.len()));

        let mut transitioned: Vec<String> = Vec::new();
        for (_, id) in &candidates {
            if let Err(err) = self.set_node_status(id, Status::Running).await {
                for rollback in &transitioned {
                    let _ = self.set_node_status(rollback, Status::Pending).await;
                }
                return Err(err);
            }
            transitioned.push(id.clone());
        }

        Ok(transitioned
            .iter()
            .filter_map(|id| self.find_node(id).cloned())
            .collect())
    }

    /// Convenience wrapper selecting at most one node.
    pub async fn schedule_next(&mut self) -> Result<Option<Node>, GraphError> {
        Ok(self.schedule_next_batch(1).await?.into_iter().next())
    }

    /// Number of nodes currently `PENDING`.
    #[must_use]
    pub fn ready_node_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.status == Status::Pending).count()
    }

    /// Number of nodes currently `RUNNING`.
    #[must_use]
    pub fn running_node_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.status == Status::Running).count()
    }
}
