//! Relevance score maintenance.

use super::{Graph, GraphError};

impl Graph {
    /// Update one node's relevance score, enforcing the `[0.0, 1.0]` range.
    pub fn set_node_relevance(&mut self, node_id: &str, score: f64) -> Result<(), GraphError> {
        if !(0.0..=1.0).contains(&score) {
            return Err(GraphError::RelevanceOutOfRange { score });
        }
        let node = self
            .find_node_mut(node_id)
            .ok_or_else(|| GraphError::NodeNotFound {
                node_id: node_id.to_string(),
            })?;
        node.relevance_score = score;
        Ok(())
    }

    /// Average relevance across all nodes. Useful for pruning or
    /// prioritizing low-confidence execution paths.
    #[must_use]
    pub fn graph_relevance(&self) -> f64 {
        if self.nodes.is_empty() {
            return 0.0;
        }
        let total: f64 = self.nodes.iter().map(|n| n.relevance_score).sum();
        total / self.nodes.len() as f64
    }
}
