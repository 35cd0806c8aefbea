//! Status transition relation and the durable setters built on it.
//!
//! Every transition goes through [`is_valid_transition`]; the setters append
//! a WAL entry before mutating memory (WAL-before-apply), so a replayed log
//! reconstructs exactly the states the run passed through.

use parking_lot::RwLock;
use tracing::instrument;

use crate::storage::wal::{Mutation, UpdateGraphStatusPayload, UpdateNodeStatusPayload};
use crate::types::Status;

use super::{Graph, GraphError};

/// The permitted state machine edges. Self-transitions are allowed so that
/// idempotent sweeps (readiness evaluation) stay no-ops.
#[must_use]
pub fn is_valid_transition(current: Status, target: Status) -> bool {
    if current == target {
        return true;
    }
    match current {
        Status::Created => matches!(
            target,
            Status::Pending | Status::Running | Status::Blocked | Status::Cancelled
        ),
        Status::Blocked => matches!(target, Status::Pending | Status::Cancelled),
        Status::Pending => matches!(target, Status::Running | Status::Failed | Status::Cancelled),
        Status::Running => matches!(
            target,
            Status::Succeeded | Status::Failed | Status::Retrying | Status::Cancelled
        ),
        Status::Retrying => matches!(target, Status::Running | Status::Failed | Status::Cancelled),
        Status::Failed => matches!(target, Status::Retrying | Status::Cancelled),
        Status::Cancelled => matches!(target, Status::Created),
        // Terminal for a run.
        Status::Succeeded => false,
    }
}

/// Standalone guarded status cell, for callers that track a lifecycle
/// outside of a [`Graph`] (e.g. tests, external supervisors).
#[derive(Debug)]
pub struct StateMachine {
    status: RwLock<Status>,
}

impl StateMachine {
    #[must_use]
    pub fn new(initial: Status) -> Self {
        StateMachine {
            status: RwLock::new(initial),
        }
    }

    #[must_use]
    pub fn status(&self) -> Status {
        *self.status.read()
    }

    /// Move to `target`, failing when the edge is not in the relation.
    pub fn transition(&self, target: Status) -> Result<(), GraphError> {
        let mut status = self.status.write();
        if !is_valid_transition(*status, target) {
            return Err(GraphError::InvalidTransition {
                from: *status,
                to: target,
            });
        }
        *status = target;
        Ok(())
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        StateMachine::new(Status::Created)
    }
}

impl Graph {
    /// Set the graph-level status.
    ///
    /// `SUCCEEDED -> RUNNING` is permitted here and only here: the signal
    /// handler resumes a finished graph when late expansion adds work. The
    /// node-level relation never allows leaving `SUCCEEDED`.
    #[instrument(skip(self), fields(graph_id = %self.id), err)]
    pub async fn set_status(&mut self, target: Status) -> Result<(), GraphError> {
        let from = self.status;
        let graph_level_resume = from == Status::Succeeded && target == Status::Running;
        if !is_valid_transition(from, target) && !graph_level_resume {
            return Err(GraphError::InvalidGraphTransition { from, to: target });
        }

        if let Some(store) = self.storage.clone() {
            let mutation = Mutation::UpdateGraphStatus(UpdateGraphStatusPayload {
                old_status: from.encode().to_string(),
                new_status: target.encode().to_string(),
            });
            if let Err(err) = store.log_mutation(&self.id, mutation).await {
                tracing::warn!(graph_id = %self.id, error = %err, "failed to log graph status mutation");
            }
            if let Err(err) = store.update_graph_status(&self.id, target.encode()).await {
                tracing::warn!(graph_id = %self.id, error = %err, "failed to persist graph status");
            }
        }

        self.status = target;
        Ok(())
    }

    /// Set one node's status, WAL-logging the transition (with the node's
    /// current retry count and last error) before applying it.
    #[instrument(skip(self), fields(graph_id = %self.id), err)]
    pub async fn set_node_status(&mut self, node_id: &str, target: Status) -> Result<(), GraphError> {
        let (from, retry_count, last_error) = {
            let node = self.find_node(node_id).ok_or_else(|| GraphError::NodeNotFound {
                node_id: node_id.to_string(),
            })?;
            (node.status, node.retry_count, node.last_error.clone())
        };

        if !is_valid_transition(from, target) {
            return Err(GraphError::InvalidNodeTransition {
                node_id: node_id.to_string(),
                from,
                to: target,
            });
        }
        if from == target {
            return Ok(());
        }

        if let Some(store) = self.storage.clone() {
            let mutation = Mutation::UpdateNodeStatus(UpdateNodeStatusPayload {
                node_id: node_id.to_string(),
                old_status: from.encode().to_string(),
                new_status: target.encode().to_string(),
                retry_count,
                last_error: last_error.clone(),
            });
            if let Err(err) = store.log_mutation(&self.id, mutation).await {
                tracing::warn!(graph_id = %self.id, node_id, error = %err, "failed to log node status mutation");
            }
            if let Err(err) = store
                .update_node_status(&self.id, node_id, target.encode(), retry_count, &last_error)
                .await
            {
                tracing::warn!(graph_id = %self.id, node_id, error = %err, "failed to persist node status");
            }
        }

        if let Some(node) = self.find_node_mut(node_id) {
            node.status = target;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn succeeded_is_terminal() {
        assert!(!is_valid_transition(Status::Succeeded, Status::Running));
        assert!(!is_valid_transition(Status::Succeeded, Status::Failed));
        assert!(is_valid_transition(Status::Succeeded, Status::Succeeded));
    }

    #[test]
    fn failed_may_retry() {
        assert!(is_valid_transition(Status::Failed, Status::Retrying));
        assert!(!is_valid_transition(Status::Failed, Status::Succeeded));
    }

    #[test]
    fn state_machine_rejects_invalid_edge() {
        let sm = StateMachine::new(Status::Created);
        sm.transition(Status::Running).unwrap();
        assert!(sm.transition(Status::Created).is_err());
        assert_eq!(sm.status(), Status::Running);
    }
}
