//! Runtime graph expansion from worker-discovered entities.
//!
//! Workers can surface out-of-band `ENTITY_DISCOVERY` signals while a run is
//! in flight. The handler admits an entity when it is relevant to the graph
//! goal, not already covered, and within the expansion depth budget; an
//! admitted entity becomes a new `agent` node hanging off the source node.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::storage::wal::{AddEdgePayload, AddNodePayload, Mutation, SignalReceivedPayload};
use crate::storage::NodeState;
use crate::types::Status;

use super::{Edge, Graph, GraphError, Node};

/// Signal type handled by [`Graph::receive_signal`]; anything else is ignored.
pub const SIGNAL_ENTITY_DISCOVERY: &str = "ENTITY_DISCOVERY";

/// An out-of-band event that can modify the graph at runtime.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    #[serde(rename = "type")]
    pub signal_type: String,
    pub source: String,
    #[serde(default)]
    pub payload: FxHashMap<String, String>,
}

impl Signal {
    /// Build an entity-discovery signal originating from `source`.
    #[must_use]
    pub fn entity_discovery(source: impl Into<String>, entity: impl Into<String>) -> Self {
        let mut payload = FxHashMap::default();
        payload.insert("entity".to_string(), entity.into());
        Signal {
            signal_type: SIGNAL_ENTITY_DISCOVERY.to_string(),
            source: source.into(),
            payload,
        }
    }
}

/// Relevance predicate contract: `(goal, entity) -> relevant?`.
///
/// The default is a deliberately simple, fast heuristic; deployments that
/// need a semantic check inject their own predicate through
/// [`Graph::receive_signal_with`].
pub fn goal_contains(goal: &str, entity: &str) -> bool {
    let goal = goal.to_lowercase();
    let entity = entity.to_lowercase();
    goal.contains(&entity) || entity.contains(&goal)
}

impl Graph {
    /// Process an incoming signal with the default relevance heuristic
    /// (case-insensitive containment in either direction).
    pub async fn receive_signal(&mut self, signal: Signal) -> Result<(), GraphError> {
        self.receive_signal_with(signal, &goal_contains).await
    }

    /// Process an incoming signal with an injected relevance predicate.
    /// Unknown signal types are ignored.
    #[instrument(skip(self, relevant), fields(graph_id = %self.id, signal = %signal.signal_type), err)]
    pub async fn receive_signal_with(
        &mut self,
        signal: Signal,
        relevant: &(dyn Fn(&str, &str) -> bool + Sync),
    ) -> Result<(), GraphError> {
        match signal.signal_type.as_str() {
            SIGNAL_ENTITY_DISCOVERY => self.handle_entity_discovery(signal, relevant).await,
            _ => Ok(()),
        }
    }

    async fn handle_entity_discovery(
        &mut self,
        signal: Signal,
        relevant: &(dyn Fn(&str, &str) -> bool + Sync),
    ) -> Result<(), GraphError> {
        let entity = signal
            .payload
            .get("entity")
            .cloned()
            .ok_or_else(|| {
                GraphError::SignalMalformed(
                    "entity discovery signal missing 'entity' in payload".to_string(),
                )
            })?;

        let goal = self
            .metadata
            .get("goal")
            .cloned()
            .ok_or(GraphError::MissingGoal)?;
        if !relevant(&goal, &entity) {
            return Err(GraphError::NotRelevant { entity, goal });
        }

        // Already covered by an earlier discovery of the same entity.
        if self
            .nodes
            .iter()
            .any(|n| n.node_type == "agent" && n.config.get("entity") == Some(&entity))
        {
            return Ok(());
        }

        let source_depth = self
            .find_node(&signal.source)
            .ok_or_else(|| GraphError::NodeNotFound {
                node_id: signal.source.clone(),
            })?
            .depth;
        if source_depth >= 1 {
            return Err(GraphError::MaxExpansionDepth);
        }

        if let Some(store) = self.storage.clone() {
            let mutation = Mutation::SignalReceived(SignalReceivedPayload {
                signal_type: signal.signal_type.clone(),
                source: signal.source.clone(),
                payload: signal.payload.clone(),
            });
            if let Err(err) = store.log_mutation(&self.id, mutation).await {
                tracing::warn!(graph_id = %self.id, error = %err, "failed to log signal mutation");
            }
        }

        let new_node_id = format!("{}-{}", signal.source, entity);
        let mut new_node = Node::new(new_node_id.clone(), "agent");
        new_node.config.insert("entity".to_string(), entity.clone());
        new_node.relevance_score = 1.0;
        new_node.depth = source_depth + 1;
        self.nodes.push(new_node.clone());
        self.persist_node(&new_node).await;

        if let Some(store) = self.storage.clone() {
            let mutation = Mutation::AddNode(AddNodePayload {
                node: NodeState::from(&new_node),
            });
            if let Err(err) = store.log_mutation(&self.id, mutation).await {
                tracing::warn!(graph_id = %self.id, node_id = %new_node_id, error = %err, "failed to log add-node mutation");
            }
        }

        self.edges.push(Edge {
            from: signal.source.clone(),
            to: new_node_id.clone(),
        });
        self.persist_edge(&signal.source, &new_node_id).await;

        if let Some(store) = self.storage.clone() {
            let mutation = Mutation::AddEdge(AddEdgePayload {
                from: signal.source.clone(),
                to: new_node_id.clone(),
            });
            if let Err(err) = store.log_mutation(&self.id, mutation).await {
                tracing::warn!(graph_id = %self.id, error = %err, "failed to log add-edge mutation");
            }
        }

        tracing::info!(
            graph_id = %self.id,
            source = %signal.source,
            node_id = %new_node_id,
            "expanded graph from discovered entity"
        );

        self.evaluate_readiness().await?;

        // Late expansion can arrive after the run already finished; pull the
        // graph back into flight so the new node gets processed.
        if self.status == Status::Succeeded {
            self.set_status(Status::Running).await?;
        }
        Ok(())
    }
}
