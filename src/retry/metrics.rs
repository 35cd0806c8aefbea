//! Per-node retry statistics collected during a run.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::Serialize;

use super::classifier::ErrorKind;

/// Retry counters for a single node.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct NodeMetrics {
    pub node_id: String,
    pub total_attempts: u32,
    pub success_count: u32,
    pub failure_count: u32,
    pub transient_errors: u32,
    pub permanent_errors: u32,
    pub circuit_breaker_hits: u32,
}

/// Thread-safe retry metrics across all nodes in an execution.
#[derive(Debug, Default)]
pub struct RetryMetrics {
    node_metrics: RwLock<FxHashMap<String, NodeMetrics>>,
}

impl RetryMetrics {
    #[must_use]
    pub fn new() -> Self {
        RetryMetrics::default()
    }

    fn with_node(&self, node_id: &str, update: impl FnOnce(&mut NodeMetrics)) {
        let mut metrics = self.node_metrics.write();
        let entry = metrics.entry(node_id.to_string()).or_insert_with(|| NodeMetrics {
            node_id: node_id.to_string(),
            ..NodeMetrics::default()
        });
        update(entry);
    }

    pub fn record_attempt(&self, node_id: &str) {
        self.with_node(node_id, |m| m.total_attempts += 1);
    }

    pub fn record_success(&self, node_id: &str) {
        self.with_node(node_id, |m| m.success_count += 1);
    }

    pub fn record_failure(&self, node_id: &str, kind: ErrorKind) {
        self.with_node(node_id, |m| {
            m.failure_count += 1;
            match kind {
                ErrorKind::Transient => m.transient_errors += 1,
                ErrorKind::Permanent => m.permanent_errors += 1,
                ErrorKind::Unknown => {}
            }
        });
    }

    pub fn record_circuit_breaker_hit(&self, node_id: &str) {
        self.with_node(node_id, |m| m.circuit_breaker_hits += 1);
    }

    /// Copy of one node's counters, if any were recorded.
    #[must_use]
    pub fn node_metrics(&self, node_id: &str) -> Option<NodeMetrics> {
        self.node_metrics.read().get(node_id).cloned()
    }

    /// Copy of every node's counters.
    #[must_use]
    pub fn all_metrics(&self) -> FxHashMap<String, NodeMetrics> {
        self.node_metrics.read().clone()
    }

    /// Human-readable summary listing nodes that needed retries.
    #[must_use]
    pub fn summary(&self) -> String {
        let metrics = self.node_metrics.read();
        if metrics.is_empty() {
            return "No retry metrics recorded".to_string();
        }

        let mut lines = vec![format!("Retry metrics ({} nodes):", metrics.len())];
        let mut total_attempts = 0;
        let mut total_failures = 0;

        let mut nodes: Vec<&NodeMetrics> = metrics.values().collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        for m in nodes {
            total_attempts += m.total_attempts;
            total_failures += m.failure_count;
            if m.total_attempts > 1 {
                lines.push(format!(
                    "  - {}: {} attempts, {} failures ({} transient, {} permanent)",
                    m.node_id,
                    m.total_attempts,
                    m.failure_count,
                    m.transient_errors,
                    m.permanent_errors
                ));
            }
        }
        lines.push(format!(
            "Total: {total_attempts} attempts, {total_failures} failures"
        ));
        lines.join("\n")
    }
}
