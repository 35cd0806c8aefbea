use std::time::Duration;

use deepweave::config::Settings;
use deepweave::graph::{Edge, Graph, Node};
use deepweave::retry::RetryPolicy;

pub fn researcher(id: &str, query: &str) -> Node {
    let mut node = Node::new(id, "researcher");
    node.config.insert("query".to_string(), query.to_string());
    node.relevance_score = 0.8;
    node
}

pub fn critic(id: &str, task: &str) -> Node {
    let mut node = Node::new(id, "critic");
    node.config.insert("task".to_string(), task.to_string());
    node.relevance_score = 0.6;
    node
}

pub fn synthesizer(id: &str, query: &str) -> Node {
    let mut node = Node::new(id, "synthesizer");
    node.config.insert("query".to_string(), query.to_string());
    node.relevance_score = 0.4;
    node
}

pub fn edge(from: &str, to: &str) -> Edge {
    Edge {
        from: from.to_string(),
        to: to.to_string(),
    }
}

/// a(researcher) -> b(critic) -> c(synthesizer)
pub fn linear_graph(id: &str) -> Graph {
    let mut graph = Graph::new(id);
    graph
        .metadata
        .insert("goal".to_string(), "Quantum Computing".to_string());
    graph.nodes.push(researcher("a", "quantum computing basics"));
    graph.nodes.push(critic("b", "verify quantum claims"));
    graph.nodes.push(synthesizer("c", "quantum computing"));
    graph.edges.push(edge("a", "b"));
    graph.edges.push(edge("b", "c"));
    graph
}

/// Two independent researchers, no downstream nodes.
pub fn sibling_graph(id: &str) -> Graph {
    let mut graph = Graph::new(id);
    graph
        .metadata
        .insert("goal".to_string(), "Quantum Computing".to_string());
    graph.nodes.push(researcher("left", "quantum hardware"));
    graph.nodes.push(researcher("right", "quantum software"));
    graph
}

/// Millisecond-scale backoff so retry tests stay fast.
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_millis(10),
        backoff_multiplier: 2.0,
        max_delay: Duration::from_millis(50),
    }
}

pub fn test_settings() -> Settings {
    Settings::default()
}
