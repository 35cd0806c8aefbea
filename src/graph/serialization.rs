//! Strict JSON round-trip for graphs.
//!
//! Encoding uses the plain serde derives on [`Graph`]; decoding additionally
//! runs structural validation, so a cyclic or otherwise malformed document
//! never makes it past this boundary. Unknown fields are rejected by the
//! `deny_unknown_fields` attributes on the model types.

use super::{Graph, GraphError};

/// Serialize a graph to its canonical JSON form.
pub fn encode_graph(graph: &Graph) -> Result<String, GraphError> {
    serde_json::to_string(graph)
        .map_err(|e| GraphError::Storage(crate::storage::StorageError::Serde { source: e }))
}

/// Deserialize and validate a graph. Fails on unknown fields, structural
/// issues, cycles, and depth violations.
pub fn decode_graph(json: &str) -> Result<Graph, GraphError> {
    let graph: Graph = serde_json::from_str(json)
        .map_err(|e| GraphError::Storage(crate::storage::StorageError::Serde { source: e }))?;
    graph.validate()?;
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::super::{Edge, Graph, Node};
    use super::*;

    fn sample() -> Graph {
        let mut g = Graph::new("g1");
        g.metadata.insert("goal".into(), "demo".into());
        let mut a = Node::new("a", "researcher");
        a.config.insert("query".into(), "q".into());
        let b = Node::new("b", "critic");
        g.nodes.push(a);
        g.nodes.push(b);
        g.edges.push(Edge {
            from: "a".into(),
            to: "b".into(),
        });
        g
    }

    #[test]
    fn round_trip_preserves_graph() {
        let g = sample();
        let json = encode_graph(&g).unwrap();
        let back = decode_graph(&json).unwrap();
        assert_eq!(g, back);
    }

    #[test]
    fn unknown_fields_rejected() {
        let json = r#"{"id":"g","nodes":[],"edges":[],"status":"CREATED","metadata":{},"surprise":1}"#;
        assert!(decode_graph(json).is_err());
    }

    #[test]
    fn cyclic_document_rejected() {
        let mut g = sample();
        g.edges.push(Edge {
            from: "b".into(),
            to: "a".into(),
        });
        let json = serde_json::to_string(&g).unwrap();
        assert!(decode_graph(&json).is_err());
    }
}
