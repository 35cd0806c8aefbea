//! Core status vocabulary shared by graphs, nodes, and the storage layer.
//!
//! [`Status`] is a closed set: every lifecycle state a graph or node can be
//! in, with a stable string encoding used by the persistence layer. The
//! transition *relation* over these states lives in
//! [`crate::graph::transitions`]; this module only defines the vocabulary.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Execution state of a graph or node.
///
/// Persisted as SCREAMING_CASE strings (`"CREATED"`, `"RUNNING"`, ...) both
/// in JSON payloads and in storage columns, via serde and
/// [`encode`](Self::encode)/[`parse`](Self::parse).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// Initial state of a freshly added graph or node.
    Created,
    /// All parents succeeded; the node is eligible for scheduling.
    Pending,
    /// A worker is executing the node (or the graph run is in progress).
    Running,
    /// At least one parent is unfinished.
    Blocked,
    /// Terminal for a run.
    Succeeded,
    /// Execution gave up (permanent error or retries exhausted).
    Failed,
    /// Waiting out a backoff delay before the next attempt.
    Retrying,
    /// Explicitly cancelled; may be reset to `Created`.
    Cancelled,
}

impl Status {
    /// Stable string form used in storage columns and WAL payloads.
    #[must_use]
    pub fn encode(&self) -> &'static str {
        match self {
            Status::Created => "CREATED",
            Status::Pending => "PENDING",
            Status::Running => "RUNNING",
            Status::Blocked => "BLOCKED",
            Status::Succeeded => "SUCCEEDED",
            Status::Failed => "FAILED",
            Status::Retrying => "RETRYING",
            Status::Cancelled => "CANCELLED",
        }
    }

    /// Decode the persisted string form. Returns `None` for unknown input.
    pub fn parse(s: &str) -> Option<Status> {
        match s {
            "CREATED" => Some(Status::Created),
            "PENDING" => Some(Status::Pending),
            "RUNNING" => Some(Status::Running),
            "BLOCKED" => Some(Status::Blocked),
            "SUCCEEDED" => Some(Status::Succeeded),
            "FAILED" => Some(Status::Failed),
            "RETRYING" => Some(Status::Retrying),
            "CANCELLED" => Some(Status::Cancelled),
            _ => None,
        }
    }

    /// `true` once the node can never run again within this run.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Succeeded | Status::Failed | Status::Cancelled)
    }

    /// `true` while the node still has work in flight or ahead of it.
    #[must_use]
    pub fn is_unfinished(&self) -> bool {
        matches!(
            self,
            Status::Pending | Status::Running | Status::Blocked | Status::Retrying
        )
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::Created
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_parse_round_trip() {
        for status in [
            Status::Created,
            Status::Pending,
            Status::Running,
            Status::Blocked,
            Status::Succeeded,
            Status::Failed,
            Status::Retrying,
            Status::Cancelled,
        ] {
            assert_eq!(Status::parse(status.encode()), Some(status));
        }
        assert_eq!(Status::parse("NOPE"), None);
    }

    #[test]
    fn serde_uses_screaming_case() {
        let json = serde_json::to_string(&Status::Retrying).unwrap();
        assert_eq!(json, "\"RETRYING\"");
        let back: Status = serde_json::from_str("\"BLOCKED\"").unwrap();
        assert_eq!(back, Status::Blocked);
    }
}
