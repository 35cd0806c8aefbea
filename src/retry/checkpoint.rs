//! Retry checkpoints: where a node's attempt counter survives a crash.
//!
//! Keyed by `(run_id, node_id)`. The file-backed store writes one JSON file
//! per checkpoint under `<base>/<run_id>/<node_id>.json`; the in-memory
//! store backs tests. A missing checkpoint loads as the zero value so the
//! retry loop can start unconditionally from `attempt_number`.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miette::Diagnostic;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Retry state for one node execution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeCheckpoint {
    pub node_id: String,
    pub run_id: String,
    pub attempt_number: u32,
    #[serde(default)]
    pub last_error: String,
    pub timestamp: DateTime<Utc>,
}

impl NodeCheckpoint {
    /// Zero-value checkpoint for a node with no recorded attempts.
    #[must_use]
    pub fn empty(run_id: &str, node_id: &str) -> Self {
        NodeCheckpoint {
            node_id: node_id.to_string(),
            run_id: run_id.to_string(),
            attempt_number: 0,
            last_error: String::new(),
            timestamp: Utc::now(),
        }
    }
}

/// Errors from checkpoint persistence.
#[derive(Debug, Error, Diagnostic)]
pub enum CheckpointError {
    #[error("checkpoint I/O error: {source}")]
    #[diagnostic(code(deepweave::checkpoint::io))]
    Io {
        #[source]
        source: std::io::Error,
    },

    #[error("checkpoint serialization error: {source}")]
    #[diagnostic(code(deepweave::checkpoint::serde))]
    Serde {
        #[source]
        source: serde_json::Error,
    },
}

impl From<std::io::Error> for CheckpointError {
    fn from(source: std::io::Error) -> Self {
        CheckpointError::Io { source }
    }
}

impl From<serde_json::Error> for CheckpointError {
    fn from(source: serde_json::Error) -> Self {
        CheckpointError::Serde { source }
    }
}

/// Checkpoint CRUD keyed by `(run_id, node_id)`.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Record that `attempt_number` is the next attempt to run.
    async fn save(
        &self,
        run_id: &str,
        node_id: &str,
        attempt_number: u32,
        last_error: Option<&str>,
    ) -> Result<(), CheckpointError>;

    /// Load the checkpoint, or the zero value when none exists.
    async fn load(&self, run_id: &str, node_id: &str) -> Result<NodeCheckpoint, CheckpointError>;

    /// Remove the checkpoint (called when the node succeeds).
    async fn delete(&self, run_id: &str, node_id: &str) -> Result<(), CheckpointError>;

    /// All checkpoints recorded for a run.
    async fn load_all(&self, run_id: &str) -> Result<Vec<NodeCheckpoint>, CheckpointError>;

    /// Remove every checkpoint for a run.
    async fn delete_all(&self, run_id: &str) -> Result<(), CheckpointError>;
}

/// Filesystem-backed checkpoint store.
#[derive(Debug)]
pub struct FileCheckpointStore {
    base_dir: PathBuf,
}

impl FileCheckpointStore {
    /// Create the store, making `base_dir` if needed. An empty path falls
    /// back to `./checkpoints`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self, CheckpointError> {
        let mut base_dir: PathBuf = base_dir.into();
        if base_dir.as_os_str().is_empty() {
            base_dir = PathBuf::from("./checkpoints");
        }
        std::fs::create_dir_all(&base_dir)?;
        Ok(FileCheckpointStore { base_dir })
    }

    fn path_for(&self, run_id: &str, node_id: &str) -> PathBuf {
        self.base_dir.join(run_id).join(format!("{node_id}.json"))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(
        &self,
        run_id: &str,
        node_id: &str,
        attempt_number: u32,
        last_error: Option<&str>,
    ) -> Result<(), CheckpointError> {
        let checkpoint = NodeCheckpoint {
            node_id: node_id.to_string(),
            run_id: run_id.to_string(),
            attempt_number,
            last_error: last_error.unwrap_or_default().to_string(),
            timestamp: Utc::now(),
        };

        let run_dir = self.base_dir.join(run_id);
        tokio::fs::create_dir_all(&run_dir).await?;
        let data = serde_json::to_vec_pretty(&checkpoint)?;
        tokio::fs::write(self.path_for(run_id, node_id), data).await?;
        Ok(())
    }

    async fn load(&self, run_id: &str, node_id: &str) -> Result<NodeCheckpoint, CheckpointError> {
        match tokio::fs::read(self.path_for(run_id, node_id)).await {
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Ok(NodeCheckpoint::empty(run_id, node_id))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn delete(&self, run_id: &str, node_id: &str) -> Result<(), CheckpointError> {
        match tokio::fs::remove_file(self.path_for(run_id, node_id)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn load_all(&self, run_id: &str) -> Result<Vec<NodeCheckpoint>, CheckpointError> {
        let run_dir = self.base_dir.join(run_id);
        let mut entries = match tokio::fs::read_dir(&run_dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut checkpoints = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            // Skip unreadable or malformed files rather than failing the scan.
            let Ok(data) = tokio::fs::read(&path).await else {
                continue;
            };
            if let Ok(checkpoint) = serde_json::from_slice::<NodeCheckpoint>(&data) {
                checkpoints.push(checkpoint);
            }
        }
        Ok(checkpoints)
    }

    async fn delete_all(&self, run_id: &str) -> Result<(), CheckpointError> {
        match tokio::fs::remove_dir_all(self.base_dir.join(run_id)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// In-memory checkpoint store for tests.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    /// run_id -> node_id -> checkpoint
    checkpoints: RwLock<FxHashMap<String, FxHashMap<String, NodeCheckpoint>>>,
}

impl InMemoryCheckpointStore {
    #[must_use]
    pub fn new() -> Self {
        InMemoryCheckpointStore::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(
        &self,
        run_id: &str,
        node_id: &str,
        attempt_number: u32,
        last_error: Option<&str>,
    ) -> Result<(), CheckpointError> {
        let checkpoint = NodeCheckpoint {
            node_id: node_id.to_string(),
            run_id: run_id.to_string(),
            attempt_number,
            last_error: last_error.unwrap_or_default().to_string(),
            timestamp: Utc::now(),
        };
        self.checkpoints
            .write()
            .entry(run_id.to_string())
            .or_default()
            .insert(node_id.to_string(), checkpoint);
        Ok(())
    }

    async fn load(&self, run_id: &str, node_id: &str) -> Result<NodeCheckpoint, CheckpointError> {
        Ok(self
            .checkpoints
            .read()
            .get(run_id)
            .and_then(|run| run.get(node_id))
            .cloned()
            .unwrap_or_else(|| NodeCheckpoint::empty(run_id, node_id)))
    }

    async fn delete(&self, run_id: &str, node_id: &str) -> Result<(), CheckpointError> {
        if let Some(run) = self.checkpoints.write().get_mut(run_id) {
            run.remove(node_id);
        }
        Ok(())
    }

    async fn load_all(&self, run_id: &str) -> Result<Vec<NodeCheckpoint>, CheckpointError> {
        Ok(self
            .checkpoints
            .read()
            .get(run_id)
            .map(|run| run.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_all(&self, run_id: &str) -> Result<(), CheckpointError> {
        self.checkpoints.write().remove(run_id);
        Ok(())
    }
}
