//! SQLite-backed storage.
//!
//! Keeps this module focused on database I/O; pure serialization and replay
//! live in [`wal`](super::wal) and [`recovery`](super::recovery). The
//! database file is opened in WAL journal mode; schema initialization is
//! idempotent and guarded by a `schema_version` table.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::instrument;

use super::recovery::{self, RecoveredGraphState};
use super::wal::{Mutation, WalEntry};
use super::{EdgeState, GraphState, NodeState, Snapshot, Storage, StorageError, SNAPSHOT_WAL_THRESHOLD};

const CURRENT_SCHEMA_VERSION: i64 = 1;

/// Embedded SQLite store with per-graph WAL sequencing.
pub struct SqliteStorage {
    pool: Arc<SqlitePool>,
    /// graph_id -> next sequence number, seeded from `MAX(sequence_num)+1`.
    seq_numbers: Mutex<FxHashMap<String, i64>>,
}

impl std::fmt::Debug for SqliteStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStorage").finish()
    }
}

fn backend(context: &str) -> impl FnOnce(sqlx::Error) -> StorageError + '_ {
    move |e| StorageError::Backend {
        message: format!("{context}: {e}"),
    }
}

impl SqliteStorage {
    /// Open (or create) the database at `path` and initialize the schema.
    #[instrument(skip(path), err)]
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StorageError::Backend {
                    message: format!("failed to create data directory: {e}"),
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .map_err(backend("connect"))?;

        let store = SqliteStorage {
            pool: Arc::new(pool),
            seq_numbers: Mutex::new(FxHashMap::default()),
        };
        store.init_schema().await?;
        store.load_sequence_numbers().await?;
        tracing::info!(path = %path.display(), "sqlite storage initialized");
        Ok(store)
    }

    /// Single-connection in-memory database, for tests.
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options =
            SqliteConnectOptions::from_str("sqlite::memory:").map_err(backend("memory options"))?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(backend("connect memory"))?;
        let store = SqliteStorage {
            pool: Arc::new(pool),
            seq_numbers: Mutex::new(FxHashMap::default()),
        };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create all tables and indexes. Idempotent: skipped entirely when the
    /// recorded schema version is current.
    #[instrument(skip(self), err)]
    pub async fn init_schema(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&*self.pool)
        .await
        .map_err(backend("create schema_version"))?;

        let version: Option<i64> =
            sqlx::query("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
                .fetch_optional(&*self.pool)
                .await
                .map_err(backend("read schema version"))?
                .map(|row| row.get("version"));

        if version.unwrap_or(0) >= CURRENT_SCHEMA_VERSION {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(backend("tx begin"))?;

        for ddl in [
            r#"
            CREATE TABLE IF NOT EXISTS graphs (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                metadata TEXT,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS nodes (
                graph_id TEXT NOT NULL,
                node_id TEXT NOT NULL,
                type TEXT NOT NULL,
                config TEXT,
                status TEXT NOT NULL,
                relevance_score REAL DEFAULT 0.0,
                depth INTEGER DEFAULT 0,
                retry_count INTEGER DEFAULT 0,
                last_error TEXT,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (graph_id, node_id),
                FOREIGN KEY (graph_id) REFERENCES graphs(id) ON DELETE CASCADE
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS edges (
                graph_id TEXT NOT NULL,
                from_node TEXT NOT NULL,
                to_node TEXT NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (graph_id, from_node, to_node),
                FOREIGN KEY (graph_id) REFERENCES graphs(id) ON DELETE CASCADE
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS wal_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                graph_id TEXT NOT NULL,
                mutation_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                sequence_num INTEGER NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                replayed BOOLEAN DEFAULT 0
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS snapshots (
                graph_id TEXT PRIMARY KEY,
                sequence_num INTEGER NOT NULL,
                snapshot_data TEXT NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (graph_id) REFERENCES graphs(id) ON DELETE CASCADE
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_nodes_graph_status ON nodes(graph_id, status)",
            "CREATE INDEX IF NOT EXISTS idx_edges_graph ON edges(graph_id)",
            "CREATE INDEX IF NOT EXISTS idx_edges_from ON edges(graph_id, from_node)",
            "CREATE INDEX IF NOT EXISTS idx_edges_to ON edges(graph_id, to_node)",
            "CREATE INDEX IF NOT EXISTS idx_wal_graph_seq ON wal_log(graph_id, sequence_num)",
            "CREATE INDEX IF NOT EXISTS idx_wal_replayed ON wal_log(replayed)",
        ] {
            sqlx::query(ddl)
                .execute(&mut *tx)
                .await
                .map_err(backend("schema ddl"))?;
        }

        sqlx::query("INSERT INTO schema_version (version) VALUES (?1)")
            .bind(CURRENT_SCHEMA_VERSION)
            .execute(&mut *tx)
            .await
            .map_err(backend("record schema version"))?;

        tx.commit().await.map_err(backend("tx commit"))?;
        tracing::info!(version = CURRENT_SCHEMA_VERSION, "schema initialized");
        Ok(())
    }

    async fn load_sequence_numbers(&self) -> Result<(), StorageError> {
        let rows = sqlx::query(
            "SELECT graph_id, MAX(sequence_num) AS max_seq FROM wal_log GROUP BY graph_id",
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(backend("load sequence numbers"))?;

        let mut seqs = self.seq_numbers.lock();
        for row in rows {
            let graph_id: String = row.get("graph_id");
            let max_seq: i64 = row.get("max_seq");
            seqs.insert(graph_id, max_seq + 1);
        }
        Ok(())
    }

    fn next_seq(&self, graph_id: &str) -> i64 {
        let mut seqs = self.seq_numbers.lock();
        let seq = seqs.entry(graph_id.to_string()).or_insert(1);
        let current = *seq;
        *seq += 1;
        current
    }

    fn last_seq(&self, graph_id: &str) -> i64 {
        self.seq_numbers
            .lock()
            .get(graph_id)
            .copied()
            .unwrap_or(1)
            - 1
    }

    fn decode_wal_row(row: &SqliteRow) -> Result<WalEntry, StorageError> {
        let mutation_type: String = row.get("mutation_type");
        let payload: String = row.get("payload");
        Ok(WalEntry {
            id: row.get("id"),
            graph_id: row.get("graph_id"),
            mutation: Mutation::decode(&mutation_type, &payload)?,
            sequence_num: row.get("sequence_num"),
            replayed: row.get("replayed"),
        })
    }

    fn decode_node_row(row: &SqliteRow) -> Result<NodeState, StorageError> {
        let config_json: String = row.get("config");
        let config: FxHashMap<String, String> =
            serde_json::from_str(&config_json).map_err(|e| StorageError::Serde { source: e })?;
        let last_error: Option<String> = row.get("last_error");
        let retry_count: i64 = row.get("retry_count");
        let depth: i64 = row.get("depth");
        Ok(NodeState {
            node_id: row.get("node_id"),
            node_type: row.get("type"),
            config,
            status: row.get("status"),
            relevance_score: row.get("relevance_score"),
            depth: depth as u32,
            retry_count: retry_count as u32,
            last_error: last_error.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn save_graph(&self, graph: &GraphState) -> Result<(), StorageError> {
        let metadata = serde_json::to_string(&graph.metadata)
            .map_err(|e| StorageError::Serde { source: e })?;
        sqlx::query(
            r#"
            INSERT INTO graphs (id, status, metadata)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                metadata = excluded.metadata,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&graph.id)
        .bind(&graph.status)
        .bind(&metadata)
        .execute(&*self.pool)
        .await
        .map_err(backend("save graph"))?;
        Ok(())
    }

    async fn load_graph(&self, graph_id: &str) -> Result<Option<GraphState>, StorageError> {
        let row = sqlx::query("SELECT id, status, metadata FROM graphs WHERE id = ?1")
            .bind(graph_id)
            .fetch_optional(&*self.pool)
            .await
            .map_err(backend("load graph"))?;

        match row {
            None => Ok(None),
            Some(row) => {
                let metadata_json: String = row.get("metadata");
                let metadata = serde_json::from_str(&metadata_json)
                    .map_err(|e| StorageError::Serde { source: e })?;
                Ok(Some(GraphState {
                    id: row.get("id"),
                    status: row.get("status"),
                    metadata,
                }))
            }
        }
    }

    async fn update_graph_status(&self, graph_id: &str, status: &str) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE graphs SET status = ?1, updated_at = CURRENT_TIMESTAMP WHERE id = ?2",
        )
        .bind(status)
        .bind(graph_id)
        .execute(&*self.pool)
        .await
        .map_err(backend("update graph status"))?;
        Ok(())
    }

    async fn delete_graph(&self, graph_id: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM graphs WHERE id = ?1")
            .bind(graph_id)
            .execute(&*self.pool)
            .await
            .map_err(backend("delete graph"))?;
        Ok(())
    }

    async fn save_node(&self, graph_id: &str, node: &NodeState) -> Result<(), StorageError> {
        let config =
            serde_json::to_string(&node.config).map_err(|e| StorageError::Serde { source: e })?;
        sqlx::query(
            r#"
            INSERT INTO nodes (graph_id, node_id, type, config, status, relevance_score, depth, retry_count, last_error)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(graph_id, node_id) DO UPDATE SET
                type = excluded.type,
                config = excluded.config,
                status = excluded.status,
                relevance_score = excluded.relevance_score,
                depth = excluded.depth,
                retry_count = excluded.retry_count,
                last_error = excluded.last_error,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(graph_id)
        .bind(&node.node_id)
        .bind(&node.node_type)
        .bind(&config)
        .bind(&node.status)
        .bind(node.relevance_score)
        .bind(node.depth as i64)
        .bind(node.retry_count as i64)
        .bind(&node.last_error)
        .execute(&*self.pool)
        .await
        .map_err(backend("save node"))?;
        Ok(())
    }

    async fn load_nodes(&self, graph_id: &str) -> Result<Vec<NodeState>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT node_id, type, config, status, relevance_score, depth, retry_count, last_error
            FROM nodes
            WHERE graph_id = ?1
            ORDER BY created_at, node_id
            "#,
        )
        .bind(graph_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(backend("load nodes"))?;

        rows.iter().map(Self::decode_node_row).collect()
    }

    async fn update_node_status(
        &self,
        graph_id: &str,
        node_id: &str,
        status: &str,
        retry_count: u32,
        last_error: &str,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            UPDATE nodes
            SET status = ?1, retry_count = ?2, last_error = ?3, updated_at = CURRENT_TIMESTAMP
            WHERE graph_id = ?4 AND node_id = ?5
            "#,
        )
        .bind(status)
        .bind(retry_count as i64)
        .bind(last_error)
        .bind(graph_id)
        .bind(node_id)
        .execute(&*self.pool)
        .await
        .map_err(backend("update node status"))?;
        Ok(())
    }

    async fn save_edge(&self, graph_id: &str, from: &str, to: &str) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT OR IGNORE INTO edges (graph_id, from_node, to_node) VALUES (?1, ?2, ?3)",
        )
        .bind(graph_id)
        .bind(from)
        .bind(to)
        .execute(&*self.pool)
        .await
        .map_err(backend("save edge"))?;
        Ok(())
    }

    async fn load_edges(&self, graph_id: &str) -> Result<Vec<EdgeState>, StorageError> {
        let rows = sqlx::query(
            "SELECT from_node, to_node FROM edges WHERE graph_id = ?1 ORDER BY created_at, from_node, to_node",
        )
        .bind(graph_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(backend("load edges"))?;

        Ok(rows
            .into_iter()
            .map(|row| EdgeState {
                from: row.get("from_node"),
                to: row.get("to_node"),
            })
            .collect())
    }

    async fn append_wal(&self, entry: &WalEntry) -> Result<i64, StorageError> {
        let payload = entry.mutation.encode_payload()?;
        let result = sqlx::query(
            r#"
            INSERT INTO wal_log (graph_id, mutation_type, payload, sequence_num)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(&entry.graph_id)
        .bind(entry.mutation.kind())
        .bind(&payload)
        .bind(entry.sequence_num)
        .execute(&*self.pool)
        .await
        .map_err(backend("append wal"))?;
        Ok(result.last_insert_rowid())
    }

    async fn unreplayed_wal(&self, graph_id: &str) -> Result<Vec<WalEntry>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT id, graph_id, mutation_type, payload, sequence_num, replayed
            FROM wal_log
            WHERE graph_id = ?1 AND replayed = 0
            ORDER BY sequence_num
            "#,
        )
        .bind(graph_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(backend("unreplayed wal"))?;

        rows.iter().map(Self::decode_wal_row).collect()
    }

    async fn mark_wal_replayed(&self, graph_id: &str, up_to_seq: i64) -> Result<(), StorageError> {
        sqlx::query("UPDATE wal_log SET replayed = 1 WHERE graph_id = ?1 AND sequence_num <= ?2")
            .bind(graph_id)
            .bind(up_to_seq)
            .execute(&*self.pool)
            .await
            .map_err(backend("mark wal replayed"))?;
        Ok(())
    }

    async fn log_mutation(&self, graph_id: &str, mutation: Mutation) -> Result<(), StorageError> {
        let entry = WalEntry::new(graph_id, mutation, self.next_seq(graph_id));
        self.append_wal(&entry).await?;
        Ok(())
    }

    async fn cleanup_old_wal(&self, graph_id: &str, before_seq: i64) -> Result<u64, StorageError> {
        let result = sqlx::query(
            "DELETE FROM wal_log WHERE graph_id = ?1 AND sequence_num < ?2 AND replayed = 1",
        )
        .bind(graph_id)
        .bind(before_seq)
        .execute(&*self.pool)
        .await
        .map_err(backend("cleanup wal"))?;
        let removed = result.rows_affected();
        if removed > 0 {
            tracing::debug!(graph_id, removed, "cleaned up old WAL entries");
        }
        Ok(removed)
    }

    async fn save_snapshot(
        &self,
        graph_id: &str,
        seq: i64,
        data: &[u8],
    ) -> Result<(), StorageError> {
        let text = String::from_utf8(data.to_vec()).map_err(|e| StorageError::Backend {
            message: format!("snapshot not valid UTF-8: {e}"),
        })?;
        sqlx::query(
            r#"
            INSERT INTO snapshots (graph_id, sequence_num, snapshot_data)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(graph_id) DO UPDATE SET
                sequence_num = excluded.sequence_num,
                snapshot_data = excluded.snapshot_data,
                created_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(graph_id)
        .bind(seq)
        .bind(&text)
        .execute(&*self.pool)
        .await
        .map_err(backend("save snapshot"))?;
        tracing::debug!(graph_id, seq, "saved snapshot");
        Ok(())
    }

    async fn load_snapshot(&self, graph_id: &str) -> Result<Option<Snapshot>, StorageError> {
        let row = sqlx::query(
            "SELECT graph_id, sequence_num, snapshot_data FROM snapshots WHERE graph_id = ?1",
        )
        .bind(graph_id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(backend("load snapshot"))?;

        Ok(row.map(|row| {
            let data: String = row.get("snapshot_data");
            Snapshot {
                graph_id: row.get("graph_id"),
                sequence_num: row.get("sequence_num"),
                data: data.into_bytes(),
            }
        }))
    }

    async fn should_create_snapshot(&self, graph_id: &str) -> Result<bool, StorageError> {
        let count: i64 =
            sqlx::query("SELECT COUNT(*) AS n FROM wal_log WHERE graph_id = ?1 AND replayed = 0")
                .bind(graph_id)
                .fetch_one(&*self.pool)
                .await
                .map_err(backend("count unreplayed wal"))?
                .get("n");
        Ok(count as usize >= SNAPSHOT_WAL_THRESHOLD)
    }

    async fn create_snapshot(&self, graph_id: &str) -> Result<(), StorageError> {
        let graph = self
            .load_graph(graph_id)
            .await?
            .ok_or_else(|| StorageError::NotFound(graph_id.to_string()))?;
        let nodes = self.load_nodes(graph_id).await?;
        let edges = self.load_edges(graph_id).await?;

        let mut state = RecoveredGraphState {
            graph,
            nodes: FxHashMap::default(),
            edges,
        };
        for node in nodes {
            state.nodes.insert(node.node_id.clone(), node);
        }

        let data = recovery::encode_snapshot(&state)?;
        let seq = self.last_seq(graph_id);
        self.save_snapshot(graph_id, seq, &data).await?;

        let cleanup_before = seq - SNAPSHOT_WAL_THRESHOLD as i64;
        if cleanup_before > 0 {
            if let Err(err) = self.cleanup_old_wal(graph_id, cleanup_before).await {
                tracing::warn!(graph_id, error = %err, "failed to clean up old WAL entries");
            }
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
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
            if let Err(err) = self.mark_wal_replayed(graph_id, last_seq).await {
                tracing::warn!(graph_id, error = %err, "failed to mark WAL as replayed");
            }
        }
        tracing::info!(graph_id, last_seq, replayed = entries.len(), "recovered graph");
        Ok(Some(state))
    }

    async fn persist_initial_graph(
        &self,
        graph: &GraphState,
        nodes: &[NodeState],
        edges: &[EdgeState],
    ) -> Result<(), StorageError> {
        // Sequence numbers are reserved up front so the WAL rows inside the
        // transaction stay ordered with concurrent appends.
        let metadata = serde_json::to_string(&graph.metadata)
            .map_err(|e| StorageError::Serde { source: e })?;

        let mut tx = self.pool.begin().await.map_err(backend("tx begin"))?;

        sqlx::query(
            r#"
            INSERT INTO graphs (id, status, metadata)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                metadata = excluded.metadata,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&graph.id)
        .bind(&graph.status)
        .bind(&metadata)
        .execute(&mut *tx)
        .await
        .map_err(backend("save graph"))?;

        let mut wal: Vec<WalEntry> = Vec::with_capacity(1 + nodes.len() + edges.len());
        wal.push(WalEntry::new(
            &graph.id,
            Mutation::CreateGraph(super::wal::CreateGraphPayload {
                graph: graph.clone(),
            }),
            self.next_seq(&graph.id),
        ));

        for node in nodes {
            let config =
                serde_json::to_string(&node.config).map_err(|e| StorageError::Serde { source: e })?;
            sqlx::query(
                r#"
                INSERT INTO nodes (graph_id, node_id, type, config, status, relevance_score, depth, retry_count, last_error)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ON CONFLICT(graph_id, node_id) DO UPDATE SET
                    type = excluded.type,
                    config = excluded.config,
                    status = excluded.status,
                    relevance_score = excluded.relevance_score,
                    depth = excluded.depth,
                    retry_count = excluded.retry_count,
                    last_error = excluded.last_error,
                    updated_at = CURRENT_TIMESTAMP
                "#,
            )
            .bind(&graph.id)
            .bind(&node.node_id)
            .bind(&node.node_type)
            .bind(&config)
            .bind(&node.status)
            .bind(node.relevance_score)
            .bind(node.depth as i64)
            .bind(node.retry_count as i64)
            .bind(&node.last_error)
            .execute(&mut *tx)
            .await
            .map_err(backend("save node"))?;

            wal.push(WalEntry::new(
                &graph.id,
                Mutation::AddNode(super::wal::AddNodePayload { node: node.clone() }),
                self.next_seq(&graph.id),
            ));
        }

        for edge in edges {
            sqlx::query(
                "INSERT OR IGNORE INTO edges (graph_id, from_node, to_node) VALUES (?1, ?2, ?3)",
            )
            .bind(&graph.id)
            .bind(&edge.from)
            .bind(&edge.to)
            .execute(&mut *tx)
            .await
            .map_err(backend("save edge"))?;

            wal.push(WalEntry::new(
                &graph.id,
                Mutation::AddEdge(super::wal::AddEdgePayload {
                    from: edge.from.clone(),
                    to: edge.to.clone(),
                }),
                self.next_seq(&graph.id),
            ));
        }

        for entry in &wal {
            let payload = entry.mutation.encode_payload()?;
            sqlx::query(
                r#"
                INSERT INTO wal_log (graph_id, mutation_type, payload, sequence_num)
                VALUES (?1, ?2, ?3, ?4)
                "#,
            )
            .bind(&entry.graph_id)
            .bind(entry.mutation.kind())
            .bind(&payload)
            .bind(entry.sequence_num)
            .execute(&mut *tx)
            .await
            .map_err(backend("append wal"))?;
        }

        tx.commit().await.map_err(backend("tx commit"))?;
        tracing::info!(
            graph_id = %graph.id,
            nodes = nodes.len(),
            edges = edges.len(),
            "persisted initial graph"
        );
        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.pool.close().await;
        Ok(())
    }
}
