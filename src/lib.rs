//! ```text
//! HTTP /execute ─► decompose ─► DagExecutor::execute
//!                               │
//!                               ├─► Graph (validate / readiness / schedule)
//!                               │     │
//!                               │     └─► Storage (WAL-before-apply, snapshots)
//!                               │
//!                               └─► worker tasks ─► WorkerDispatcher (typed RPC)
//!                                     │
//!                                     ├─► RateLimiter / NodeLockManager
//!                                     └─► retry loop (classifier, backoff,
//!                                          circuit breaker, checkpoints)
//! ```
//!
//! Deepweave is a durable, concurrent DAG execution engine for long-running
//! agent pipelines: typed task graphs, dependency-aware parallel scheduling,
//! classified retries with per-service circuit breaking, and a write-ahead
//! logged state store whose replay reconstructs a crashed run exactly.

pub mod config;
pub mod dispatch;
pub mod executor;
pub mod graph;
pub mod limits;
pub mod retry;
pub mod server;
pub mod storage;
pub mod types;
