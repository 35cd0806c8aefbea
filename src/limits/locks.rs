//! Node-level locks: at most one worker executes a given node id.
//!
//! The lock backend is pluggable by configuration. The in-memory backend is
//! the single-instance default; the etcd and redis providers are stubs for
//! an external coordinator and report [`LockError::Unsupported`], which the
//! manager treats as a reason to fall back to memory.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use miette::Diagnostic;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use thiserror::Error;

/// Lock backend selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LockProvider {
    #[default]
    None,
    Memory,
    Etcd,
    Redis,
}

impl LockProvider {
    /// Parse the `LOCK_PROVIDER` configuration value; unknown strings fall
    /// back to `None`.
    #[must_use]
    pub fn parse(s: &str) -> LockProvider {
        match s.to_lowercase().as_str() {
            "memory" => LockProvider::Memory,
            "etcd" => LockProvider::Etcd,
            "redis" => LockProvider::Redis,
            _ => LockProvider::None,
        }
    }
}

/// Errors from lock backends.
#[derive(Debug, Error, Diagnostic)]
pub enum LockError {
    #[error("lock provider '{0}' is not implemented")]
    #[diagnostic(
        code(deepweave::locks::unsupported),
        help("The manager falls back to the in-memory lock when a provider is unavailable.")
    )]
    Unsupported(&'static str),

    #[error("lock for node {0} does not exist")]
    #[diagnostic(code(deepweave::locks::not_held))]
    NotHeld(String),

    #[error("lock backend error: {0}")]
    #[diagnostic(code(deepweave::locks::backend))]
    Backend(String),
}

/// Exclusive, TTL-bounded lock per node id.
#[async_trait]
pub trait NodeLock: Send + Sync {
    /// Try to take the lock; `Ok(false)` means it is held elsewhere.
    async fn acquire(&self, node_id: &str, ttl: Duration) -> Result<bool, LockError>;
    async fn release(&self, node_id: &str) -> Result<(), LockError>;
    async fn extend(&self, node_id: &str, ttl: Duration) -> Result<(), LockError>;
}

/// Single-instance in-memory lock table with a background expiry sweep.
#[derive(Debug, Default)]
pub struct InMemoryLock {
    locks: Arc<Mutex<FxHashMap<String, Instant>>>,
}

impl InMemoryLock {
    /// Create the lock table and start the expiry sweeper. Must be called
    /// from within a tokio runtime.
    #[must_use]
    pub fn new() -> Self {
        let locks: Arc<Mutex<FxHashMap<String, Instant>>> = Arc::default();
        let sweep = Arc::downgrade(&locks);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(10));
            loop {
                interval.tick().await;
                let Some(locks) = sweep.upgrade() else {
                    break;
                };
                let now = Instant::now();
                locks.lock().retain(|_, expires_at| *expires_at > now);
            }
        });
        InMemoryLock { locks }
    }
}

#[async_trait]
impl NodeLock for InMemoryLock {
    async fn acquire(&self, node_id: &str, ttl: Duration) -> Result<bool, LockError> {
        let mut locks = self.locks.lock();
        if let Some(expires_at) = locks.get(node_id) {
            if Instant::now() < *expires_at {
                return Ok(false);
            }
            locks.remove(node_id);
        }
        locks.insert(node_id.to_string(), Instant::now() + ttl);
        Ok(true)
    }

    async fn release(&self, node_id: &str) -> Result<(), LockError> {
        if self.locks.lock().remove(node_id).is_none() {
            return Err(LockError::NotHeld(node_id.to_string()));
        }
        Ok(())
    }

    async fn extend(&self, node_id: &str, ttl: Duration) -> Result<(), LockError> {
        match self.locks.lock().get_mut(node_id) {
            Some(expires_at) => {
                *expires_at = Instant::now() + ttl;
                Ok(())
            }
            None => Err(LockError::NotHeld(node_id.to_string())),
        }
    }
}

/// etcd-backed lock; stub until an external coordinator is wired in.
#[derive(Debug)]
pub struct EtcdLock;

impl EtcdLock {
    pub fn connect(_endpoints: &str) -> Result<Self, LockError> {
        Err(LockError::Unsupported("etcd"))
    }
}

/// redis-backed lock; stub until an external coordinator is wired in.
#[derive(Debug)]
pub struct RedisLock;

impl RedisLock {
    pub fn connect(_addr: &str) -> Result<Self, LockError> {
        Err(LockError::Unsupported("redis"))
    }
}

/// Provider-selected lock facade with bounded-retry acquisition.
pub struct LockManager {
    lock: Arc<dyn NodeLock>,
    provider: LockProvider,
    ttl: Duration,
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager")
            .field("provider", &self.provider)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl LockManager {
    /// Build the configured backend. Unavailable external providers fall
    /// back to the in-memory table.
    #[must_use]
    pub fn new(provider: LockProvider, ttl: Duration) -> Self {
        let (lock, provider): (Arc<dyn NodeLock>, LockProvider) = match provider {
            LockProvider::Etcd => match EtcdLock::connect("") {
                Ok(_) => unreachable!("etcd lock is a stub"),
                Err(err) => {
                    tracing::warn!(error = %err, "falling back to in-memory lock");
                    (Arc::new(InMemoryLock::new()), LockProvider::Memory)
                }
            },
            LockProvider::Redis => match RedisLock::connect("") {
                Ok(_) => unreachable!("redis lock is a stub"),
                Err(err) => {
                    tracing::warn!(error = %err, "falling back to in-memory lock");
                    (Arc::new(InMemoryLock::new()), LockProvider::Memory)
                }
            },
            LockProvider::None | LockProvider::Memory => {
                (Arc::new(InMemoryLock::new()), LockProvider::Memory)
            }
        };
        LockManager {
            lock,
            provider,
            ttl,
        }
    }

    #[must_use]
    pub fn provider(&self) -> LockProvider {
        self.provider
    }

    pub async fn acquire(&self, node_id: &str) -> Result<bool, LockError> {
        self.lock.acquire(node_id, self.ttl).await
    }

    /// Acquire with doubling backoff between attempts (100ms start, 5s cap).
    pub async fn acquire_with_retry(
        &self,
        node_id: &str,
        max_retries: u32,
    ) -> Result<bool, LockError> {
        let mut backoff = Duration::from_millis(100);
        for _ in 0..max_retries {
            if self.acquire(node_id).await? {
                return Ok(true);
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(Duration::from_secs(5));
        }
        Ok(false)
    }

    pub async fn release(&self, node_id: &str) -> Result<(), LockError> {
        self.lock.release(node_id).await
    }

    pub async fn extend(&self, node_id: &str) -> Result<(), LockError> {
        self.lock.extend(node_id, self.ttl).await
    }
}
