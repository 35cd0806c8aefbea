//! Concurrency primitives: per-node-type rate limits and node locks.

pub mod locks;

pub use locks::{InMemoryLock, LockError, LockManager, LockProvider, NodeLock};

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Capacity handed to node types without an explicit limit.
const UNLIMITED_CAPACITY: usize = 1000;

/// Bounded token bucket for one node type.
///
/// Tokens are RAII permits: dropping a [`RateToken`] releases its slot, so
/// a release without a matching acquire cannot be expressed.
#[derive(Debug)]
pub struct RateLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// Held token; the slot frees on drop.
#[derive(Debug)]
pub struct RateToken {
    _permit: OwnedSemaphorePermit,
}

impl RateLimiter {
    /// A limiter with `max_concurrent` tokens (clamped to at least 1).
    #[must_use]
    pub fn new(max_concurrent: usize) -> Self {
        let capacity = max_concurrent.max(1);
        RateLimiter {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a token. Callers that need cancellation race this future
    /// against their cancel signal.
    pub async fn acquire(&self) -> RateToken {
        // The semaphore is never closed, so acquisition cannot fail.
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .unwrap_or_else(|_| unreachable!("rate limiter semaphore closed"));
        RateToken { _permit: permit }
    }

    /// Take a token without blocking.
    #[must_use]
    pub fn try_acquire(&self) -> Option<RateToken> {
        self.semaphore
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| RateToken { _permit: permit })
    }

    /// Tokens currently free.
    #[must_use]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Configured capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Rate limiters keyed by node type.
#[derive(Debug, Default)]
pub struct RateLimiterManager {
    limiters: RwLock<FxHashMap<String, Arc<RateLimiter>>>,
}

impl RateLimiterManager {
    /// Seed the manager from `(node_type, capacity)` pairs.
    #[must_use]
    pub fn new(limits: impl IntoIterator<Item = (String, usize)>) -> Self {
        let mut map = FxHashMap::default();
        for (node_type, capacity) in limits {
            map.insert(node_type, Arc::new(RateLimiter::new(capacity)));
        }
        RateLimiterManager {
            limiters: RwLock::new(map),
        }
    }

    /// The limiter for a node type; unknown types get a high-capacity
    /// limiter so they are effectively unlimited.
    pub fn limiter(&self, node_type: &str) -> Arc<RateLimiter> {
        if let Some(limiter) = self.limiters.read().get(node_type) {
            return limiter.clone();
        }
        let mut limiters = self.limiters.write();
        limiters
            .entry(node_type.to_string())
            .or_insert_with(|| Arc::new(RateLimiter::new(UNLIMITED_CAPACITY)))
            .clone()
    }

    /// Set or replace the limiter for a node type.
    pub fn set_limit(&self, node_type: &str, max_concurrent: usize) {
        self.limiters.write().insert(
            node_type.to_string(),
            Arc::new(RateLimiter::new(max_concurrent)),
        );
    }
}
