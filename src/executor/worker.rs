//! Per-node worker task: lock, rate-limit token, checkpointed retry loop.
//!
//! Workers never touch graph state. Lifecycle transitions are reported to
//! the supervisor as [`WorkerEvent`]s; the token and lock are released on
//! every exit path.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::dispatch::{DispatchError, WorkerDispatcher};
use crate::graph::Node;
use crate::limits::{LockManager, RateLimiterManager};
use crate::retry::{backoff_delay, classify, BreakerRegistry, CheckpointStore, RetryMetrics, RetryPolicy};

use super::{NodeInput, NodeOutput, NodeResult};

/// Worker lifecycle events consumed by the supervisor.
#[derive(Debug)]
pub enum WorkerEvent {
    /// A failed attempt is waiting out its backoff; `attempt` is the next
    /// attempt number (1-indexed relative to retries).
    Retrying {
        node_id: String,
        attempt: u32,
        error: String,
    },
    /// Backoff elapsed; the node is about to invoke its worker again.
    Resumed { node_id: String },
    /// The node finished, one way or the other.
    Finished(NodeResult),
}

/// Everything a worker task needs, cloned per spawned node.
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub dispatcher: Arc<dyn WorkerDispatcher>,
    pub policy: RetryPolicy,
    pub breakers: Arc<BreakerRegistry>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub metrics: Arc<RetryMetrics>,
    pub rate_limiters: Arc<RateLimiterManager>,
    pub lock_manager: Option<Arc<LockManager>>,
    pub node_timeout: Duration,
    pub run_id: String,
    pub events: mpsc::Sender<WorkerEvent>,
    pub cancel: watch::Receiver<bool>,
}

async fn invoke(
    dispatcher: &Arc<dyn WorkerDispatcher>,
    input: &NodeInput,
) -> Result<NodeOutput, DispatchError> {
    match input {
        NodeInput::Research(request) => dispatcher
            .research(request.clone())
            .await
            .map(NodeOutput::Claims),
        NodeInput::Verify(request) => dispatcher
            .verify(request.clone())
            .await
            .map(NodeOutput::Verification),
        NodeInput::Synthesize(request) => dispatcher
            .synthesize(request.clone())
            .await
            .map(NodeOutput::Report),
        NodeInput::Invalid(err) => Err(err.clone()),
    }
}

/// Execute one node with locking, rate limiting, and retries, then report
/// the result on the completion channel.
pub(crate) async fn run_node(mut ctx: WorkerContext, node: Node, input: NodeInput) {
    tracing::debug!(node_id = %node.id, node_type = %node.node_type, "executing node");

    let mut lock_held = false;
    if let Some(lock_manager) = &ctx.lock_manager {
        match lock_manager.acquire_with_retry(&node.id, 3).await {
            Ok(true) => lock_held = true,
            Ok(false) => {
                finish(
                    &ctx,
                    &node,
                    Err(DispatchError::Other {
                        message: "node already being executed by another instance".to_string(),
                    }),
                )
                .await;
                return;
            }
            Err(err) => {
                finish(
                    &ctx,
                    &node,
                    Err(DispatchError::Other {
                        message: format!("failed to acquire lock: {err}"),
                    }),
                )
                .await;
                return;
            }
        }
    }

    let limiter = ctx.rate_limiters.limiter(&node.node_type);
    let token = tokio::select! {
        token = limiter.acquire() => Some(token),
        _ = ctx.cancel.changed() => None,
    };
    let Some(token) = token else {
        release_lock(&ctx, &node, lock_held).await;
        finish(&ctx, &node, Err(DispatchError::Cancelled)).await;
        return;
    };

    let start_attempt = match ctx.checkpoints.load(&ctx.run_id, &node.id).await {
        Ok(checkpoint) => checkpoint.attempt_number,
        Err(err) => {
            tracing::warn!(node_id = %node.id, error = %err, "failed to load checkpoint");
            0
        }
    };

    let mut last: Result<NodeOutput, DispatchError> = Err(DispatchError::Other {
        message: "node execution did not run".to_string(),
    });

    let mut attempt = start_attempt;
    'attempts: while attempt <= ctx.policy.max_attempts {
        ctx.metrics.record_attempt(&node.id);

        if !ctx.breakers.should_allow(&node.node_type) {
            ctx.metrics.record_circuit_breaker_hit(&node.id);
            tracing::warn!(
                node_id = %node.id,
                node_type = %node.node_type,
                "circuit breaker open, skipping node"
            );
            last = Err(DispatchError::CircuitOpen(node.node_type.clone()));
            break 'attempts;
        }

        let rpc = invoke(&ctx.dispatcher, &input);
        let outcome = tokio::select! {
            result = tokio::time::timeout(ctx.node_timeout, rpc) => match result {
                Ok(inner) => inner,
                Err(_) => Err(DispatchError::Timeout),
            },
            _ = ctx.cancel.changed() => Err(DispatchError::Cancelled),
        };

        match outcome {
            Ok(output) => {
                ctx.breakers.record_success(&node.node_type);
                ctx.metrics.record_success(&node.id);
                if let Err(err) = ctx.checkpoints.delete(&ctx.run_id, &node.id).await {
                    tracing::warn!(node_id = %node.id, error = %err, "failed to delete checkpoint");
                }
                tracing::debug!(node_id = %node.id, attempt = attempt + 1, "node succeeded");
                last = Ok(output);
                break 'attempts;
            }
            Err(err) => {
                let kind = classify(&err);
                ctx.breakers.record_failure(&node.node_type);
                ctx.metrics.record_failure(&node.id, kind);
                tracing::warn!(
                    node_id = %node.id,
                    attempt = attempt + 1,
                    kind = %kind,
                    error = %err,
                    "node attempt failed"
                );

                if !kind.is_retryable() {
                    last = Err(err);
                    break 'attempts;
                }
                if attempt >= ctx.policy.max_attempts {
                    tracing::warn!(
                        node_id = %node.id,
                        attempts = attempt + 1,
                        "retry attempts exhausted"
                    );
                    last = Err(err);
                    break 'attempts;
                }

                if let Err(save_err) = ctx
                    .checkpoints
                    .save(&ctx.run_id, &node.id, attempt + 1, Some(&err.to_string()))
                    .await
                {
                    tracing::warn!(node_id = %node.id, error = %save_err, "failed to save checkpoint");
                }

                let _ = ctx
                    .events
                    .send(WorkerEvent::Retrying {
                        node_id: node.id.clone(),
                        attempt: attempt + 1,
                        error: err.to_string(),
                    })
                    .await;

                let delay = backoff_delay(&ctx.policy, attempt);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {
                        let _ = ctx
                            .events
                            .send(WorkerEvent::Resumed {
                                node_id: node.id.clone(),
                            })
                            .await;
                    }
                    _ = ctx.cancel.changed() => {
                        last = Err(DispatchError::Cancelled);
                        break 'attempts;
                    }
                }
                last = Err(err);
            }
        }
        attempt += 1;
    }

    drop(token);
    release_lock(&ctx, &node, lock_held).await;
    finish(&ctx, &node, last).await;
}

async fn release_lock(ctx: &WorkerContext, node: &Node, lock_held: bool) {
    if !lock_held {
        return;
    }
    if let Some(lock_manager) = &ctx.lock_manager {
        if let Err(err) = lock_manager.release(&node.id).await {
            tracing::warn!(node_id = %node.id, error = %err, "failed to release node lock");
        }
    }
}

async fn finish(ctx: &WorkerContext, node: &Node, outcome: Result<NodeOutput, DispatchError>) {
    let _ = ctx
        .events
        .send(WorkerEvent::Finished(NodeResult {
            node_id: node.id.clone(),
            outcome,
        }))
        .await;
}
