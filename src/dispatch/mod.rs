//! Typed worker dispatch: the single seam between the engine and the four
//! remote semantic workers.
//!
//! The engine never reasons about task semantics; it hands a typed request
//! to the [`WorkerDispatcher`] and records the typed response. Adding a new
//! node type is one insertion in the executor's dispatch match plus a typed
//! payload here. Transports live behind the trait; errors must surface a
//! structured [`RpcCode`] so retry classification stays accurate.

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::graph::Graph;

/// Structured status codes surfaced by worker RPC errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RpcCode {
    Unavailable,
    DeadlineExceeded,
    ResourceExhausted,
    Aborted,
    Internal,
    Unknown,
    InvalidArgument,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    Unauthenticated,
    FailedPrecondition,
    OutOfRange,
    Unimplemented,
    Cancelled,
}

/// Errors surfaced by worker dispatch, shaped for classification.
#[derive(Clone, Debug, Error, Diagnostic)]
pub enum DispatchError {
    #[error("worker returned {code:?}: {message}")]
    #[diagnostic(code(deepweave::dispatch::status))]
    Status { code: RpcCode, message: String },

    #[error("deadline exceeded waiting for worker")]
    #[diagnostic(code(deepweave::dispatch::timeout))]
    Timeout,

    #[error("worker call cancelled")]
    #[diagnostic(code(deepweave::dispatch::cancelled))]
    Cancelled,

    #[error("connection error: {message}")]
    #[diagnostic(code(deepweave::dispatch::connection))]
    Connection { message: String },

    #[error("unknown node type: {0}")]
    #[diagnostic(
        code(deepweave::dispatch::unknown_node_type),
        help("Register the node type with the dispatcher before submitting graphs that use it.")
    )]
    UnknownNodeType(String),

    #[error("invalid worker input: {0}")]
    #[diagnostic(code(deepweave::dispatch::invalid_input))]
    InvalidInput(String),

    #[error("circuit breaker open for service type {0}")]
    #[diagnostic(code(deepweave::dispatch::circuit_open))]
    CircuitOpen(String),

    #[error("{message}")]
    #[diagnostic(code(deepweave::dispatch::other))]
    Other { message: String },
}

/// Query decomposition request (engine -> decomposer).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DecomposeRequest {
    pub query: String,
    #[serde(default)]
    pub context: FxHashMap<String, String>,
    pub run_id: String,
}

/// Research request (engine -> researcher worker).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResearchRequest {
    pub query: String,
    pub source_node_id: String,
    pub run_id: String,
    #[serde(default)]
    pub config: FxHashMap<String, String>,
}

/// A single factual claim extracted by a researcher.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AtomicClaim {
    pub id: String,
    pub text: String,
    pub source_node_id: String,
    #[serde(default)]
    pub confidence: f64,
}

/// Verification request (engine -> critic worker).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VerifyRequest {
    pub claims: Vec<AtomicClaim>,
    pub task: String,
    pub run_id: String,
}

/// Verdict for one claim.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CritiqueResult {
    pub claim: AtomicClaim,
    pub verified: bool,
    #[serde(default)]
    pub rationale: String,
}

/// Critic response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub results: Vec<CritiqueResult>,
    pub verified_count: u32,
}

/// Synthesis request (engine -> synthesizer worker).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SynthesizeRequest {
    pub verification_results: Vec<CritiqueResult>,
    #[serde(default)]
    pub context: FxHashMap<String, String>,
    pub run_id: String,
}

/// Synthesizer response: the final report plus an artifact location.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SynthesizeResponse {
    pub report: String,
    #[serde(default)]
    pub artifact_uri: String,
}

/// The typed RPC surface consumed by the engine.
///
/// Every call must honor cancellation and deadlines on the transport side;
/// the engine additionally bounds each invocation with its per-node
/// execution timeout.
#[async_trait]
pub trait WorkerDispatcher: Send + Sync {
    async fn decompose(&self, request: DecomposeRequest) -> Result<Graph, DispatchError>;
    async fn research(&self, request: ResearchRequest) -> Result<Vec<AtomicClaim>, DispatchError>;
    async fn verify(&self, request: VerifyRequest) -> Result<VerifyResponse, DispatchError>;
    async fn synthesize(
        &self,
        request: SynthesizeRequest,
    ) -> Result<SynthesizeResponse, DispatchError>;
}
