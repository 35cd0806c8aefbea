use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use deepweave::dispatch::{
    AtomicClaim, CritiqueResult, DecomposeRequest, DispatchError, ResearchRequest, RpcCode,
    SynthesizeRequest, SynthesizeResponse, VerifyRequest, VerifyResponse, WorkerDispatcher,
};
use deepweave::graph::Graph;

type ResearchOutcome = Result<Vec<AtomicClaim>, DispatchError>;

/// Test dispatcher with per-node scripted research outcomes.
///
/// Research calls pop the node's script front-to-back; once the script is
/// drained (or was never set) the call succeeds with one synthetic claim.
/// Verify confirms every claim; synthesize renders a canned report.
#[derive(Default)]
pub struct ScriptedDispatcher {
    research_scripts: Mutex<FxHashMap<String, VecDeque<ResearchOutcome>>>,
    research_calls: Mutex<FxHashMap<String, u32>>,
    decompose_result: Mutex<Option<Result<Graph, DispatchError>>>,
}

impl ScriptedDispatcher {
    pub fn new() -> Self {
        ScriptedDispatcher::default()
    }

    /// Queue outcomes for one researcher node, consumed in order.
    pub fn script_research(&self, node_id: &str, outcomes: Vec<ResearchOutcome>) {
        self.research_scripts
            .lock()
            .insert(node_id.to_string(), outcomes.into());
    }

    /// How many research calls the node received.
    pub fn research_calls(&self, node_id: &str) -> u32 {
        self.research_calls
            .lock()
            .get(node_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn set_decompose(&self, result: Result<Graph, DispatchError>) {
        *self.decompose_result.lock() = Some(result);
    }

    pub fn default_claim(node_id: &str, query: &str) -> AtomicClaim {
        AtomicClaim {
            id: format!("{node_id}-claim-0"),
            text: format!("finding for '{query}'"),
            source_node_id: node_id.to_string(),
            confidence: 0.9,
        }
    }
}

#[async_trait]
impl WorkerDispatcher for ScriptedDispatcher {
    async fn decompose(&self, _request: DecomposeRequest) -> Result<Graph, DispatchError> {
        self.decompose_result
            .lock()
            .take()
            .unwrap_or_else(|| {
                Err(DispatchError::Status {
                    code: RpcCode::Unimplemented,
                    message: "decompose not scripted".to_string(),
                })
            })
    }

    async fn research(&self, request: ResearchRequest) -> Result<Vec<AtomicClaim>, DispatchError> {
        *self
            .research_calls
            .lock()
            .entry(request.source_node_id.clone())
            .or_insert(0) += 1;

        if let Some(script) = self
            .research_scripts
            .lock()
            .get_mut(&request.source_node_id)
        {
            if let Some(outcome) = script.pop_front() {
                return outcome;
            }
        }
        Ok(vec![Self::default_claim(
            &request.source_node_id,
            &request.query,
        )])
    }

    async fn verify(&self, request: VerifyRequest) -> Result<VerifyResponse, DispatchError> {
        let results: Vec<CritiqueResult> = request
            .claims
            .iter()
            .map(|claim| CritiqueResult {
                claim: claim.clone(),
                verified: true,
                rationale: "supported by retrieved evidence".to_string(),
            })
            .collect();
        let verified_count = results.len() as u32;
        Ok(VerifyResponse {
            results,
            verified_count,
        })
    }

    async fn synthesize(
        &self,
        request: SynthesizeRequest,
    ) -> Result<SynthesizeResponse, DispatchError> {
        Ok(SynthesizeResponse {
            report: format!(
                "synthesized report over {} verified findings",
                request.verification_results.len()
            ),
            artifact_uri: format!("file:///tmp/{}-report.md", request.run_id),
        })
    }
}

/// Convenience constructors for dispatch errors used across tests.
pub fn deadline_exceeded() -> DispatchError {
    DispatchError::Status {
        code: RpcCode::DeadlineExceeded,
        message: "deadline exceeded".to_string(),
    }
}

pub fn invalid_argument() -> DispatchError {
    DispatchError::Status {
        code: RpcCode::InvalidArgument,
        message: "query must not be empty".to_string(),
    }
}

pub fn unavailable() -> DispatchError {
    DispatchError::Status {
        code: RpcCode::Unavailable,
        message: "service unavailable".to_string(),
    }
}
