//! Orchestrator server entry point.
//!
//! Wires environment settings into a [`DagExecutor`] backed by SQLite
//! storage and serves the HTTP control surface. The worker dispatcher is
//! transport-specific and must be provided by the deployment; this binary
//! starts with the unconfigured dispatcher, which fails every call with
//! `Unimplemented` until endpoints are wired in.

use std::sync::Arc;

use async_trait::async_trait;
use deepweave::config::Settings;
use deepweave::dispatch::{
    DecomposeRequest, DispatchError, ResearchRequest, RpcCode, SynthesizeRequest, VerifyRequest,
    WorkerDispatcher,
};
use deepweave::executor::DagExecutor;
use deepweave::graph::Graph;
use deepweave::limits::{LockManager, LockProvider};
use deepweave::retry::FileCheckpointStore;
use deepweave::server::{serve, AppState};
use deepweave::storage::SqliteStorage;
use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

/// Placeholder dispatcher: every call reports `Unimplemented` with the
/// endpoint that would have been called.
struct UnconfiguredDispatcher {
    settings: Settings,
}

impl UnconfiguredDispatcher {
    fn unimplemented(&self, service: &str, addr: &str) -> DispatchError {
        DispatchError::Status {
            code: RpcCode::Unimplemented,
            message: format!("{service} transport not wired (configured endpoint: {addr})"),
        }
    }
}

#[async_trait]
impl WorkerDispatcher for UnconfiguredDispatcher {
    async fn decompose(&self, _request: DecomposeRequest) -> Result<Graph, DispatchError> {
        Err(self.unimplemented("principal", &self.settings.principal_addr))
    }

    async fn research(
        &self,
        _request: ResearchRequest,
    ) -> Result<Vec<deepweave::dispatch::AtomicClaim>, DispatchError> {
        Err(self.unimplemented("researcher", &self.settings.researcher_addr))
    }

    async fn verify(
        &self,
        _request: VerifyRequest,
    ) -> Result<deepweave::dispatch::VerifyResponse, DispatchError> {
        Err(self.unimplemented("critic", &self.settings.critic_addr))
    }

    async fn synthesize(
        &self,
        _request: SynthesizeRequest,
    ) -> Result<deepweave::dispatch::SynthesizeResponse, DispatchError> {
        Err(self.unimplemented("synthesizer", &self.settings.synthesizer_addr))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let settings = Settings::from_env();
    let dispatcher: Arc<dyn WorkerDispatcher> = Arc::new(UnconfiguredDispatcher {
        settings: settings.clone(),
    });

    let mut executor = DagExecutor::new(dispatcher.clone(), settings.clone());
    match SqliteStorage::connect(&settings.db_path).await {
        Ok(storage) => {
            executor = executor.with_storage(Arc::new(storage));
            tracing::info!(path = %settings.db_path, "persistent storage enabled");
        }
        Err(err) => {
            tracing::warn!(error = %err, "failed to initialize storage, running in-memory only");
        }
    }
    match FileCheckpointStore::new("./checkpoints") {
        Ok(store) => executor = executor.with_checkpoint_store(Arc::new(store)),
        Err(err) => {
            tracing::warn!(error = %err, "failed to initialize checkpoint store, using in-memory");
        }
    }
    if settings.lock_provider != LockProvider::None {
        executor = executor.with_lock_manager(Arc::new(LockManager::new(
            settings.lock_provider,
            settings.lock_timeout,
        )));
    }

    let state = AppState {
        executor: Arc::new(executor),
        dispatcher,
    };
    serve(state, "0.0.0.0:50055").await?;
    Ok(())
}
