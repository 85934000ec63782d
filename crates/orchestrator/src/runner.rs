use fusion_htlc_metrics::ErrorContext;
use fusion_htlc_retry::{BackpressureError, BackpressureHandler};
use fusion_htlc_types::{SwapKey, SwapStatusReport};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::OrchestratorError;
use crate::orchestrator::SwapOrchestrator;

pub type SwapHandle = JoinHandle<Result<SwapStatusReport, OrchestratorError>>;

/// Runs swaps as independent tokio tasks.
///
/// Concurrency is bounded by a [`BackpressureHandler`]; each running swap
/// keeps a cancel sender here until it finishes.
pub struct SwapRunner {
    orchestrator: Arc<SwapOrchestrator>,
    backpressure: Arc<BackpressureHandler>,
    cancels: Arc<RwLock<HashMap<SwapKey, watch::Sender<bool>>>>,
}

impl SwapRunner {
    pub fn new(orchestrator: Arc<SwapOrchestrator>) -> Self {
        let config = orchestrator.config();
        let backpressure = Arc::new(BackpressureHandler::new(
            config.max_pending_swaps,
            config.max_concurrent_swaps,
        ));
        Self {
            orchestrator,
            backpressure,
            cancels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn orchestrator(&self) -> &Arc<SwapOrchestrator> {
        &self.orchestrator
    }

    /// Start executing a prepared swap in its own task
    pub async fn spawn(&self, key: SwapKey) -> Result<SwapHandle, OrchestratorError> {
        if !self.backpressure.is_accepting() {
            return Err(BackpressureError::QueueFull(self.backpressure.pending()).into());
        }

        let (cancel_tx, cancel_rx) = watch::channel(false);
        {
            let mut cancels = self.cancels.write().await;
            if cancels.contains_key(&key) {
                return Err(OrchestratorError::TaskFailed(format!(
                    "swap {} is already running",
                    key
                )));
            }
            cancels.insert(key, cancel_tx);
        }

        let orchestrator = self.orchestrator.clone();
        let backpressure = self.backpressure.clone();
        let cancels = self.cancels.clone();

        Ok(tokio::spawn(async move {
            let result = backpressure
                .submit(orchestrator.execute(key, cancel_rx))
                .await
                .map_err(OrchestratorError::from)
                .and_then(|inner| inner)
                .with_swap_key(&key);
            cancels.write().await.remove(&key);
            result
        }))
    }

    /// Ask a running swap to stop; returns `false` if it is not running here.
    ///
    /// The swap only honours the request before `FundsVerified`.
    pub async fn request_cancel(&self, key: &SwapKey) -> bool {
        match self.cancels.read().await.get(key) {
            Some(sender) => {
                info!(swap = %key, "Cancellation requested");
                sender.send(true).is_ok()
            }
            None => false,
        }
    }

    pub async fn running(&self) -> Vec<SwapKey> {
        self.cancels.read().await.keys().copied().collect()
    }

    /// Spawn every non-terminal swap found in the registry
    pub async fn resume_all(&self) -> Result<Vec<(SwapKey, SwapHandle)>, OrchestratorError> {
        let active = self.orchestrator.registry().list_active().await?;
        let mut handles = Vec::with_capacity(active.len());

        for state in active {
            match self.spawn(state.key).await {
                Ok(handle) => handles.push((state.key, handle)),
                Err(e) => warn!(swap = %state.key, error = %e, "Could not resume swap"),
            }
        }

        info!(resumed = handles.len(), "Resumed active swaps");
        Ok(handles)
    }

    /// Run the given swaps concurrently and wait for all of them
    pub async fn run_all(
        &self,
        keys: &[SwapKey],
    ) -> Vec<Result<SwapStatusReport, OrchestratorError>> {
        let mut handles = Vec::with_capacity(keys.len());
        for key in keys {
            handles.push(self.spawn(*key).await);
        }

        join_all(handles.into_iter().map(|handle| async move {
            match handle {
                Ok(handle) => handle
                    .await
                    .map_err(|e| OrchestratorError::TaskFailed(e.to_string()))
                    .and_then(|inner| inner),
                Err(e) => Err(e),
            }
        }))
        .await
    }
}
