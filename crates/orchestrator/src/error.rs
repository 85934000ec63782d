use fusion_htlc_config::ConfigError;
use fusion_htlc_registry::RegistryError;
use fusion_htlc_retry::BackpressureError;
use fusion_htlc_types::{ImmutablesError, OrderError, SwapKey, TimelockError, ValidationError};
use thiserror::Error;

use crate::ledger::LedgerError;

/// Errors returned to callers of the orchestrator.
///
/// Ledger failures during execution do not surface here: they end the swap
/// in `SwapStatus::Failed` and are read back from the registry.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("no ledger configured for chain {0}")]
    UnknownChain(u64),

    #[error("fill {0} already exists")]
    DuplicateFill(SwapKey),

    #[error("swap not found: {0}")]
    SwapNotFound(SwapKey),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("backpressure: {0}")]
    Backpressure(#[from] BackpressureError),

    #[error("missing required field: {field}")]
    MissingField { field: String },

    #[error("swap task failed: {0}")]
    TaskFailed(String),
}

impl From<OrderError> for OrchestratorError {
    fn from(err: OrderError) -> Self {
        OrchestratorError::Validation(err.into())
    }
}

impl From<TimelockError> for OrchestratorError {
    fn from(err: TimelockError) -> Self {
        OrchestratorError::Validation(err.into())
    }
}

impl From<ImmutablesError> for OrchestratorError {
    fn from(err: ImmutablesError) -> Self {
        OrchestratorError::Validation(err.into())
    }
}
