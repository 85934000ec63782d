use fusion_htlc_config::{AppConfig, ConfigError, RegistryBackend, RegistryConfig, SwapConfig};
use fusion_htlc_registry::{InMemoryRegistry, SqliteRegistry, SwapRegistry};
use fusion_htlc_retry::{ResourceBudget, RetryPolicy};
use fusion_htlc_types::EscrowFactory;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::OrchestratorError;

/// Runtime knobs for swap execution
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Interval between source allowance polls
    pub poll_interval: Duration,
    pub authorization_max_polls: u32,

    /// Interval between ledger clock reads while waiting for a timelock
    pub timelock_poll_interval: Duration,
    pub withdrawal_wait_max_polls: u32,

    /// Escrow creation on either side
    pub funding_retry: RetryPolicy,
    pub source_withdrawal_retry: RetryPolicy,
    /// Higher attempt bound: the secret is already public at this point
    pub destination_withdrawal_retry: RetryPolicy,

    /// Ledger seconds after a creation attempt searched for its escrow
    pub escrow_lookup_window_secs: u64,

    pub max_concurrent_swaps: u32,
    pub max_pending_swaps: u32,

    /// How long terminal records are kept before purging
    pub retention_secs: u64,
}

impl OrchestratorConfig {
    pub fn from_swap_config(swap: &SwapConfig) -> Self {
        let delay = Duration::from_millis(swap.retry_delay_ms);
        let budget = ResourceBudget(swap.initial_resource_budget);
        let policy = |attempts: u32| {
            RetryPolicy::new(attempts, budget)
                .with_budget_bump_pct(swap.budget_bump_pct)
                .with_delay(delay)
        };

        Self {
            poll_interval: Duration::from_millis(swap.poll_interval_ms),
            authorization_max_polls: swap.authorization_max_polls,
            timelock_poll_interval: Duration::from_millis(swap.timelock_poll_interval_ms),
            withdrawal_wait_max_polls: swap.withdrawal_wait_max_polls,
            funding_retry: policy(swap.funding_max_attempts),
            source_withdrawal_retry: policy(swap.source_withdrawal_max_attempts),
            destination_withdrawal_retry: policy(swap.destination_withdrawal_max_attempts),
            escrow_lookup_window_secs: swap.escrow_lookup_window_secs,
            max_concurrent_swaps: u32::try_from(swap.max_concurrent_swaps).unwrap_or(u32::MAX),
            max_pending_swaps: swap.max_pending_swaps,
            retention_secs: RegistryConfig::default().retention_secs,
        }
    }

    pub fn from_app_config(app: &AppConfig) -> Self {
        Self {
            retention_secs: app.registry.retention_secs,
            ..Self::from_swap_config(&app.swap)
        }
    }

    /// Same policies with every delay shortened to `interval`; handy for tests
    pub fn with_intervals(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self.timelock_poll_interval = interval;
        self.funding_retry.delay = interval;
        self.source_withdrawal_retry.delay = interval;
        self.destination_withdrawal_retry.delay = interval;
        self
    }

    pub fn with_authorization_max_polls(mut self, polls: u32) -> Self {
        self.authorization_max_polls = polls;
        self
    }

    pub fn with_withdrawal_wait_max_polls(mut self, polls: u32) -> Self {
        self.withdrawal_wait_max_polls = polls;
        self
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from_swap_config(&SwapConfig::default())
    }
}

/// Escrow factory descriptor for every configured chain, keyed by chain id
pub fn escrow_factories(app: &AppConfig) -> Result<HashMap<u64, EscrowFactory>, ConfigError> {
    app.chains
        .values()
        .map(|chain| Ok((chain.chain_id, chain.factory()?)))
        .collect()
}

/// Open the registry backend named in the configuration
pub async fn open_registry(
    config: &RegistryConfig,
) -> Result<Arc<dyn SwapRegistry>, OrchestratorError> {
    match config.backend {
        RegistryBackend::Memory => Ok(Arc::new(InMemoryRegistry::new())),
        RegistryBackend::Sqlite => {
            let path = config.path.as_deref().ok_or_else(|| {
                ConfigError::ValidationError("registry.path is required for sqlite".to_string())
            })?;
            Ok(Arc::new(SqliteRegistry::new(path).await?))
        }
    }
}
