//! Cross-ledger HTLC swap engine
//!
//! Facade over the workspace crates plus the wiring that turns an
//! [`AppConfig`] and one [`LedgerClient`] per chain into a running
//! [`SwapRunner`].
//!
//! ```ignore
//! let app = ConfigLoader::from_file("config/testnet.toml")?;
//! fusion_htlc::init_logging(&app)?;
//! let runner = fusion_htlc::bootstrap(&app, resolver, clients).await?;
//! runner.resume_all().await?;
//! ```

pub use fusion_htlc_config as config;
pub use fusion_htlc_metrics as metrics;
pub use fusion_htlc_orchestrator as orchestrator;
pub use fusion_htlc_registry as registry;
pub use fusion_htlc_retry as retry;
pub use fusion_htlc_types as types;

use fusion_htlc_config::{validate_config, AppConfig};
use fusion_htlc_metrics::{init_tracing, MetricsCollector, TracingError};
use fusion_htlc_orchestrator::{
    escrow_factories, open_registry, LedgerClient, OrchestratorConfig, OrchestratorError,
    SwapOrchestrator, SwapRunner,
};
use fusion_htlc_types::Address;
use std::sync::Arc;
use tracing::info;

/// Install the tracing subscriber described by `network.log_level` and
/// `network.log_json`
pub fn init_logging(app: &AppConfig) -> Result<(), TracingError> {
    init_tracing(&app.network.log_level, app.network.log_json)
}

/// Validate `app`, open its registry and build a runner over `clients`.
///
/// Every client must belong to a configured chain.
pub async fn bootstrap(
    app: &AppConfig,
    resolver: Address,
    clients: Vec<Arc<dyn LedgerClient>>,
) -> Result<SwapRunner, OrchestratorError> {
    validate_config(app)?;

    let factories = escrow_factories(app)?;
    let registry = open_registry(&app.registry).await?;
    let metrics = if app.network.metrics_enabled {
        MetricsCollector::new()
    } else {
        MetricsCollector::disabled()
    };

    let mut builder = SwapOrchestrator::builder()
        .with_registry(registry)
        .with_resolver(resolver)
        .with_config(OrchestratorConfig::from_app_config(app))
        .with_metrics(metrics);

    for client in clients {
        let chain_id = client.chain_id();
        let factory = factories
            .get(&chain_id)
            .copied()
            .ok_or(OrchestratorError::UnknownChain(chain_id))?;
        builder = builder.with_ledger(client, factory);
    }

    let orchestrator = builder.build()?;
    info!(
        environment = ?app.network.environment,
        chains = factories.len(),
        registry = ?app.registry.backend,
        "Swap engine ready"
    );
    Ok(SwapRunner::new(Arc::new(orchestrator)))
}
