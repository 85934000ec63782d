//! Core configuration structures for the HTLC swap engine

use fusion_htlc_types::{TimelockOffsets, DEFAULT_MULTI_FILL_PARTS};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Network configuration
    #[serde(default)]
    pub network: NetworkConfig,

    /// Ledger configurations by name
    #[serde(default)]
    pub chains: HashMap<String, ChainConfig>,

    /// Swap execution tuning
    #[serde(default)]
    pub swap: SwapConfig,

    /// Timelock offsets applied to new orders
    #[serde(default)]
    pub timelocks: TimelockOffsets,

    #[serde(default)]
    pub registry: RegistryConfig,
}

impl AppConfig {
    /// Find a chain entry by its numeric chain id
    pub fn chain_by_id(&self, chain_id: u64) -> Option<(&str, &ChainConfig)> {
        self.chains
            .iter()
            .find(|(_, chain)| chain.chain_id == chain_id)
            .map(|(name, chain)| (name.as_str(), chain))
    }
}

/// Network environment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Environment type (mainnet, testnet, local)
    #[serde(default = "default_environment")]
    pub environment: Environment,

    /// Log level or `EnvFilter` directive
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[serde(default)]
    pub log_json: bool,

    /// Enable metrics collection
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

/// Environment types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Mainnet,
    Testnet,
    Local,
}

/// Configuration for one ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Numeric chain id used in order hashes
    pub chain_id: u64,

    /// RPC endpoint URL
    pub rpc_url: String,

    /// Escrow factory contract address (0x-prefixed hex)
    pub escrow_factory: String,

    /// Source escrow implementation cloned by the factory
    pub src_implementation: String,

    /// Destination escrow implementation cloned by the factory
    pub dst_implementation: String,

    /// Request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// Swap execution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapConfig {
    /// Interval between allowance polls in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Allowance polls before giving up on source authorization
    #[serde(default = "default_authorization_max_polls")]
    pub authorization_max_polls: u32,

    /// Interval between clock reads while waiting for a withdrawal window
    #[serde(default = "default_poll_interval_ms")]
    pub timelock_poll_interval_ms: u64,

    /// Clock reads before giving up on a withdrawal window
    #[serde(default = "default_withdrawal_wait_max_polls")]
    pub withdrawal_wait_max_polls: u32,

    /// Attempts for each escrow creation
    #[serde(default = "default_funding_max_attempts")]
    pub funding_max_attempts: u32,

    /// Attempts for the source withdrawal
    #[serde(default = "default_funding_max_attempts")]
    pub source_withdrawal_max_attempts: u32,

    /// Attempts for the destination withdrawal, after the secret is public
    #[serde(default = "default_destination_withdrawal_max_attempts")]
    pub destination_withdrawal_max_attempts: u32,

    /// Resource budget (gas limit) for the first attempt of a ledger call
    #[serde(default = "default_initial_resource_budget")]
    pub initial_resource_budget: u64,

    /// Budget increase in percent when a call runs out of resources
    #[serde(default = "default_budget_bump_pct")]
    pub budget_bump_pct: u32,

    /// Delay between attempts of a ledger call in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Swaps executing at the same time
    #[serde(default = "default_max_concurrent_swaps")]
    pub max_concurrent_swaps: usize,

    /// Swaps accepted but waiting for an execution slot
    #[serde(default = "default_max_pending_swaps")]
    pub max_pending_swaps: u32,

    /// Secrets generated for a multi-fill order
    #[serde(default = "default_multi_fill_parts")]
    pub multi_fill_parts: u32,

    /// Ledger seconds after a creation attempt searched for an escrow whose
    /// response was lost
    #[serde(default = "default_escrow_lookup_window_secs")]
    pub escrow_lookup_window_secs: u64,
}

/// Registry backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryBackend {
    Memory,
    Sqlite,
}

/// Registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_registry_backend")]
    pub backend: RegistryBackend,

    /// Database file, required for the sqlite backend
    #[serde(default)]
    pub path: Option<String>,

    /// Seconds a terminal record is kept before it may be purged
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
}

// Default value functions
fn default_environment() -> Environment {
    Environment::Local
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    30000
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_authorization_max_polls() -> u32 {
    60
}

fn default_withdrawal_wait_max_polls() -> u32 {
    600
}

fn default_funding_max_attempts() -> u32 {
    3
}

fn default_destination_withdrawal_max_attempts() -> u32 {
    6
}

fn default_initial_resource_budget() -> u64 {
    300_000
}

fn default_budget_bump_pct() -> u32 {
    25
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_max_concurrent_swaps() -> usize {
    16
}

fn default_max_pending_swaps() -> u32 {
    256
}

fn default_multi_fill_parts() -> u32 {
    DEFAULT_MULTI_FILL_PARTS
}

fn default_escrow_lookup_window_secs() -> u64 {
    600
}

fn default_registry_backend() -> RegistryBackend {
    RegistryBackend::Memory
}

fn default_retention_secs() -> u64 {
    7 * 24 * 60 * 60 // 1 week
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            log_level: default_log_level(),
            log_json: false,
            metrics_enabled: default_true(),
        }
    }
}

impl Default for SwapConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            authorization_max_polls: default_authorization_max_polls(),
            timelock_poll_interval_ms: default_poll_interval_ms(),
            withdrawal_wait_max_polls: default_withdrawal_wait_max_polls(),
            funding_max_attempts: default_funding_max_attempts(),
            source_withdrawal_max_attempts: default_funding_max_attempts(),
            destination_withdrawal_max_attempts: default_destination_withdrawal_max_attempts(),
            initial_resource_budget: default_initial_resource_budget(),
            budget_bump_pct: default_budget_bump_pct(),
            retry_delay_ms: default_retry_delay_ms(),
            max_concurrent_swaps: default_max_concurrent_swaps(),
            max_pending_swaps: default_max_pending_swaps(),
            multi_fill_parts: default_multi_fill_parts(),
            escrow_lookup_window_secs: default_escrow_lookup_window_secs(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            backend: default_registry_backend(),
            path: None,
            retention_secs: default_retention_secs(),
        }
    }
}
