//! Configuration validation

use crate::{AppConfig, ChainConfig, ConfigError, RegistryBackend, Result};
use fusion_htlc_types::{Address, EscrowFactory};
use std::collections::HashMap;
use std::str::FromStr;

/// Validation error details
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate the entire application configuration
pub fn validate_config(config: &AppConfig) -> Result<()> {
    let errors = collect_errors(config);

    if !errors.is_empty() {
        let error_msg = errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(ConfigError::ValidationError(error_msg));
    }

    Ok(())
}

/// Every problem found in `config`, in field order
pub fn collect_errors(config: &AppConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    // Validate network config
    if let Err(e) = validate_log_level(&config.network.log_level) {
        errors.push(e);
    }

    // Validate chains
    let mut seen_ids: HashMap<u64, &str> = HashMap::new();
    for (chain_name, chain_config) in &config.chains {
        if let Err(e) = validate_chain_config(chain_config) {
            errors.push(ValidationError::new(format!("chains.{chain_name}"), e));
        }

        if let Some(other) = seen_ids.insert(chain_config.chain_id, chain_name) {
            errors.push(ValidationError::new(
                format!("chains.{chain_name}.chain_id"),
                format!(
                    "chain id {} already used by '{other}'",
                    chain_config.chain_id
                ),
            ));
        }
    }

    // Validate swap config
    let swap = &config.swap;
    for (field, value) in [
        ("swap.poll_interval_ms", swap.poll_interval_ms),
        ("swap.timelock_poll_interval_ms", swap.timelock_poll_interval_ms),
        ("swap.initial_resource_budget", swap.initial_resource_budget),
        ("swap.max_concurrent_swaps", swap.max_concurrent_swaps as u64),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be greater than 0"));
        }
    }

    for (field, value) in [
        ("swap.authorization_max_polls", swap.authorization_max_polls),
        ("swap.withdrawal_wait_max_polls", swap.withdrawal_wait_max_polls),
        ("swap.funding_max_attempts", swap.funding_max_attempts),
        (
            "swap.source_withdrawal_max_attempts",
            swap.source_withdrawal_max_attempts,
        ),
        (
            "swap.destination_withdrawal_max_attempts",
            swap.destination_withdrawal_max_attempts,
        ),
        ("swap.multi_fill_parts", swap.multi_fill_parts),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be greater than 0"));
        }
    }

    if swap.destination_withdrawal_max_attempts < swap.source_withdrawal_max_attempts {
        errors.push(ValidationError::new(
            "swap.destination_withdrawal_max_attempts",
            "must be >= source_withdrawal_max_attempts",
        ));
    }

    // Validate timelocks
    if let Err(e) = config.timelocks.validate() {
        errors.push(ValidationError::new("timelocks", e.to_string()));
    }

    // Validate registry config
    if config.registry.backend == RegistryBackend::Sqlite
        && config.registry.path.as_deref().map_or(true, str::is_empty)
    {
        errors.push(ValidationError::new(
            "registry.path",
            "path is required for the sqlite backend",
        ));
    }

    errors
}

/// Validate a chain configuration
pub fn validate_chain_config(chain: &ChainConfig) -> std::result::Result<(), String> {
    if chain.chain_id == 0 {
        return Err("chain_id must be greater than 0".to_string());
    }

    validate_url(&chain.rpc_url)?;

    for (field, value) in [
        ("escrow_factory", &chain.escrow_factory),
        ("src_implementation", &chain.src_implementation),
        ("dst_implementation", &chain.dst_implementation),
    ] {
        parse_address(value).map_err(|e| format!("{field}: {e}"))?;
    }

    if chain.timeout_ms == 0 {
        return Err("timeout_ms must be greater than 0".to_string());
    }

    Ok(())
}

/// Validate a URL
pub fn validate_url(url: &str) -> std::result::Result<(), String> {
    if url.is_empty() {
        return Err("URL cannot be empty".to_string());
    }

    // Basic URL validation - check for scheme
    if !url.starts_with("http://")
        && !url.starts_with("https://")
        && !url.starts_with("ws://")
        && !url.starts_with("wss://")
    {
        return Err("URL must start with http://, https://, ws://, or wss://".to_string());
    }

    Ok(())
}

/// Parse a 0x-prefixed, non-zero 20-byte address
pub fn parse_address(value: &str) -> std::result::Result<Address, String> {
    if !value.starts_with("0x") || value.len() != 42 {
        return Err(format!("'{value}' is not a 0x-prefixed 20-byte address"));
    }

    let address = Address::from_str(value).map_err(|e| format!("'{value}': {e}"))?;
    if address.is_zero() {
        return Err("address must not be zero".to_string());
    }
    Ok(address)
}

impl ChainConfig {
    /// Escrow factory descriptor for this chain
    pub fn factory(&self) -> Result<EscrowFactory> {
        let parse = |field: &str, value: &str| {
            parse_address(value)
                .map_err(|e| ConfigError::ValidationError(format!("{field}: {e}")))
        };

        Ok(EscrowFactory {
            address: parse("escrow_factory", &self.escrow_factory)?,
            src_implementation: parse("src_implementation", &self.src_implementation)?,
            dst_implementation: parse("dst_implementation", &self.dst_implementation)?,
        })
    }
}

/// Validate log level
fn validate_log_level(level: &str) -> std::result::Result<(), ValidationError> {
    match level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ValidationError::new(
            "network.log_level",
            format!(
                "invalid log level '{level}', must be one of: trace, debug, info, warn, error"
            ),
        )),
    }
}
