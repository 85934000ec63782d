//! Configuration loading from multiple sources

use crate::{AppConfig, ConfigError, Result};
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use std::path::Path;

/// Prefix for environment variable overrides
pub const ENV_PREFIX: &str = "FUSION_HTLC";

/// Configuration loader with support for multiple formats and sources
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a file
    ///
    /// Supports TOML, YAML, and JSON formats based on file extension
    pub fn from_file(path: &Path) -> Result<AppConfig> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| ConfigError::LoadError("No file extension found".to_string()))?;

        let content = std::fs::read_to_string(path)?;

        match extension {
            "toml" => Self::from_toml(&content),
            "yaml" | "yml" => Self::from_yaml(&content),
            "json" => Self::from_json(&content),
            _ => Err(ConfigError::LoadError(format!(
                "Unsupported file extension: {}",
                extension
            ))),
        }
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<AppConfig> {
        toml::from_str(content).map_err(ConfigError::from)
    }

    /// Load configuration from YAML string
    pub fn from_yaml(content: &str) -> Result<AppConfig> {
        serde_yaml::from_str(content).map_err(ConfigError::from)
    }

    /// Load configuration from JSON string
    pub fn from_json(content: &str) -> Result<AppConfig> {
        serde_json::from_str(content).map_err(ConfigError::from)
    }

    /// Load configuration from environment variables
    ///
    /// Uses default prefix "FUSION_HTLC"
    pub fn from_env() -> Result<AppConfig> {
        Self::from_env_with_prefix(ENV_PREFIX)
    }

    /// Load configuration from environment variables with custom prefix
    ///
    /// Sections and keys are separated by a double underscore, for example
    /// `FUSION_HTLC_NETWORK__LOG_LEVEL=debug`. Missing keys take their defaults.
    pub fn from_env_with_prefix(prefix: &str) -> Result<AppConfig> {
        Self::builder().add_env(prefix).build()
    }

    /// Load a file, then apply environment overrides on top of it
    pub fn from_file_with_env(path: &Path, env_prefix: &str) -> Result<AppConfig> {
        Self::builder().add_file(path, true).add_env(env_prefix).build()
    }

    /// Build configuration using the config crate's builder pattern
    ///
    /// Sources added later take precedence over earlier ones.
    pub fn builder() -> ConfigLoaderBuilder {
        ConfigLoaderBuilder {
            builder: Config::builder(),
        }
    }
}

/// Builder for layered configuration loading
pub struct ConfigLoaderBuilder {
    builder: ConfigBuilder<config::builder::DefaultState>,
}

impl ConfigLoaderBuilder {
    /// Add a configuration file source
    pub fn add_file(mut self, path: &Path, required: bool) -> Self {
        let format = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => FileFormat::Toml,
            Some("yaml") | Some("yml") => FileFormat::Yaml,
            Some("json") => FileFormat::Json,
            _ => FileFormat::Toml, // Default to TOML
        };

        self.builder = self
            .builder
            .add_source(File::from(path).format(format).required(required));
        self
    }

    /// Add environment variable source with prefix
    pub fn add_env(mut self, prefix: &str) -> Self {
        self.builder = self.builder.add_source(
            Environment::with_prefix(prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );
        self
    }

    /// Set a default value for a key
    pub fn set_default(mut self, key: &str, value: &str) -> Result<Self> {
        self.builder = self.builder.set_default(key, value)?;
        Ok(self)
    }

    /// Set a value that overrides every source
    pub fn set_override(mut self, key: &str, value: &str) -> Result<Self> {
        self.builder = self.builder.set_override(key, value)?;
        Ok(self)
    }

    /// Build the final configuration
    pub fn build(self) -> Result<AppConfig> {
        let config = self.builder.build()?;
        let app: AppConfig = config.try_deserialize()?;
        tracing::debug!(
            environment = ?app.network.environment,
            chains = app.chains.len(),
            "configuration loaded"
        );
        Ok(app)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Environment, RegistryBackend};
    use std::io::Write;

    const TOML: &str = r#"
        [network]
        environment = "testnet"
        log_level = "debug"

        [chains.sepolia]
        chain_id = 11155111
        rpc_url = "https://rpc.sepolia.org"
        escrow_factory = "0x1111111111111111111111111111111111111111"
        src_implementation = "0x2222222222222222222222222222222222222222"
        dst_implementation = "0x3333333333333333333333333333333333333333"

        [swap]
        authorization_max_polls = 30

        [timelocks]
        src_withdrawal = 20
        src_public_withdrawal = 200
        src_cancellation = 300
        src_public_cancellation = 400
        dst_withdrawal = 10
        dst_public_withdrawal = 150
        dst_cancellation = 250

        [registry]
        backend = "sqlite"
        path = "swaps.db"
    "#;

    #[test]
    fn test_load_from_toml() {
        let config = ConfigLoader::from_toml(TOML).unwrap();
        assert_eq!(config.network.environment, Environment::Testnet);
        assert_eq!(config.network.log_level, "debug");
        assert_eq!(config.chains["sepolia"].chain_id, 11155111);
        assert_eq!(config.swap.authorization_max_polls, 30);
        assert_eq!(config.swap.funding_max_attempts, 3);
        assert_eq!(config.timelocks.src_cancellation, 300);
        assert_eq!(config.registry.backend, RegistryBackend::Sqlite);
    }

    #[test]
    fn test_load_from_yaml() {
        let yaml = r#"
network:
  environment: testnet
  log_level: debug
chains:
  sepolia:
    chain_id: 11155111
    rpc_url: "https://rpc.sepolia.org"
    escrow_factory: "0x1111111111111111111111111111111111111111"
    src_implementation: "0x2222222222222222222222222222222222222222"
    dst_implementation: "0x3333333333333333333333333333333333333333"
swap:
  max_concurrent_swaps: 4
        "#;

        let config = ConfigLoader::from_yaml(yaml).unwrap();
        assert_eq!(config.network.log_level, "debug");
        assert_eq!(config.swap.max_concurrent_swaps, 4);
        assert_eq!(config.chains.len(), 1);
    }

    #[test]
    fn test_load_from_json() {
        let json = r#"
{
  "network": { "environment": "local", "log_level": "trace", "log_json": true },
  "swap": { "initial_resource_budget": 500000, "budget_bump_pct": 50 },
  "registry": { "backend": "memory" }
}
        "#;

        let config = ConfigLoader::from_json(json).unwrap();
        assert!(config.network.log_json);
        assert_eq!(config.swap.initial_resource_budget, 500_000);
        assert_eq!(config.swap.budget_bump_pct, 50);
        assert!(config.chains.is_empty());
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = ConfigLoader::from_toml("").unwrap();
        assert_eq!(config.network.environment, Environment::Local);
        assert_eq!(config.swap.multi_fill_parts, 11);
        assert_eq!(config.registry.backend, RegistryBackend::Memory);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(TOML.as_bytes()).unwrap();

        let config = ConfigLoader::from_file(file.path()).unwrap();
        assert_eq!(config.network.log_level, "debug");
    }

    #[test]
    fn test_unsupported_extension() {
        let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        assert!(matches!(
            ConfigLoader::from_file(file.path()),
            Err(ConfigError::LoadError(_))
        ));
    }

    #[test]
    fn test_override_wins_over_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(TOML.as_bytes()).unwrap();

        let config = ConfigLoader::builder()
            .add_file(file.path(), true)
            .set_override("network.log_level", "warn")
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(config.network.log_level, "warn");
        assert_eq!(config.chains["sepolia"].chain_id, 11155111);
    }
}
