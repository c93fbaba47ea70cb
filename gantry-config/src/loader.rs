//! Configuration loading and environment variable handling

use std::path::Path;
use std::str::FromStr;

use crate::config::{ManagerConfig, ShardCount};
use crate::error::{ConfigError, ConfigResult};

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    /// Environment variable prefix
    prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with default prefix
    pub fn new() -> Self {
        Self {
            prefix: "GANTRY".to_string(),
        }
    }

    /// Create a new config loader with custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load configuration from a YAML file with environment overrides
    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<ManagerConfig> {
        let content = std::fs::read_to_string(path)?;
        let mut config: ManagerConfig = serde_yaml::from_str(&content)?;
        self.apply_env_overrides(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env(&self) -> ConfigResult<ManagerConfig> {
        let mut config = ManagerConfig::default();
        self.apply_env_overrides(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with fallback chain
    pub fn load(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<ManagerConfig> {
        match config_path {
            Some(path) => self.from_file(path),
            None => self.from_env(),
        }
    }

    /// Apply environment variable overrides to configuration
    fn apply_env_overrides(&self, config: &mut ManagerConfig) -> ConfigResult<()> {
        if let Ok(token) = self.get_env_var("TOKEN") {
            config.token = token;
        }
        if let Ok(main_file) = self.get_env_var("MAIN_FILE") {
            config.main_file = main_file;
        }
        if let Ok(shards) = self.get_env_var("SHARDS") {
            config.shards = ShardCount::from_str(&shards)
                .map_err(|e| ConfigError::EnvError(format!("Invalid SHARDS: {}", e)))?;
        }
        if let Ok(clusters) = self.get_env_var("CLUSTERS") {
            config.clusters = clusters
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid CLUSTERS: {}", e)))?;
        }
        if let Ok(timeout) = self.get_env_var("CLUSTER_TIMEOUT_SECS") {
            config.cluster_timeout_secs = timeout.parse().map_err(|e| {
                ConfigError::EnvError(format!("Invalid CLUSTER_TIMEOUT_SECS: {}", e))
            })?;
        }
        if let Ok(density) = self.get_env_var("GUILDS_PER_SHARD") {
            config.guilds_per_shard = density
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid GUILDS_PER_SHARD: {}", e)))?;
        }
        if let Ok(stats) = self.get_env_var("STATS") {
            config.stats = stats
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid STATS: {}", e)))?;
        }
        if let Ok(interval) = self.get_env_var("STATS_INTERVAL_MS") {
            config.stats_interval_ms = interval
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid STATS_INTERVAL_MS: {}", e)))?;
        }
        if let Ok(debug) = self.get_env_var("DEBUG") {
            config.debug = debug
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid DEBUG: {}", e)))?;
        }
        Ok(())
    }

    /// Get environment variable with prefix
    fn get_env_var(&self, name: &str) -> Result<String, std::env::VarError> {
        std::env::var(format!("{}_{}", self.prefix, name))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
