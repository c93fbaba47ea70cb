//! Manager configuration

use gantry_ipc::Embed;
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as JsonValue;
use std::str::FromStr;

use crate::error::{ConfigError, ConfigResult};

/// Shard count: fixed, or computed from the gateway's recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardCount {
    Auto,
    Fixed(u32),
}

impl Default for ShardCount {
    fn default() -> Self {
        ShardCount::Auto
    }
}

impl FromStr for ShardCount {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("auto") {
            Ok(ShardCount::Auto)
        } else {
            s.parse::<u32>()
                .map(ShardCount::Fixed)
                .map_err(|_| format!("Invalid shard count: {}", s))
        }
    }
}

impl Serialize for ShardCount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ShardCount::Auto => serializer.serialize_str("auto"),
            ShardCount::Fixed(n) => serializer.serialize_u32(*n),
        }
    }
}

impl<'de> Deserialize<'de> for ShardCount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u32),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(ShardCount::Fixed(n)),
            Raw::Text(s) => ShardCount::from_str(&s).map_err(DeError::custom),
        }
    }
}

/// One webhook endpoint plus the embed template merged into every
/// notification dispatched to it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub id: String,
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embed: Option<Embed>,
}

/// Webhook endpoints per notification category
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Webhooks {
    pub cluster: Option<WebhookConfig>,
    pub shard: Option<WebhookConfig>,
}

/// Orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Name of the registered application factory launched by each worker
    pub main_file: String,

    /// Gateway connection token
    pub token: String,

    /// Total shard count, or "auto" to derive it from the gateway
    pub shards: ShardCount,

    /// First shard id owned by this fleet
    pub first_shard_id: u32,

    /// Last shard id owned by this fleet (defaults to `shards - 1`)
    pub last_shard_id: Option<u32>,

    /// Number of worker processes
    pub clusters: usize,

    /// Minimum spacing between two cluster startups, in seconds
    pub cluster_timeout_secs: u64,

    /// Guild density target used by the auto shard calculation
    pub guilds_per_shard: u32,

    /// Enable periodic fleet-wide statistics aggregation
    pub stats: bool,

    /// Statistics aggregation interval, in milliseconds
    pub stats_interval_ms: u64,

    /// Relay debug-level worker log lines
    pub debug: bool,

    /// Bypass the structured logger for relayed worker output
    pub no_console_override: bool,

    /// Webhook endpoints for cluster/shard lifecycle notifications
    pub webhooks: Webhooks,

    /// Opaque options passed through to the gateway client. The worker always
    /// overrides `autoreconnect`, `first_shard_id`, `last_shard_id` and
    /// `max_shards` regardless of what the caller puts here.
    pub client_options: JsonValue,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            main_file: String::new(),
            token: String::new(),
            shards: ShardCount::Auto,
            first_shard_id: 0,
            last_shard_id: None,
            clusters: num_cpus::get(),
            cluster_timeout_secs: 5,
            guilds_per_shard: 1300,
            stats: false,
            stats_interval_ms: 60_000,
            debug: false,
            no_console_override: false,
            webhooks: Webhooks::default(),
            client_options: JsonValue::Object(Default::default()),
        }
    }
}

impl ManagerConfig {
    /// Create a config with the two required fields set
    pub fn new(main_file: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            main_file: main_file.into(),
            token: token.into(),
            ..Self::default()
        }
    }

    /// Validate the configuration. Called at orchestrator construction; any
    /// error here is fatal.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.token.is_empty() {
            return Err(ConfigError::ValidationError("No token provided".into()));
        }
        if self.main_file.is_empty() {
            return Err(ConfigError::ValidationError("No file path provided".into()));
        }
        if self.shards == ShardCount::Fixed(0) {
            return Err(ConfigError::ValidationError(
                "Shard count must be at least 1".into(),
            ));
        }
        if self.clusters == 0 {
            return Err(ConfigError::ValidationError(
                "Cluster count must be at least 1".into(),
            ));
        }
        if let Some(last) = self.last_shard_id {
            if last < self.first_shard_id {
                return Err(ConfigError::ValidationError(format!(
                    "last_shard_id {} is below first_shard_id {}",
                    last, self.first_shard_id
                )));
            }
        }
        if !self.client_options.is_object() {
            return Err(ConfigError::ValidationError(
                "client_options must be an object".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_fields() {
        let config = ManagerConfig::default();
        assert!(config.validate().is_err());

        let config = ManagerConfig::new("main", "bot-token");
        assert!(config.validate().is_ok());

        let mut config = ManagerConfig::new("main", "bot-token");
        config.token = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_counts_rejected() {
        let mut config = ManagerConfig::new("main", "bot-token");
        config.shards = ShardCount::Fixed(0);
        assert!(config.validate().is_err());

        let mut config = ManagerConfig::new("main", "bot-token");
        config.clusters = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_shard_count_parsing() {
        let yaml: ShardCount = serde_yaml::from_str("auto").unwrap();
        assert_eq!(yaml, ShardCount::Auto);

        let yaml: ShardCount = serde_yaml::from_str("16").unwrap();
        assert_eq!(yaml, ShardCount::Fixed(16));

        assert!(serde_yaml::from_str::<ShardCount>("sixteen").is_err());
    }

    #[test]
    fn test_shard_range_ordering() {
        let mut config = ManagerConfig::new("main", "bot-token");
        config.first_shard_id = 4;
        config.last_shard_id = Some(2);
        assert!(config.validate().is_err());

        config.last_shard_id = Some(4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_round_trip_with_defaults() {
        let yaml = r#"
main_file: main
token: bot-token
shards: 3
clusters: 2
cluster_timeout_secs: 6
stats: true
webhooks:
  cluster:
    id: webhookID
    token: webhookToken
    embed:
      color: 32768
"#;
        let config: ManagerConfig = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.shards, ShardCount::Fixed(3));
        assert_eq!(config.clusters, 2);
        assert_eq!(config.stats_interval_ms, 60_000);
        assert_eq!(
            config.webhooks.cluster.as_ref().unwrap().embed.as_ref().unwrap().color,
            Some(32768)
        );
        assert!(config.webhooks.shard.is_none());
    }
}
