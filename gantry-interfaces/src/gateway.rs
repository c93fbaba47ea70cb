//! Gateway client boundary
//!
//! The gateway client owns the actual shard sockets, reconnection backoff and
//! the in-memory entity cache. Gantry only consumes its lifecycle events and
//! reads its live state; everything here is specified at that boundary.

use async_trait::async_trait;
use gantry_ipc::ShardStats;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Gateway boundary errors
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Gateway connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Invalid gateway token")]
    InvalidToken,

    #[error("Gateway client error: {0}")]
    Other(String),
}

/// Lifecycle events surfaced by the gateway client
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// A shard established its connection
    ShardConnect { shard_id: u32 },
    /// A shard finished identifying and is serving events
    ShardReady { shard_id: u32 },
    /// A shard dropped its connection (the client handles reconnection)
    ShardDisconnect {
        shard_id: u32,
        reason: Option<String>,
    },
    /// A shard resumed a previous session
    ShardResume { shard_id: u32 },
    /// Non-fatal shard-level warning
    ShardWarn { shard_id: u32, message: String },
    /// Shard-level error (reported, not acted on)
    ShardError { shard_id: u32, message: String },
    /// Every assigned shard has been ready at least once
    AllShardsReady,
}

/// Connection options the worker passes to the gateway client. The reserved
/// fields are always set by the worker; `extra` carries the caller's opaque
/// pass-through options.
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    pub autoreconnect: bool,
    pub first_shard_id: u32,
    pub last_shard_id: u32,
    pub max_shards: u32,
    pub extra: JsonValue,
}

/// Handle to a live gateway client owned by one worker process
#[async_trait]
pub trait GatewayClient: Send + Sync {
    /// Establish the shard connections for the assigned range
    async fn connect(&self) -> Result<(), GatewayError>;

    /// Subscribe to lifecycle events. Must be callable before `connect`.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<GatewayEvent>;

    // Live counters sampled for statistics
    fn guild_count(&self) -> u64;
    fn user_count(&self) -> u64;
    fn voice_connection_count(&self) -> u64;
    fn large_guild_count(&self) -> u64;
    /// Guilds where this bot is the only bot member
    fn exclusive_guild_count(&self) -> u64;
    fn uptime_ms(&self) -> u64;

    /// Per-shard snapshot of the client's live shard state
    fn shard_stats(&self) -> Vec<ShardStats>;

    // Cache lookups answered locally for fanned-out entity fetches
    fn user(&self, id: &str) -> Option<JsonValue>;
    fn guild(&self, id: &str) -> Option<JsonValue>;
    fn channel(&self, id: &str) -> Option<JsonValue>;
    fn member(&self, guild_id: &str, member_id: &str) -> Option<JsonValue>;
}

/// Builds one gateway client per worker connection attempt
pub trait GatewayClientFactory: Send + Sync {
    fn create(
        &self,
        token: &str,
        options: GatewayOptions,
    ) -> Result<Arc<dyn GatewayClient>, GatewayError>;
}
