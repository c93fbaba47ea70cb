//! IPC protocol definitions and message types

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

use crate::error::IpcError;

/// IPC protocol version for compatibility checking
pub const IPC_PROTOCOL_VERSION: u32 = 1;

/// Relay level for worker log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Log,
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Log => "log",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// Webhook category for lifecycle embeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleKind {
    Cluster,
    Shard,
}

/// Entity lookup kinds answered from worker caches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchKind {
    User,
    Guild,
    Channel,
    Member,
}

/// Lookup key: a plain entity id, or the `[guild_id, member_id]` pair for
/// member lookups
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FetchValue {
    Id(String),
    GuildMember(String, String),
}

impl FetchValue {
    /// The id replies are correlated on (member lookups correlate on the
    /// member id, everything else on the entity id).
    pub fn correlation_key(&self) -> &str {
        match self {
            FetchValue::Id(id) => id,
            FetchValue::GuildMember(_, member_id) => member_id,
        }
    }
}

/// HTTP method carried by proxied outbound requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// File attachment payload; the channel only carries text-safe data, so the
/// bytes travel base64-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePayload {
    pub name: String,
    pub file: String,
}

impl FilePayload {
    /// Encode raw bytes for transmission
    pub fn encode(name: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            name: name.into(),
            file: BASE64.encode(bytes),
        }
    }

    /// Decode back to raw bytes on the receiving side
    pub fn decode(&self) -> Result<Vec<u8>, IpcError> {
        BASE64
            .decode(&self.file)
            .map_err(|e| IpcError::InvalidMessage(format!("invalid file payload: {}", e)))
    }
}

/// Per-shard snapshot sampled from the gateway client's live state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardStats {
    pub id: u32,
    pub latency_ms: u64,
    pub ready: bool,
    pub status: String,
}

/// One worker's local statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterStats {
    pub guilds: u64,
    pub users: u64,
    pub voice: u64,
    pub exclusive_guilds: u64,
    pub large_guilds: u64,
    pub shards: u32,
    pub ram_bytes: u64,
    pub uptime_ms: u64,
    pub shards_stats: Vec<ShardStats>,
}

/// An embed field for webhook notifications
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline: Option<bool>,
}

/// Webhook embed; optional fields are filled in from the per-category
/// template when the master dispatches the notification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Embed {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footer: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<EmbedField>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Error reported back for a failed proxied request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

/// Messages sent from the master to worker processes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum MasterMessage {
    /// Bind a shard range and connect to the gateway
    Connect {
        first_shard_id: u32,
        last_shard_id: u32,
        cluster_count: u32,
        max_shards: u32,
        token: String,
        file: String,
        id: u32,
        client_options: JsonValue,
    },

    /// Trigger a stats report
    StatsRequest,

    /// Entity lookup fanned out across all clusters
    Fetch { kind: FetchKind, value: FetchValue },

    /// Routed answer for an entity lookup
    FetchReturn { id: String, value: JsonValue },

    /// Result of a proxied outbound API request
    ApiResponse {
        request_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<JsonValue>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        err: Option<ApiError>,
    },

    /// Generic payload delivered from a broadcast or a send-to-one
    Payload { msg: JsonValue },

    /// Terminate the worker process (observed by the master as a crash)
    Restart,
}

/// Messages sent from worker processes to the master
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum ClusterMessage {
    /// Relayed log line
    Log { level: LogLevel, msg: String },

    /// Lifecycle embed for the cluster/shard webhook categories
    Lifecycle { kind: LifecycleKind, embed: Embed },

    /// All assigned shards reported ready; advances the startup queue
    ShardsStarted,

    /// Reply to a stats trigger
    Stats { stats: ClusterStats },

    /// Entity lookup initiated by this worker
    Fetch { kind: FetchKind, value: FetchValue },

    /// Local cache hit for a fanned-out lookup
    FetchReturn { id: String, value: JsonValue },

    /// Generic payload for every cluster
    Broadcast { msg: JsonValue },

    /// Generic payload for one cluster
    Send { cluster: u32, msg: JsonValue },

    /// Proxied outbound API request
    ApiRequest {
        method: HttpMethod,
        url: String,
        auth: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<JsonValue>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file: Option<FilePayload>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        route: Option<String>,
        #[serde(default)]
        short: bool,
        request_id: String,
    },
}

/// Message envelope for all IPC communications
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope<T> {
    pub protocol_version: u32,
    pub timestamp: DateTime<Utc>,
    pub message: T,
}

impl<T> MessageEnvelope<T> {
    /// Create a new message envelope
    pub fn new(message: T) -> Self {
        Self {
            protocol_version: IPC_PROTOCOL_VERSION,
            timestamp: Utc::now(),
            message,
        }
    }

    /// Check if protocol version is compatible
    pub fn is_compatible(&self) -> bool {
        self.protocol_version == IPC_PROTOCOL_VERSION
    }
}
