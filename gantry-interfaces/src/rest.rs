//! Rate-limited REST client boundary
//!
//! All outbound API traffic from every worker funnels through exactly one
//! implementation of [`RestClient`] owned by the master, so global rate-limit
//! state stays consistent across the whole fleet. Workers must never issue
//! the underlying call themselves.

use async_trait::async_trait;
use gantry_ipc::{Embed, HttpMethod};
use serde_json::Value as JsonValue;
use thiserror::Error;

/// REST boundary errors
#[derive(Debug, Error)]
pub enum RestError {
    /// Error surfaced by the remote API
    #[error("API error{}: {message}", code.map(|c| format!(" {}", c)).unwrap_or_default())]
    Api {
        code: Option<i64>,
        message: String,
        stack: Option<String>,
    },

    /// Transport-level failure before a response was produced
    #[error("Transport error: {0}")]
    Transport(String),
}

/// A decoded file attachment ready for upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// One outbound API request as executed by the shared client
#[derive(Debug, Clone)]
pub struct RestRequest {
    pub method: HttpMethod,
    pub url: String,
    /// Attach the bot token
    pub auth: bool,
    pub body: Option<JsonValue>,
    pub file: Option<RestFile>,
    /// Rate-limit bucket route hint
    pub route: Option<String>,
    /// Short-path rate-limit hint
    pub short: bool,
}

/// The fleet-shared rate-limited REST executor
#[async_trait]
pub trait RestClient: Send + Sync {
    /// Ask the gateway for its recommended shard count
    async fn recommended_shards(&self) -> Result<u32, RestError>;

    /// Execute one API call through the shared rate-limit state
    async fn request(&self, request: RestRequest) -> Result<JsonValue, RestError>;

    /// Deliver a webhook notification (fire-and-forget at call sites)
    async fn execute_webhook(
        &self,
        id: &str,
        token: &str,
        embeds: Vec<Embed>,
    ) -> Result<(), RestError>;
}
