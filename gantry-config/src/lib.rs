//! Configuration surface for the Gantry orchestrator
//!
//! The manager is constructed from a [`ManagerConfig`], either built in code,
//! loaded from a YAML file, or assembled from `GANTRY_*` environment
//! variables. Missing token or entrypoint name is a fatal configuration error
//! raised at validation time, never at runtime.

pub mod config;
pub mod error;
pub mod loader;

pub use config::{ManagerConfig, ShardCount, WebhookConfig, Webhooks};
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
