//! Orchestrator error types

use gantry_config::ConfigError;
use gantry_interfaces::RestError;
use gantry_ipc::IpcError;
use thiserror::Error;

/// Errors from the master-side orchestrator
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Rest(#[from] RestError),

    #[error("Failed to spawn worker process: {0}")]
    Spawn(#[from] std::io::Error),

    #[error(transparent)]
    Ipc(#[from] IpcError),
}
