//! Worker-side error types

use gantry_interfaces::GatewayError;
use gantry_ipc::{HttpMethod, IpcError};
use thiserror::Error;

/// Errors from the worker runtime itself
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Ipc(#[from] IpcError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Errors surfaced by the outbound request proxy. Both variants name the
/// method and URL so failures stay debuggable across the process boundary.
#[derive(Debug, Error)]
pub enum RequestError {
    /// No response arrived within the deadline; the pending correlation has
    /// already been removed.
    #[error("Request timed out (>{timeout_ms}ms) on {method} {url}")]
    Timeout {
        method: HttpMethod,
        url: String,
        timeout_ms: u64,
    },

    /// The master executed the call and the remote side failed
    #[error("{message} (on {method} {url})")]
    Api {
        method: HttpMethod,
        url: String,
        code: Option<i64>,
        message: String,
        /// Error stack reported by the master-side executor
        stack: Option<String>,
    },

    #[error(transparent)]
    Ipc(#[from] IpcError),
}

impl RequestError {
    /// Remote error code, when the failure came from the API
    pub fn code(&self) -> Option<i64> {
        match self {
            RequestError::Api { code, .. } => *code,
            _ => None,
        }
    }
}
