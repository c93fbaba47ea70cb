//! Outbound request proxy, worker side
//!
//! Workers never talk to the REST API directly. Each call is wrapped in an
//! `ApiRequest` notification carrying a fresh correlation id and settled by
//! the matching `ApiResponse` routed back from the master, or by a local
//! timeout so the caller is always unblocked.

use gantry_ipc::{ApiError, ClusterMessage, FilePayload, HttpMethod};
use gantry_interfaces::RestFile;
use serde_json::Value as JsonValue;
use std::time::Duration;
use uuid::Uuid;

use crate::error::RequestError;
use crate::handle::IpcHandle;

/// Grace period added on top of the configured request timeout, covering the
/// master-side round trip.
const TIMEOUT_GRACE: Duration = Duration::from_secs(1);

/// Worker-side stub for proxied outbound API requests
#[derive(Clone)]
pub struct RequestHandler {
    ipc: IpcHandle,
    timeout: Duration,
}

impl RequestHandler {
    pub fn new(ipc: IpcHandle, timeout: Duration) -> Self {
        Self { ipc, timeout }
    }

    /// Proxy one API call through the master. Resolves with the response data
    /// or rejects with the remote error; a missing response rejects after the
    /// request timeout plus a fixed grace period, with the correlation entry
    /// removed so a late answer cannot leak or double-fire.
    pub async fn request(
        &self,
        method: HttpMethod,
        url: impl Into<String>,
        auth: bool,
        body: Option<JsonValue>,
        file: Option<RestFile>,
        route: Option<String>,
        short: bool,
    ) -> Result<JsonValue, RequestError> {
        let url = url.into();
        let request_id = Uuid::new_v4().simple().to_string();
        let deadline = self.timeout + TIMEOUT_GRACE;

        let waiter = self.ipc.correlations().register(request_id.clone());

        self.ipc.send(ClusterMessage::ApiRequest {
            method,
            url: url.clone(),
            auth,
            body,
            file: file.map(|f| FilePayload::encode(f.name, &f.bytes)),
            route,
            short,
            request_id: request_id.clone(),
        })?;

        let response = match tokio::time::timeout(deadline, waiter).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                // Writer side dropped without answering
                return Err(RequestError::Timeout {
                    method,
                    url,
                    timeout_ms: deadline.as_millis() as u64,
                });
            }
            Err(_) => {
                self.ipc.correlations().cancel(&request_id);
                return Err(RequestError::Timeout {
                    method,
                    url,
                    timeout_ms: deadline.as_millis() as u64,
                });
            }
        };

        if let Some(err) = response.get("err").filter(|e| !e.is_null()) {
            let err: ApiError = serde_json::from_value(err.clone())
                .unwrap_or_else(|_| ApiError {
                    code: None,
                    message: err.to_string(),
                    stack: None,
                });
            return Err(RequestError::Api {
                method,
                url,
                code: err.code,
                message: err.message,
                stack: err.stack,
            });
        }

        Ok(response.get("data").cloned().unwrap_or(JsonValue::Null))
    }
}
