//! HTTP-backed REST client implementation

use async_trait::async_trait;
use gantry_ipc::{Embed, HttpMethod};
use gantry_interfaces::{RestClient, RestError, RestRequest};
use reqwest::multipart;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_BASE_URL: &str = "https://discord.com/api/v10";

/// REST client over a single shared `reqwest::Client`
#[derive(Debug, Clone)]
pub struct HttpRestClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpRestClient {
    /// Create a client for the default API base URL
    pub fn new(token: impl Into<String>) -> Result<Self, RestError> {
        Self::with_base_url(token, DEFAULT_BASE_URL)
    }

    /// Create a client against a custom API base URL
    pub fn with_base_url(
        token: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, RestError> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(15))
            .user_agent(concat!("gantry/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RestError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn absolute_url(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("{}/{}", self.base_url, url.trim_start_matches('/'))
        }
    }

    fn method_of(method: HttpMethod) -> reqwest::Method {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }

    /// Turn a non-success response into an API error carrying the remote
    /// error code and message when the body provides them.
    async fn error_from_response(response: reqwest::Response) -> RestError {
        let status = response.status();
        let body: JsonValue = response.json().await.unwrap_or(JsonValue::Null);

        let code = body
            .get("code")
            .and_then(JsonValue::as_i64)
            .or(Some(status.as_u16() as i64));
        let message = body
            .get("message")
            .and_then(JsonValue::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("Unknown Status")
                    .to_string()
            });

        RestError::Api {
            code,
            message,
            stack: None,
        }
    }
}

#[async_trait]
impl RestClient for HttpRestClient {
    async fn recommended_shards(&self) -> Result<u32, RestError> {
        let response = self
            .client
            .get(self.absolute_url("/gateway/bot"))
            .header("Authorization", format!("Bot {}", self.token))
            .send()
            .await
            .map_err(|e| RestError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let body: JsonValue = response
            .json()
            .await
            .map_err(|e| RestError::Transport(e.to_string()))?;
        let shards = body
            .get("shards")
            .and_then(JsonValue::as_u64)
            .ok_or_else(|| RestError::Transport("gateway reply without shard count".into()))?;

        debug!(shards, "Gateway recommended shard count");
        Ok(shards as u32)
    }

    async fn request(&self, request: RestRequest) -> Result<JsonValue, RestError> {
        let url = self.absolute_url(&request.url);
        debug!(method = %request.method, %url, route = ?request.route, "Executing outbound API request");

        let mut builder = self.client.request(Self::method_of(request.method), &url);

        if request.auth {
            builder = builder.header("Authorization", format!("Bot {}", self.token));
        }

        builder = match request.file {
            Some(file) => {
                // File uploads go as multipart with the JSON body inlined as
                // the payload_json part
                let mut form = multipart::Form::new().part(
                    "files[0]",
                    multipart::Part::bytes(file.bytes).file_name(file.name),
                );
                if let Some(body) = &request.body {
                    form = form.text("payload_json", body.to_string());
                }
                builder.multipart(form)
            }
            None => match &request.body {
                Some(body) => builder.json(body),
                None => builder,
            },
        };

        let response = builder
            .send()
            .await
            .map_err(|e| RestError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        if response.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(JsonValue::Null);
        }

        response
            .json()
            .await
            .map_err(|e| RestError::Transport(e.to_string()))
    }

    async fn execute_webhook(
        &self,
        id: &str,
        token: &str,
        embeds: Vec<Embed>,
    ) -> Result<(), RestError> {
        let url = self.absolute_url(&format!("/webhooks/{}/{}", id, token));
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "embeds": embeds }))
            .send()
            .await
            .map_err(|e| RestError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let err = Self::error_from_response(response).await;
            warn!(webhook = id, error = %err, "Webhook delivery failed");
            return Err(err);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolute_url_joining() {
        let client = HttpRestClient::with_base_url("t", "https://example.test/api/").unwrap();
        assert_eq!(
            client.absolute_url("/channels/1/messages"),
            "https://example.test/api/channels/1/messages"
        );
        assert_eq!(
            client.absolute_url("gateway/bot"),
            "https://example.test/api/gateway/bot"
        );
        assert_eq!(
            client.absolute_url("https://other.test/x"),
            "https://other.test/x"
        );
    }

    #[test]
    fn test_method_mapping() {
        assert_eq!(HttpRestClient::method_of(HttpMethod::Get), reqwest::Method::GET);
        assert_eq!(HttpRestClient::method_of(HttpMethod::Patch), reqwest::Method::PATCH);
    }
}
