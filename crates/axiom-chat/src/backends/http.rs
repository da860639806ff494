//! HTTP transport over `reqwest`.

use super::{ChatBackend, ChatRequest, ChunkStream};
use crate::config::EndpointConfig;
use async_trait::async_trait;
use axiom_core::{AxiomError, AxiomResult};
use futures_util::StreamExt;
use std::time::Duration;
use tracing::{info, warn};

/// HTTP backend for an endpoint that streams `data:` lines.
///
/// POSTs `{ messages: [...] }` with a bearer token and hands the response
/// body back as a chunk stream.
pub struct HttpChatBackend {
    config: EndpointConfig,
    http: reqwest::Client,
}

impl HttpChatBackend {
    /// Builds the HTTP client. Fails only if the TLS backend cannot start.
    pub fn new(config: EndpointConfig) -> AxiomResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| AxiomError::Config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { config, http })
    }

    fn build_body(&self, request: &ChatRequest) -> AxiomResult<serde_json::Value> {
        let mut body = serde_json::to_value(request)?;
        if let Some(model) = &self.config.model {
            body["model"] = serde_json::json!(model);
        }
        Ok(body)
    }
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    async fn open_stream(&self, request: &ChatRequest) -> AxiomResult<ChunkStream> {
        let body = self.build_body(request)?;

        let resp = self
            .http
            .post(&self.config.url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| AxiomError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let error_body = resp.text().await.unwrap_or_default();
            let message = parse_error_message(status.as_u16(), &error_body);
            warn!(status = status.as_u16(), error = %message, "Chat endpoint rejected request");
            return Err(AxiomError::Http {
                status: status.as_u16(),
                message,
            });
        }

        info!(
            status = status.as_u16(),
            messages = request.messages.len(),
            "Chat stream opened"
        );

        let stream = resp.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|e| AxiomError::Stream(format!("Stream read error: {e}")))
        });
        Ok(Box::pin(stream))
    }
}

/// Best-effort extraction of a human-readable error from a failed response.
///
/// Understands `{"error": "..."}` and `{"error": {"message": "..."}}`; any
/// other body falls back to a status-code message.
pub fn parse_error_message(status: u16, body: &str) -> String {
    let fallback = || format!("Request failed with status {status}");
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return fallback();
    };
    let Some(error) = value.get("error") else {
        return fallback();
    };
    error
        .as_str()
        .or_else(|| error.get("message").and_then(|m| m.as_str()))
        .filter(|message| !message.trim().is_empty())
        .map(ToString::to_string)
        .unwrap_or_else(fallback)
}
