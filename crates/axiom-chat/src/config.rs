//! Endpoint and decoder settings.

use axiom_core::{AxiomError, AxiomResult};
use serde::{Deserialize, Serialize};

/// Where and how to reach the text-generation endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Full URL the chat request is POSTed to.
    pub url: String,
    /// Bearer token sent in the `Authorization` header.
    #[serde(default)]
    pub api_key: String,
    /// Model name forwarded in the request body when set.
    #[serde(default)]
    pub model: Option<String>,
    /// Seconds to wait for the TCP/TLS connection.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl EndpointConfig {
    /// Endpoint with no model and the default connect timeout.
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            model: None,
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }

    /// Rejects non-http(s) URLs and an empty API key.
    pub fn validate(&self) -> AxiomResult<()> {
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(AxiomError::Config(format!(
                "endpoint url must be http(s): {:?}",
                self.url
            )));
        }
        if self.api_key.trim().is_empty() {
            return Err(AxiomError::Config("endpoint api_key is empty".into()));
        }
        Ok(())
    }
}

/// Limits applied by the [`StreamDecoder`](crate::StreamDecoder).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// Longest unterminated line kept in the carry-over buffer.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
    /// How many later feeds may re-attempt an unparseable line before it is dropped.
    #[serde(default = "default_max_parse_retries")]
    pub max_parse_retries: u32,
}

fn default_max_line_bytes() -> usize {
    1024 * 1024
}

fn default_max_parse_retries() -> u32 {
    2
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_line_bytes: default_max_line_bytes(),
            max_parse_retries: default_max_parse_retries(),
        }
    }
}
