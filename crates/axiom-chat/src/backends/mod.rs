//! Transports that carry a chat request to the endpoint.

pub mod http;

use async_trait::async_trait;
use axiom_core::{AxiomResult, Role};
use axiom_session::Transcript;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// Raw response body chunks, in arrival order.
pub type ChunkStream = Pin<Box<dyn Stream<Item = AxiomResult<Vec<u8>>> + Send>>;

/// One transcript entry as sent over the wire: role and content only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    /// Author of the entry.
    pub role: Role,
    /// Message text.
    pub content: String,
}

/// Body of a chat request: the full transcript so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Entries in transcript order.
    pub messages: Vec<WireMessage>,
}

impl ChatRequest {
    /// Serializes the transcript, leaving out ids, timestamps and attachments.
    pub fn from_transcript(transcript: &Transcript) -> Self {
        Self {
            messages: transcript
                .iter()
                .map(|m| WireMessage {
                    role: m.role,
                    content: m.content.clone(),
                })
                .collect(),
        }
    }
}

/// Transport that opens a streamed chat completion.
///
/// Implementations resolve once the response headers arrived with a success
/// status; the returned stream then yields the body chunk by chunk. Dropping
/// the stream releases the underlying connection.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Sends `request` and returns the response body as a stream.
    async fn open_stream(&self, request: &ChatRequest) -> AxiomResult<ChunkStream>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axiom_core::{Attachment, Message};

    #[test]
    fn request_carries_only_role_and_content() {
        let mut t = Transcript::new();
        t.append(
            Message::user("hi").with_attachments(vec![Attachment::new("a.txt", "text/plain", 1, "x")]),
        )
        .unwrap();
        t.append(Message::assistant("hello")).unwrap();

        let json = serde_json::to_value(ChatRequest::from_transcript(&t)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "messages": [
                    {"role": "user", "content": "hi"},
                    {"role": "assistant", "content": "hello"}
                ]
            })
        );
    }
}
