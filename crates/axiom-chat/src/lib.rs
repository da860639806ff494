//! Streaming chat engine for Axiom.
//!
//! [`ChatOrchestrator`] turns a user submission into a request, drives a
//! [`ChatBackend`] stream through the [`StreamDecoder`], and reflects every
//! delta into the working transcript before committing it to the session
//! registry.

pub mod backends;
pub mod config;
pub mod machine;
pub mod notify;
pub mod orchestrator;
pub mod stream;

pub use backends::http::HttpChatBackend;
pub use backends::{ChatBackend, ChatRequest, ChunkStream, WireMessage};
pub use config::{DecoderConfig, EndpointConfig};
pub use machine::{Effect, Phase, SubmissionEvent, SubmissionState, Transition};
pub use notify::{Notification, NotificationLevel, Notifier, TracingNotifier};
pub use orchestrator::{CancelHandle, ChatOrchestrator, ChatUpdate, SubmitOutcome};
pub use stream::{AnomalyKind, DecodeAnomaly, DecodeEvent, DecoderState, StreamDecoder};
