use thiserror::Error;
use uuid::Uuid;

/// A convenience `Result` alias using [`AxiomError`].
pub type AxiomResult<T> = Result<T, AxiomError>;

/// Top-level error type for the Axiom chat engine.
#[derive(Error, Debug)]
pub enum AxiomError {
    /// The endpoint could not be reached (connection refused, timeout, TLS).
    #[error("Network error: {0}")]
    Network(String),

    /// The endpoint answered with a non-success status code.
    #[error("HTTP error {status}: {message}")]
    Http {
        /// Response status code.
        status: u16,
        /// Message extracted from the body, or a status-derived fallback.
        message: String,
    },

    /// The stream reported a structured error or broke off mid-read.
    #[error("Stream error: {0}")]
    Stream(String),

    /// A line of the event stream could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// A transcript or state-machine contract was violated.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// No session exists with the given id.
    #[error("Session not found: {0}")]
    NotFound(Uuid),

    /// The persistence store failed to read or write.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Configuration parsing or validation failed.
    #[error("Config error: {0}")]
    Config(String),

    /// JSON (de)serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem access failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AxiomError {
    /// Text suitable for a user-facing notification.
    ///
    /// HTTP and stream errors carry the endpoint's own wording; everything
    /// else falls back to the `Display` form.
    pub fn user_message(&self) -> String {
        match self {
            Self::Http { message, .. } => message.clone(),
            Self::Stream(message) => message.clone(),
            other => other.to_string(),
        }
    }

    /// Returns `true` for errors that belong to the transport layer.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Http { .. } | Self::Stream(_))
    }
}
