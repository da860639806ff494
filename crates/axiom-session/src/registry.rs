//! The set of stored sessions and its persisted document.

use crate::session::{derive_title, Session};
use crate::store::KeyValueStore;
use crate::transcript::Transcript;
use axiom_core::{AxiomError, AxiomResult};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Fixed key under which the whole registry is stored.
pub const SESSIONS_KEY: &str = "axiom-chat-sessions";

/// Owns every session and mirrors them to a [`KeyValueStore`].
///
/// Sessions are kept most-recently-updated first. The registry is meant to be
/// restored once at startup and persisted after each mutation; each persist
/// overwrites the stored document as a whole.
pub struct SessionRegistry {
    sessions: Vec<Session>,
    store: Arc<dyn KeyValueStore>,
}

impl SessionRegistry {
    /// Empty registry backed by `store`. Nothing is read until [`restore`](Self::restore).
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            sessions: Vec::new(),
            store,
        }
    }

    /// Builds a registry and restores it from `store` in one step.
    pub async fn open(store: Arc<dyn KeyValueStore>) -> Self {
        let mut registry = Self::new(store);
        registry.restore().await;
        registry
    }

    /// Creates an empty session with the placeholder title and puts it first.
    pub fn create_session(&mut self) -> &Session {
        let session = Session::new();
        info!(session_id = %session.id, "Session created");
        self.sessions.insert(0, session);
        &self.sessions[0]
    }

    /// The session with `id`, or `NotFound`.
    pub fn load(&self, id: Uuid) -> AxiomResult<&Session> {
        self.sessions
            .iter()
            .find(|s| s.id == id)
            .ok_or(AxiomError::NotFound(id))
    }

    /// Whether a session with `id` exists.
    pub fn contains(&self, id: Uuid) -> bool {
        self.sessions.iter().any(|s| s.id == id)
    }

    /// Replaces the stored transcript of `id` and moves the session to the front.
    ///
    /// A session still carrying the placeholder title gets one derived from
    /// its first user message.
    pub fn commit(&mut self, id: Uuid, transcript: Transcript) -> AxiomResult<&Session> {
        let idx = self
            .sessions
            .iter()
            .position(|s| s.id == id)
            .ok_or(AxiomError::NotFound(id))?;

        let mut session = self.sessions.remove(idx);
        let mut transcript = transcript;
        transcript.seal();
        session.transcript = transcript;
        session.touch();
        if session.has_default_title() {
            if let Some(title) = derive_title(&session.transcript) {
                session.title = title;
            }
        }

        debug!(
            session_id = %id,
            messages = session.transcript.len(),
            "Session committed"
        );
        self.sessions.insert(0, session);
        Ok(&self.sessions[0])
    }

    /// Sessions, most recently updated first.
    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.iter()
    }

    /// Number of sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether there are no sessions.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Total number of messages across all sessions.
    pub fn message_count(&self) -> usize {
        self.sessions.iter().map(Session::message_count).sum()
    }

    /// Serializes the registry as a mapping from session id to session.
    pub fn to_document(&self) -> AxiomResult<String> {
        let mut map = serde_json::Map::new();
        for session in &self.sessions {
            map.insert(session.id.to_string(), serde_json::to_value(session)?);
        }
        Ok(serde_json::to_string(&serde_json::Value::Object(map))?)
    }

    /// Writes the whole registry to the store, replacing the previous document.
    pub async fn persist(&self) -> AxiomResult<()> {
        let document = self.to_document()?;
        self.store
            .set(SESSIONS_KEY, &document)
            .await
            .map_err(|e| AxiomError::Persistence(e.to_string()))?;
        debug!(sessions = self.sessions.len(), "Registry persisted");
        Ok(())
    }

    /// Replaces the in-memory sessions with the stored document.
    ///
    /// Never fails: an unreadable or corrupt document yields an empty
    /// registry, and individual entries that fail to parse are skipped.
    /// Returns the number of sessions restored.
    pub async fn restore(&mut self) -> usize {
        self.sessions = match self.store.get(SESSIONS_KEY).await {
            Ok(Some(document)) => match parse_document(&document) {
                Ok(sessions) => sessions,
                Err(e) => {
                    warn!(error = %e, "Stored sessions unreadable, starting empty");
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "Session store unavailable, starting empty");
                Vec::new()
            }
        };
        info!(sessions = self.sessions.len(), "Registry restored");
        self.sessions.len()
    }
}

/// Parses a stored registry document, dropping entries that do not parse.
pub fn parse_document(document: &str) -> AxiomResult<Vec<Session>> {
    let value: serde_json::Value = serde_json::from_str(document)
        .map_err(|e| AxiomError::Persistence(format!("invalid session document: {e}")))?;
    let serde_json::Value::Object(entries) = value else {
        return Err(AxiomError::Persistence(
            "session document is not an object".into(),
        ));
    };

    let mut sessions: Vec<Session> = Vec::with_capacity(entries.len());
    for (key, entry) in entries {
        match serde_json::from_value::<Session>(entry) {
            Ok(session) if sessions.iter().any(|s| s.id == session.id) => {
                warn!(key = %key, session_id = %session.id, "Duplicate session dropped");
            }
            Ok(session) => sessions.push(session),
            Err(e) => warn!(key = %key, error = %e, "Malformed session dropped"),
        }
    }
    sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    Ok(sessions)
}
