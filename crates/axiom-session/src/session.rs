//! A titled conversation.

use crate::transcript::Transcript;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Title given to sessions until a user message provides a better one.
pub const DEFAULT_TITLE: &str = "New Chat";

/// Number of characters kept from the first user message when deriving a title.
pub const TITLE_MAX_CHARS: usize = 30;

const TITLE_ELLIPSIS: &str = "...";

/// One persisted conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Opaque identifier.
    pub id: Uuid,
    /// Display title; "New Chat" until the first commit.
    pub title: String,
    /// Committed messages.
    #[serde(rename = "messages", default)]
    pub transcript: Transcript,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time of the last commit.
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// An empty session with the placeholder title.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: DEFAULT_TITLE.to_string(),
            transcript: Transcript::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Bumps `updated_at`, never moving it backwards.
    pub fn touch(&mut self) {
        let now = Utc::now();
        if now > self.updated_at {
            self.updated_at = now;
        }
    }

    /// Whether the title is still the placeholder.
    pub fn has_default_title(&self) -> bool {
        self.title == DEFAULT_TITLE
    }

    /// Number of committed messages.
    pub fn message_count(&self) -> usize {
        self.transcript.len()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Title derived from the first user message: its first
/// [`TITLE_MAX_CHARS`] characters followed by an ellipsis.
pub fn derive_title(transcript: &Transcript) -> Option<String> {
    let first = transcript.first_user_message()?;
    if first.content.is_empty() {
        return None;
    }
    let mut title: String = first.content.chars().take(TITLE_MAX_CHARS).collect();
    title.push_str(TITLE_ELLIPSIS);
    Some(title)
}
