//! Session state for the Axiom chat engine.
//!
//! A [`Transcript`] is the ordered message log of one conversation. A
//! [`Session`] wraps a transcript with its title and timestamps, and the
//! [`SessionRegistry`] owns every session and writes them through a
//! [`KeyValueStore`] as a single document.

pub mod registry;
pub mod search;
pub mod session;
pub mod store;
pub mod transcript;

pub use registry::{parse_document, SessionRegistry, SESSIONS_KEY};
pub use search::{highlight, search, user_prompts, PromptRef, Segment};
pub use session::{derive_title, Session, DEFAULT_TITLE, TITLE_MAX_CHARS};
pub use store::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore};
pub use transcript::{Filtered, Transcript};
