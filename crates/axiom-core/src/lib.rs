//! Core types and error definitions for the Axiom chat engine.
//!
//! This crate provides the foundational types shared across all Axiom crates.
//!
//! # Main types
//!
//! - [`AxiomError`]: Unified error enum for transport, decoding, state and persistence.
//! - [`AxiomResult`]: Convenience alias for `Result<T, AxiomError>`.
//! - [`Role`]: Message role (user, assistant).
//! - [`Message`]: A single entry of a session transcript.
//! - [`Attachment`]: File metadata carried alongside a user message.

/// Error taxonomy shared by every crate in the workspace.
pub mod error;
/// Transcript message types.
pub mod message;

pub use error::{AxiomError, AxiomResult};
pub use message::{Attachment, Message, Role};
