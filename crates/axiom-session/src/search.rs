//! Search and prompt navigation over a transcript.

use crate::transcript::Transcript;
use axiom_core::{Message, Role};
use regex::{Regex, RegexBuilder};
use uuid::Uuid;

/// Literal, case-insensitive pattern for `query`. Shared by [`search`] and
/// [`highlight`] so a hit always has something to highlight.
fn matcher(query: &str) -> Option<Regex> {
    RegexBuilder::new(&regex::escape(query))
        .case_insensitive(true)
        .build()
        .ok()
}

/// Messages whose content contains `query`, ignoring case.
///
/// An empty query matches everything.
pub fn search<'a>(transcript: &'a Transcript, query: &str) -> Vec<&'a Message> {
    if query.is_empty() {
        return transcript.iter().collect();
    }
    let Some(pattern) = matcher(query) else {
        return Vec::new();
    };
    transcript
        .filter(|m| pattern.is_match(&m.content))
        .to_vec()
}

/// A slice of text, flagged when it matched the highlight query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment<'a> {
    /// Slice of the original text.
    pub text: &'a str,
    /// Whether this slice matched the query.
    pub matched: bool,
}

/// Splits `text` into alternating unmatched/matched segments for `query`.
///
/// Matching is case-insensitive and the query is taken literally.
pub fn highlight<'a>(text: &'a str, query: &str) -> Vec<Segment<'a>> {
    if text.is_empty() {
        return Vec::new();
    }
    let whole = vec![Segment {
        text,
        matched: false,
    }];
    if query.is_empty() {
        return whole;
    }
    let Some(pattern) = matcher(query) else {
        return whole;
    };

    let mut segments = Vec::new();
    let mut cursor = 0;
    for found in pattern.find_iter(text) {
        if found.start() > cursor {
            segments.push(Segment {
                text: &text[cursor..found.start()],
                matched: false,
            });
        }
        segments.push(Segment {
            text: found.as_str(),
            matched: true,
        });
        cursor = found.end();
    }
    if cursor < text.len() {
        segments.push(Segment {
            text: &text[cursor..],
            matched: false,
        });
    }
    segments
}

/// A user prompt in the order it was asked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptRef<'a> {
    /// Zero-based ordinal among the user's prompts.
    pub index: usize,
    /// Id of the user message.
    pub id: Uuid,
    /// Text of the prompt.
    pub content: &'a str,
}

/// The user's prompts, in transcript order.
pub fn user_prompts(transcript: &Transcript) -> Vec<PromptRef<'_>> {
    transcript
        .filter(|m| m.role == Role::User)
        .iter()
        .enumerate()
        .map(|(index, m)| PromptRef {
            index,
            id: m.id,
            content: &m.content,
        })
        .collect()
}
