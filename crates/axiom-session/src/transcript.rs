//! Append-only message log.

use axiom_core::{AxiomError, AxiomResult, Message, Role};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Transcript
// ---------------------------------------------------------------------------

/// Ordered, append-only message log of a single session.
///
/// The only in-place mutation allowed is on an *open* assistant tail: the
/// placeholder appended by [`Transcript::begin_assistant`] may be rewritten
/// with [`Transcript::replace_last`] until [`Transcript::seal`] is called.
/// Transcripts restored from storage are always sealed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    messages: Vec<Message>,
    #[serde(skip)]
    open_tail: bool,
}

impl Transcript {
    /// An empty, sealed transcript.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a message to the end of the log.
    ///
    /// Fails with `InvalidState` while an assistant reply is still open,
    /// since the open entry must stay last until it is sealed.
    pub fn append(&mut self, message: Message) -> AxiomResult<()> {
        if self.open_tail {
            return Err(AxiomError::InvalidState(
                "cannot append while an assistant reply is streaming".into(),
            ));
        }
        self.messages.push(message);
        Ok(())
    }

    /// Appends an empty assistant placeholder and opens it for streaming.
    pub fn begin_assistant(&mut self) -> AxiomResult<Uuid> {
        let placeholder = Message::assistant("");
        let id = placeholder.id;
        self.append(placeholder)?;
        self.open_tail = true;
        Ok(id)
    }

    /// Overwrites the content of the final entry.
    ///
    /// The final entry must be an assistant message that is still open.
    pub fn replace_last(&mut self, content: impl Into<String>) -> AxiomResult<()> {
        let last = self
            .messages
            .last_mut()
            .ok_or_else(|| AxiomError::InvalidState("replace_last on empty transcript".into()))?;
        if last.role != Role::Assistant {
            return Err(AxiomError::InvalidState(format!(
                "replace_last on a {} message",
                last.role.as_str()
            )));
        }
        if !self.open_tail {
            return Err(AxiomError::InvalidState(
                "replace_last on a sealed assistant message".into(),
            ));
        }
        last.content = content.into();
        Ok(())
    }

    /// Closes the open assistant tail; its content is final from here on.
    pub fn seal(&mut self) {
        self.open_tail = false;
    }

    /// Removes the open assistant tail, if any, and returns it.
    pub fn discard_open(&mut self) -> Option<Message> {
        if !self.open_tail {
            return None;
        }
        self.open_tail = false;
        self.messages.pop()
    }

    /// Removes the final entry when it is a user message still waiting for
    /// its reply.
    pub fn retract_prompt(&mut self) -> Option<Message> {
        if self.open_tail {
            return None;
        }
        match self.messages.last() {
            Some(last) if last.role == Role::User => self.messages.pop(),
            _ => None,
        }
    }

    /// Whether an assistant reply is currently being streamed into the tail.
    pub fn is_streaming(&self) -> bool {
        self.open_tail
    }

    /// Lazy view of the messages matching `predicate`.
    ///
    /// The view borrows the transcript and can be iterated any number of times.
    pub fn filter<P>(&self, predicate: P) -> Filtered<'_, P>
    where
        P: Fn(&Message) -> bool,
    {
        Filtered {
            messages: &self.messages,
            predicate,
        }
    }

    /// Index of the message with the given id.
    pub fn position(&self, id: Uuid) -> Option<usize> {
        self.messages.iter().position(|m| m.id == id)
    }

    /// All messages in order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Iterates the messages in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.messages.iter()
    }

    /// The final message.
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Number of messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether there are no messages.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// First message authored by the user.
    pub fn first_user_message(&self) -> Option<&Message> {
        self.messages.iter().find(|m| m.role == Role::User)
    }
}

impl<'a> IntoIterator for &'a Transcript {
    type Item = &'a Message;
    type IntoIter = std::slice::Iter<'a, Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}

// ---------------------------------------------------------------------------
// Filtered
// ---------------------------------------------------------------------------

/// A restartable, non-mutating view over a [`Transcript`].
pub struct Filtered<'a, P> {
    messages: &'a [Message],
    predicate: P,
}

impl<'a, P> Filtered<'a, P>
where
    P: Fn(&Message) -> bool,
{
    /// Starts a fresh pass over the matching messages.
    pub fn iter(&self) -> impl Iterator<Item = &'a Message> + '_ {
        self.messages.iter().filter(move |m| (self.predicate)(m))
    }

    /// Number of matching messages.
    pub fn count(&self) -> usize {
        self.iter().count()
    }

    /// Collects the matching messages.
    pub fn to_vec(&self) -> Vec<&'a Message> {
        self.iter().collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
