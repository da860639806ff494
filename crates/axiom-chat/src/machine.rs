//! Submission state machine.
//!
//! One submission moves through
//! `Idle -> Sending -> Streaming -> Completed | Failed`.
//! [`SubmissionState::on`] is pure: it returns the next state together with
//! the side effects the caller must apply, in order. Nothing here touches the
//! transcript, the network or the registry.

use crate::notify::Notification;
use axiom_core::{AxiomError, AxiomResult, Attachment, Message};
use serde::{Deserialize, Serialize};

/// Coarse phase of a submission, as reported to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// No submission has run yet, or the last one was cancelled.
    Idle,
    /// Request sent, waiting for response headers.
    Sending,
    /// Reading the reply body.
    Streaming,
    /// The reply finished and was committed.
    Completed,
    /// The last submission failed.
    Failed,
}

/// State of the current submission. See [`Phase`] for what each one means.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SubmissionState {
    /// Nothing in flight.
    #[default]
    Idle,
    /// Waiting for response headers.
    Sending,
    /// Reading the reply.
    Streaming {
        /// Reply accumulated so far.
        content: String,
    },
    /// Reply finished.
    Completed {
        /// The full reply.
        content: String,
    },
    /// Submission failed.
    Failed {
        /// Human-readable cause.
        reason: String,
    },
}

/// Input to [`SubmissionState::on`].
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionEvent {
    /// The user sent a message.
    Submit {
        /// Raw input; trimmed before use.
        text: String,
        /// Pending attachments to carry on the message.
        attachments: Vec<Attachment>,
    },
    /// Response headers arrived with a success status.
    StreamOpened,
    /// Decoded text to add to the reply.
    Delta(String),
    /// Sentinel seen or the body ended.
    Finished,
    /// Human-readable failure cause.
    Failed(String),
    /// The caller abandoned the submission.
    Cancelled,
}

/// Side effect the orchestrator applies after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Append the user's message to the transcript.
    AppendUser(Message),
    /// Append an empty assistant message open for streaming.
    OpenPlaceholder,
    /// Full reply so far, replacing the content of the open placeholder.
    ReplaceLast(String),
    /// Close the placeholder; its content is final.
    SealReply,
    /// Remove the open placeholder.
    DiscardPlaceholder,
    /// Withdraws the user message that went unanswered.
    DiscardPrompt,
    /// Show a notification.
    Notify(Notification),
    /// Store the transcript in the registry.
    Commit,
}

/// Result of [`SubmissionState::on`].
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// State to move to.
    pub next: SubmissionState,
    /// Effects to apply, in order.
    pub effects: Vec<Effect>,
}

impl Transition {
    fn to(next: SubmissionState, effects: Vec<Effect>) -> Self {
        Self { next, effects }
    }

    /// Whether applying this transition changes anything at all.
    pub fn is_noop(&self, from: &SubmissionState) -> bool {
        self.effects.is_empty() && &self.next == from
    }
}

impl SubmissionState {
    /// Coarse phase of this state.
    pub fn phase(&self) -> Phase {
        match self {
            Self::Idle => Phase::Idle,
            Self::Sending => Phase::Sending,
            Self::Streaming { .. } => Phase::Streaming,
            Self::Completed { .. } => Phase::Completed,
            Self::Failed { .. } => Phase::Failed,
        }
    }

    /// A request is outstanding: a new submission would be rejected.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Sending | Self::Streaming { .. })
    }

    /// Computes the transition for `event`.
    ///
    /// Blank submissions and submissions while one is in flight are no-ops.
    /// Cancelling outside a submission is a no-op too. Any other event that
    /// does not fit the current phase is an `InvalidState` error.
    pub fn on(&self, event: SubmissionEvent) -> AxiomResult<Transition> {
        use SubmissionEvent as E;

        let transition = match (self, event) {
            (state, E::Submit { .. }) if state.is_in_flight() => {
                Transition::to(state.clone(), Vec::new())
            }
            (state, E::Submit { text, attachments }) => {
                let text = text.trim();
                if text.is_empty() {
                    Transition::to(state.clone(), Vec::new())
                } else {
                    let message = Message::user(text).with_attachments(attachments);
                    Transition::to(Self::Sending, vec![Effect::AppendUser(message)])
                }
            }

            (Self::Sending, E::StreamOpened) => Transition::to(
                Self::Streaming {
                    content: String::new(),
                },
                vec![Effect::OpenPlaceholder],
            ),
            (Self::Streaming { content }, E::Delta(delta)) => {
                let content = format!("{content}{delta}");
                Transition::to(
                    Self::Streaming {
                        content: content.clone(),
                    },
                    vec![Effect::ReplaceLast(content)],
                )
            }
            (Self::Streaming { content }, E::Finished) => Transition::to(
                Self::Completed {
                    content: content.clone(),
                },
                vec![Effect::SealReply, Effect::Commit],
            ),

            (Self::Sending, E::Failed(reason)) => Transition::to(
                Self::Failed {
                    reason: reason.clone(),
                },
                vec![
                    Effect::DiscardPrompt,
                    Effect::Notify(Notification::error("Error", reason)),
                ],
            ),
            (Self::Streaming { .. }, E::Failed(reason)) => Transition::to(
                Self::Failed {
                    reason: reason.clone(),
                },
                vec![
                    Effect::DiscardPlaceholder,
                    Effect::DiscardPrompt,
                    Effect::Notify(Notification::error("Error", reason)),
                ],
            ),

            (Self::Sending, E::Cancelled) => {
                Transition::to(Self::Idle, vec![Effect::DiscardPrompt])
            }
            (Self::Streaming { .. }, E::Cancelled) => Transition::to(
                Self::Idle,
                vec![Effect::DiscardPlaceholder, Effect::DiscardPrompt],
            ),
            (state, E::Cancelled) => Transition::to(state.clone(), Vec::new()),

            (state, event) => {
                return Err(AxiomError::InvalidState(format!(
                    "{event:?} is not valid while {:?}",
                    state.phase()
                )))
            }
        };
        Ok(transition)
    }
}
