//! Drives submissions against the working transcript.

use crate::backends::{ChatBackend, ChatRequest, ChunkStream};
use crate::config::DecoderConfig;
use crate::machine::{Effect, Phase, SubmissionEvent, SubmissionState};
use crate::notify::{Notification, Notifier};
use crate::stream::{DecodeEvent, StreamDecoder};
use axiom_core::{AxiomError, AxiomResult, Attachment, Message};
use axiom_session::{PromptRef, SessionRegistry, Transcript};
use futures_util::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Ordered notifications about transcript and phase changes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatUpdate {
    /// The submission moved to a new phase.
    PhaseChanged {
        /// The phase entered.
        phase: Phase,
    },
    /// A message was added at the end of the transcript.
    MessageAppended {
        /// The appended message.
        message: Message,
    },
    /// The streaming reply changed.
    ContentReplaced {
        /// Id of the reply.
        id: Uuid,
        /// Full reply so far.
        content: String,
    },
    /// A message was taken off the end of the transcript.
    MessageRemoved {
        /// Id of the removed message.
        id: Uuid,
    },
    /// The current session changed.
    SessionChanged {
        /// New current session; `None` after a clear.
        session_id: Option<Uuid>,
    },
}

/// How a call to [`ChatOrchestrator::submit`] ended.
#[derive(Debug)]
pub enum SubmitOutcome {
    /// Blank input: nothing was appended and no request was sent.
    Ignored,
    /// The reply finished and was committed.
    Completed {
        /// Session the transcript was committed to.
        session_id: Uuid,
        /// Id of the assistant reply.
        message_id: Uuid,
    },
    /// The request or the stream failed. The user was notified.
    Failed {
        /// What went wrong.
        error: AxiomError,
    },
    /// The submission was cancelled through a [`CancelHandle`].
    Cancelled,
}

/// Cancels the submission currently streaming, if any.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Stops the current submission. Has no effect when none is running.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

enum Step {
    Chunk(Option<AxiomResult<Vec<u8>>>),
    Cancelled,
}

/// Coordinates one conversation at a time.
///
/// The orchestrator owns the working transcript of the current session and
/// is its only writer. A submission appends the user message, opens a
/// stream through the [`ChatBackend`], mirrors every decoded delta into an
/// assistant placeholder and finally commits the transcript to the
/// [`SessionRegistry`]. Failures and cancellations remove both the
/// placeholder and the unanswered user message, and leave the registry
/// untouched.
pub struct ChatOrchestrator {
    backend: Arc<dyn ChatBackend>,
    notifier: Arc<dyn Notifier>,
    registry: SessionRegistry,
    decoder_config: DecoderConfig,
    current: Option<Uuid>,
    transcript: Transcript,
    pending: Vec<Attachment>,
    state: SubmissionState,
    subscribers: Vec<mpsc::UnboundedSender<ChatUpdate>>,
    cancel: Arc<watch::Sender<bool>>,
}

impl ChatOrchestrator {
    /// Creates an orchestrator with no current session.
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        registry: SessionRegistry,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            backend,
            notifier,
            registry,
            decoder_config: DecoderConfig::default(),
            current: None,
            transcript: Transcript::new(),
            pending: Vec::new(),
            state: SubmissionState::Idle,
            subscribers: Vec::new(),
            cancel: Arc::new(cancel),
        }
    }

    /// Overrides the decoder limits.
    pub fn with_decoder_config(mut self, config: DecoderConfig) -> Self {
        self.decoder_config = config;
        self
    }

    // -----------------------------------------------------------------------
    // Submission
    // -----------------------------------------------------------------------

    /// Sends `input` as the next user message and streams the reply.
    ///
    /// Blank input is ignored. Transport and endpoint failures are reported
    /// through the notifier and returned as [`SubmitOutcome::Failed`]; an
    /// `Err` means the transcript was driven out of order.
    pub async fn submit(&mut self, input: &str) -> AxiomResult<SubmitOutcome> {
        self.abandon_in_flight()?;

        let applied = self.apply(SubmissionEvent::Submit {
            text: input.to_string(),
            attachments: self.pending.clone(),
        })?;
        if !applied {
            return Ok(SubmitOutcome::Ignored);
        }
        self.pending.clear();

        self.cancel.send_replace(false);
        let mut cancel_rx = self.cancel.subscribe();

        let request = ChatRequest::from_transcript(&self.transcript);
        debug!(messages = request.messages.len(), "Sending chat request");

        let opened = tokio::select! {
            biased;
            _ = cancel_rx.wait_for(|cancelled| *cancelled) => None,
            result = self.backend.open_stream(&request) => Some(result),
        };
        let stream = match opened {
            None => return self.cancelled(),
            Some(Err(e)) => return self.fail(e),
            Some(Ok(stream)) => stream,
        };

        self.apply(SubmissionEvent::StreamOpened)?;
        let message_id = self
            .transcript
            .last()
            .map(|m| m.id)
            .ok_or_else(|| AxiomError::InvalidState("placeholder missing".into()))?;

        match self.consume(stream, &mut cancel_rx).await? {
            Some(outcome) => Ok(outcome),
            None => {
                self.apply(SubmissionEvent::Finished)?;
                self.persist().await;
                let session_id = self
                    .current
                    .ok_or_else(|| AxiomError::InvalidState("commit left no session".into()))?;
                info!(session_id = %session_id, message_id = %message_id, "Reply completed");
                Ok(SubmitOutcome::Completed {
                    session_id,
                    message_id,
                })
            }
        }
    }

    /// Pulls chunks until the reply is done. Returns an outcome only when
    /// the submission ended early.
    async fn consume(
        &mut self,
        mut stream: ChunkStream,
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> AxiomResult<Option<SubmitOutcome>> {
        let mut decoder = StreamDecoder::new(self.decoder_config.clone());

        loop {
            let step = tokio::select! {
                biased;
                _ = cancel_rx.wait_for(|cancelled| *cancelled) => Step::Cancelled,
                chunk = stream.next() => Step::Chunk(chunk),
            };

            let events = match step {
                Step::Cancelled => {
                    drop(stream);
                    return self.cancelled().map(Some);
                }
                Step::Chunk(Some(Ok(bytes))) => {
                    debug!(bytes = bytes.len(), "Chunk received");
                    decoder.feed(&bytes)
                }
                Step::Chunk(Some(Err(e))) => {
                    drop(stream);
                    return self.fail(e).map(Some);
                }
                Step::Chunk(None) => decoder.finish(),
            };

            for event in events {
                match event {
                    DecodeEvent::Delta(delta) => {
                        self.apply(SubmissionEvent::Delta(delta))?;
                    }
                    DecodeEvent::Done => return Ok(None),
                    DecodeEvent::Error(message) => {
                        return self.fail(AxiomError::Stream(message)).map(Some);
                    }
                }
            }

            if decoder.is_finished() {
                return Ok(None);
            }
        }
    }

    fn fail(&mut self, error: AxiomError) -> AxiomResult<SubmitOutcome> {
        if error.is_transport() {
            warn!(error = %error, "Submission failed");
        } else {
            error!(error = %error, "Submission failed");
        }
        self.apply(SubmissionEvent::Failed(error.user_message()))?;
        Ok(SubmitOutcome::Failed { error })
    }

    fn cancelled(&mut self) -> AxiomResult<SubmitOutcome> {
        info!("Submission cancelled");
        self.apply(SubmissionEvent::Cancelled)?;
        Ok(SubmitOutcome::Cancelled)
    }

    /// Resets a submission whose future was dropped before it finished.
    fn abandon_in_flight(&mut self) -> AxiomResult<()> {
        if self.state.is_in_flight() {
            debug!(phase = ?self.state.phase(), "Discarding abandoned submission");
            self.apply(SubmissionEvent::Cancelled)?;
        }
        Ok(())
    }

    /// Runs one machine transition and applies its effects.
    ///
    /// Returns `false` when the event changed nothing.
    fn apply(&mut self, event: SubmissionEvent) -> AxiomResult<bool> {
        let transition = self.state.on(event)?;
        if transition.is_noop(&self.state) {
            return Ok(false);
        }

        let phase_changed = transition.next.phase() != self.state.phase();
        self.state = transition.next;
        if phase_changed {
            self.emit(ChatUpdate::PhaseChanged {
                phase: self.state.phase(),
            });
        }

        for effect in transition.effects {
            self.run_effect(effect)?;
        }
        Ok(true)
    }

    fn run_effect(&mut self, effect: Effect) -> AxiomResult<()> {
        match effect {
            Effect::AppendUser(message) => {
                self.transcript.append(message.clone())?;
                self.emit(ChatUpdate::MessageAppended { message });
            }
            Effect::OpenPlaceholder => {
                self.transcript.begin_assistant()?;
                if let Some(message) = self.transcript.last().cloned() {
                    self.emit(ChatUpdate::MessageAppended { message });
                }
            }
            Effect::ReplaceLast(content) => {
                self.transcript.replace_last(content.clone())?;
                if let Some(id) = self.transcript.last().map(|m| m.id) {
                    self.emit(ChatUpdate::ContentReplaced { id, content });
                }
            }
            Effect::SealReply => self.transcript.seal(),
            Effect::DiscardPlaceholder => {
                if let Some(removed) = self.transcript.discard_open() {
                    self.emit(ChatUpdate::MessageRemoved { id: removed.id });
                }
            }
            Effect::DiscardPrompt => {
                if let Some(removed) = self.transcript.retract_prompt() {
                    self.emit(ChatUpdate::MessageRemoved { id: removed.id });
                }
            }
            Effect::Notify(notification) => self.notifier.notify(notification),
            Effect::Commit => self.commit()?,
        }
        Ok(())
    }

    /// Stores the working transcript under the current session, creating one
    /// when there is none.
    fn commit(&mut self) -> AxiomResult<()> {
        let id = match self.current {
            Some(id) if self.registry.contains(id) => id,
            _ => {
                let id = self.registry.create_session().id;
                self.current = Some(id);
                self.emit(ChatUpdate::SessionChanged {
                    session_id: Some(id),
                });
                id
            }
        };
        self.registry.commit(id, self.transcript.clone())?;
        Ok(())
    }

    async fn persist(&self) {
        if let Err(e) = self.registry.persist().await {
            warn!(error = %e, "Failed to persist sessions");
        }
    }

    fn emit(&mut self, update: ChatUpdate) {
        self.subscribers.retain(|tx| tx.send(update.clone()).is_ok());
    }

    // -----------------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------------

    /// Creates an empty session, makes it current and clears the working
    /// transcript.
    pub async fn new_session(&mut self) -> AxiomResult<Uuid> {
        self.abandon_in_flight()?;
        let id = self.registry.create_session().id;
        self.switch_to(Some(id), Transcript::new());
        self.persist().await;
        Ok(id)
    }

    /// Makes an existing session current and loads its transcript.
    pub fn open_session(&mut self, id: Uuid) -> AxiomResult<()> {
        let transcript = self.registry.load(id)?.transcript.clone();
        self.abandon_in_flight()?;
        self.switch_to(Some(id), transcript);
        info!(session_id = %id, "Session opened");
        Ok(())
    }

    /// Empties the working transcript and unsets the current session.
    /// Stored sessions are left as they are.
    pub fn clear(&mut self) -> AxiomResult<()> {
        self.abandon_in_flight()?;
        self.switch_to(None, Transcript::new());
        Ok(())
    }

    fn switch_to(&mut self, session: Option<Uuid>, transcript: Transcript) {
        self.current = session;
        self.transcript = transcript;
        if self.state != SubmissionState::Idle {
            self.state = SubmissionState::Idle;
            self.emit(ChatUpdate::PhaseChanged { phase: Phase::Idle });
        }
        self.emit(ChatUpdate::SessionChanged {
            session_id: session,
        });
    }

    // -----------------------------------------------------------------------
    // Attachments
    // -----------------------------------------------------------------------

    /// Queues attachments for the next submission.
    pub fn attach(&mut self, attachments: impl IntoIterator<Item = Attachment>) {
        let before = self.pending.len();
        self.pending.extend(attachments);
        let added = self.pending.len() - before;
        if added > 0 {
            self.notifier.notify(Notification::info(
                "Files attached",
                format!("{added} file(s) attached"),
            ));
        }
    }

    /// Removes the pending attachment at `index`.
    pub fn detach(&mut self, index: usize) -> Option<Attachment> {
        (index < self.pending.len()).then(|| self.pending.remove(index))
    }

    /// Attachments waiting for the next submission.
    pub fn pending_attachments(&self) -> &[Attachment] {
        &self.pending
    }

    // -----------------------------------------------------------------------
    // Observation
    // -----------------------------------------------------------------------

    /// Registers an observer. Updates are delivered in the order the
    /// transcript changes.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ChatUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Handle for cancelling submissions from another task.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: Arc::clone(&self.cancel),
        }
    }

    /// The working transcript.
    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Id of the session commits go to, if any.
    pub fn current_session(&self) -> Option<Uuid> {
        self.current
    }

    /// Phase of the current or last submission.
    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    /// Stored sessions.
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Messages of the working transcript containing `query`, ignoring case.
    pub fn search(&self, query: &str) -> Vec<&Message> {
        axiom_session::search(&self.transcript, query)
    }

    /// The user's prompts in the working transcript.
    pub fn user_prompts(&self) -> Vec<PromptRef<'_>> {
        axiom_session::user_prompts(&self.transcript)
    }

    /// Number of stored sessions.
    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    /// Messages across all stored sessions.
    pub fn message_count(&self) -> usize {
        self.registry.message_count()
    }
}
