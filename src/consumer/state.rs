//! Per-turn state machine and the conversation view built on top of it.
//!
//! A [`Turn`] moves `Idle -> Streaming -> Completed | Failed`. Once terminal it
//! ignores every further event. [`Conversation`] owns at most one active turn
//! and reduces [`Action`]s into it; a submit while a turn is streaming cancels
//! that turn and replaces it.

use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::frame::StreamEvent;

/// Identifies one request so late events from a replaced turn can be dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Everything that can happen to an in-flight turn.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    /// A decoded frame.
    Frame(StreamEvent),
    /// The relay refused the request before streaming.
    Rejected { status: u16, detail: String },
    /// The connection failed.
    TransportFailed(String),
    /// The overall time budget ran out.
    TimedOut,
    /// The body ended without a terminal frame.
    Closed,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TurnError {
    #[error("Request rejected ({status}): {detail}")]
    Rejected { status: u16, detail: String },

    #[error("{0}")]
    Provider(String),

    #[error("Connection failed: {0}")]
    Transport(String),

    #[error("The response took too long")]
    Timeout,

    #[error("Replaced by a newer message")]
    Superseded,
}

/// Content accumulated while streaming.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialMessage {
    pub content: String,
    pub metadata: Map<String, Value>,
}

/// A completed mentor reply.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalMessage {
    pub content: String,
    pub metadata: Map<String, Value>,
    pub suggestions: Vec<String>,
    pub next_steps: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TurnState {
    Idle,
    Streaming(PartialMessage),
    Completed(FinalMessage),
    Failed {
        partial: Option<PartialMessage>,
        error: TurnError,
    },
}

/// One user message and the reply being streamed for it.
#[derive(Debug, Clone)]
pub struct Turn {
    id: RequestId,
    user_text: String,
    state: TurnState,
}

impl Turn {
    pub fn new(id: RequestId, user_text: impl Into<String>) -> Self {
        Self {
            id,
            user_text: user_text.into(),
            state: TurnState::Idle,
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn user_text(&self) -> &str {
        &self.user_text
    }

    pub fn state(&self) -> &TurnState {
        &self.state
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.state, TurnState::Streaming(_))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            TurnState::Completed(_) | TurnState::Failed { .. }
        )
    }

    /// The request has been sent.
    pub fn start(&mut self) {
        if matches!(self.state, TurnState::Idle) {
            self.state = TurnState::Streaming(PartialMessage::default());
        }
    }

    /// Content received so far, only while streaming.
    pub fn live_content(&self) -> Option<&str> {
        match &self.state {
            TurnState::Streaming(partial) => Some(&partial.content),
            _ => None,
        }
    }

    /// Apply one event. Returns whether the state changed.
    pub fn apply(&mut self, event: TurnEvent) -> bool {
        let partial = match &mut self.state {
            TurnState::Streaming(partial) => partial,
            TurnState::Idle => {
                debug!("Turn {} got an event before starting, ignoring", self.id);
                return false;
            }
            TurnState::Completed(_) | TurnState::Failed { .. } => {
                debug!("Turn {} is terminal, ignoring {:?}", self.id, event);
                return false;
            }
        };

        let error = match event {
            TurnEvent::Frame(StreamEvent::Chunk { content, metadata }) => {
                partial.content.push_str(&content);
                if let Some(metadata) = metadata {
                    partial.metadata = metadata;
                }
                return true;
            }
            TurnEvent::Frame(StreamEvent::Complete {
                metadata,
                suggestions,
                next_steps,
            }) => {
                let content = std::mem::take(&mut partial.content);
                self.state = TurnState::Completed(FinalMessage {
                    content,
                    metadata,
                    suggestions,
                    next_steps,
                });
                return true;
            }
            TurnEvent::Frame(StreamEvent::Error { message }) => TurnError::Provider(message),
            TurnEvent::Rejected { status, detail } => TurnError::Rejected { status, detail },
            TurnEvent::TransportFailed(message) => TurnError::Transport(message),
            TurnEvent::TimedOut => TurnError::Timeout,
            TurnEvent::Closed => {
                TurnError::Transport("stream ended before the reply was complete".to_string())
            }
        };
        self.fail(error);
        true
    }

    /// Mark a streaming turn as replaced by a newer one.
    pub fn supersede(&mut self) {
        if !self.is_terminal() {
            self.fail(TurnError::Superseded);
        }
    }

    fn fail(&mut self, error: TurnError) {
        let partial = match std::mem::replace(&mut self.state, TurnState::Idle) {
            TurnState::Streaming(partial) if !partial.content.is_empty() => Some(partial),
            _ => None,
        };
        self.state = TurnState::Failed { partial, error };
    }
}

/// How a finished turn ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    Completed(FinalMessage),
    /// Partial content, if any, is kept so the user can read it or retry.
    Failed {
        partial: Option<PartialMessage>,
        error: TurnError,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub id: RequestId,
    pub user_text: String,
    pub outcome: TurnOutcome,
}

impl HistoryEntry {
    /// Shown with an "incomplete" marker.
    pub fn is_incomplete(&self) -> bool {
        matches!(
            self.outcome,
            TurnOutcome::Failed {
                partial: Some(_),
                ..
            }
        )
    }

    /// Text to resend if the turn failed.
    pub fn retry_text(&self) -> Option<&str> {
        match self.outcome {
            TurnOutcome::Failed { .. } => Some(&self.user_text),
            TurnOutcome::Completed(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Submit { id: RequestId, text: String },
    Event { id: RequestId, event: TurnEvent },
}

/// Side effect the caller must perform after a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Abort the HTTP request of a replaced turn.
    Cancel(RequestId),
}

/// The chat view: finished turns plus at most one active turn.
#[derive(Debug, Default)]
pub struct Conversation {
    history: Vec<HistoryEntry>,
    active: Option<Turn>,
    banner: Option<String>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispatch(&mut self, action: Action) -> Option<Effect> {
        match action {
            Action::Submit { id, text } => {
                let mut effect = None;
                if let Some(mut previous) = self.active.take() {
                    debug!("Turn {} replaced by {}", previous.id(), id);
                    previous.supersede();
                    effect = Some(Effect::Cancel(previous.id()));
                    self.archive(previous);
                }

                let mut turn = Turn::new(id, text);
                turn.start();
                self.active = Some(turn);
                self.banner = None;
                effect
            }
            Action::Event { id, event } => {
                let Some(turn) = self.active.as_mut().filter(|t| t.id() == id) else {
                    debug!("Dropping event for inactive turn {}", id);
                    return None;
                };
                turn.apply(event);
                if turn.is_terminal() {
                    if let Some(turn) = self.active.take() {
                        self.archive(turn);
                    }
                }
                None
            }
        }
    }

    fn archive(&mut self, turn: Turn) {
        let Turn {
            id,
            user_text,
            state,
        } = turn;
        let outcome = match state {
            TurnState::Completed(message) => TurnOutcome::Completed(message),
            TurnState::Failed { partial, error } => {
                if partial.is_none() && error != TurnError::Superseded {
                    self.banner = Some(error.to_string());
                }
                TurnOutcome::Failed { partial, error }
            }
            TurnState::Idle | TurnState::Streaming(_) => return,
        };
        self.history.push(HistoryEntry {
            id,
            user_text,
            outcome,
        });
    }

    /// Whether the typing indicator is shown.
    pub fn is_typing(&self) -> bool {
        self.active.as_ref().is_some_and(Turn::is_streaming)
    }

    pub fn input_enabled(&self) -> bool {
        !self.is_typing()
    }

    /// The reply currently being streamed.
    pub fn live_message(&self) -> Option<&str> {
        self.active.as_ref().and_then(Turn::live_content)
    }

    pub fn active_id(&self) -> Option<RequestId> {
        self.active.as_ref().map(Turn::id)
    }

    /// Error shown for a turn that failed before producing content.
    pub fn banner(&self) -> Option<&str> {
        self.banner.as_deref()
    }

    pub fn dismiss_banner(&mut self) {
        self.banner = None;
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn submit(conversation: &mut Conversation, text: &str) -> RequestId {
        let id = RequestId::new();
        conversation.dispatch(Action::Submit {
            id,
            text: text.to_string(),
        });
        id
    }

    fn frame(conversation: &mut Conversation, id: RequestId, event: StreamEvent) {
        conversation.dispatch(Action::Event {
            id,
            event: TurnEvent::Frame(event),
        });
    }

    fn complete(suggestions: &[&str]) -> StreamEvent {
        StreamEvent::Complete {
            metadata: Map::new(),
            suggestions: suggestions.iter().map(|s| s.to_string()).collect(),
            next_steps: None,
        }
    }

    #[test]
    fn test_chunks_then_complete() {
        let mut conversation = Conversation::new();
        let id = submit(&mut conversation, "Explain recursion");
        assert!(conversation.is_typing());
        assert!(!conversation.input_enabled());

        frame(&mut conversation, id, StreamEvent::chunk("Recur"));
        frame(&mut conversation, id, StreamEvent::chunk("sion is"));
        assert_eq!(conversation.live_message(), Some("Recursion is"));
        frame(&mut conversation, id, StreamEvent::chunk("..."));
        frame(&mut conversation, id, complete(&["Try an example"]));

        assert!(!conversation.is_typing());
        assert!(conversation.input_enabled());
        assert_eq!(conversation.live_message(), None);
        assert_eq!(conversation.banner(), None);
        match &conversation.history()[0].outcome {
            TurnOutcome::Completed(message) => {
                assert_eq!(message.content, "Recursion is...");
                assert_eq!(message.suggestions, vec!["Try an example"]);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_error_without_content_shows_banner() {
        let mut conversation = Conversation::new();
        let id = submit(&mut conversation, "hi");
        frame(
            &mut conversation,
            id,
            StreamEvent::error("Sorry, I encountered an error. Please try again."),
        );

        assert!(conversation.input_enabled());
        assert_eq!(
            conversation.banner(),
            Some("Sorry, I encountered an error. Please try again.")
        );
        let entry = &conversation.history()[0];
        assert!(!entry.is_incomplete());
        assert_eq!(entry.retry_text(), Some("hi"));
    }

    #[test]
    fn test_failure_after_content_keeps_partial() {
        let mut conversation = Conversation::new();
        let id = submit(&mut conversation, "hi");
        frame(&mut conversation, id, StreamEvent::chunk("Half an answ"));
        conversation.dispatch(Action::Event {
            id,
            event: TurnEvent::TimedOut,
        });

        assert!(conversation.input_enabled());
        assert_eq!(conversation.banner(), None);
        let entry = &conversation.history()[0];
        assert!(entry.is_incomplete());
        assert!(matches!(
            &entry.outcome,
            TurnOutcome::Failed { partial: Some(p), error: TurnError::Timeout } if p.content == "Half an answ"
        ));
    }

    #[test]
    fn test_submit_while_streaming_replaces_turn() {
        let mut conversation = Conversation::new();
        let first = submit(&mut conversation, "first");
        frame(&mut conversation, first, StreamEvent::chunk("partial"));

        let second = RequestId::new();
        let effect = conversation.dispatch(Action::Submit {
            id: second,
            text: "second".into(),
        });
        assert_eq!(effect, Some(Effect::Cancel(first)));
        assert_eq!(conversation.active_id(), Some(second));
        assert_eq!(conversation.live_message(), Some(""));

        // late frames of the replaced turn are dropped
        frame(&mut conversation, first, StreamEvent::chunk(" more"));
        frame(&mut conversation, first, complete(&[]));
        assert_eq!(conversation.live_message(), Some(""));
        assert!(conversation.is_typing());
        assert_eq!(conversation.history().len(), 1);
        assert!(matches!(
            conversation.history()[0].outcome,
            TurnOutcome::Failed { error: TurnError::Superseded, .. }
        ));
        assert_eq!(conversation.banner(), None);
    }

    #[test]
    fn test_rejected_request() {
        let mut conversation = Conversation::new();
        let id = submit(&mut conversation, "hi");
        conversation.dispatch(Action::Event {
            id,
            event: TurnEvent::Rejected {
                status: 404,
                detail: "Session not found".into(),
            },
        });
        assert!(conversation.input_enabled());
        assert_eq!(
            conversation.banner(),
            Some("Request rejected (404): Session not found")
        );
    }

    #[test]
    fn test_terminal_turn_ignores_events() {
        let mut turn = Turn::new(RequestId::new(), "hi");
        assert!(!turn.apply(TurnEvent::Frame(StreamEvent::chunk("early"))));
        turn.start();
        assert!(turn.apply(TurnEvent::Frame(StreamEvent::chunk("a"))));
        assert!(turn.apply(TurnEvent::Closed));
        assert!(!turn.apply(TurnEvent::Frame(StreamEvent::chunk("b"))));
        assert!(matches!(
            turn.state(),
            TurnState::Failed { partial: Some(p), error: TurnError::Transport(_) } if p.content == "a"
        ));
    }

    #[test]
    fn test_chunk_metadata_is_kept() {
        let mut turn = Turn::new(RequestId::new(), "hi");
        turn.start();
        turn.apply(TurnEvent::Frame(StreamEvent::Chunk {
            content: "x".into(),
            metadata: json!({"mode": "debug"}).as_object().cloned(),
        }));
        match turn.state() {
            TurnState::Streaming(partial) => assert_eq!(partial.metadata["mode"], json!("debug")),
            other => panic!("unexpected state {:?}", other),
        }
    }
}
