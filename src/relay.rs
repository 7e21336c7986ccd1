//! The streaming relay: one upstream completion turned into wire frames.
//!
//! A turn is opened with [`Relay::open`]. Request validation and the session
//! lookup happen before any byte is sent, so those failures surface as plain
//! errors. Once the frame stream is returned every outcome is reported in-band:
//! zero or more `chunk` frames followed by exactly one `complete` or `error`
//! frame.
//!
//! Dropping the returned stream drops the upstream stream with it, which is
//! how a client disconnect cancels the provider request.

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::client::{ClientError, ModelStream};
use crate::frame::StreamEvent;
use crate::mentor::{self, TurnContext, TurnPlan, TurnStats};
use crate::model::StreamChunk;
use crate::session::{NewMessage, Sender, Session, SessionStore, StoreError, TurnNotifier, TurnSummary};

/// Message shown to the user for any upstream failure.
pub const GENERIC_ERROR_MESSAGE: &str = "Sorry, I encountered an error. Please try again.";

/// Message shown to the user when the upstream went quiet.
pub const TIMEOUT_ERROR_MESSAGE: &str = "The mentor took too long to respond. Please try again.";

/// Encoded frames of one turn.
pub type FrameStream = BoxStream<'static, Bytes>;

/// Which flavour of the chat stream a request targets.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StreamVariant {
    /// Explanation-style answers; chunks carry no metadata.
    #[default]
    Standard,
    /// Learning-mode answers; every chunk carries the active mode.
    Premium,
}

impl StreamVariant {
    /// Route the variant is served on.
    pub fn path(&self) -> &'static str {
        match self {
            StreamVariant::Standard => "/chat/stream",
            StreamVariant::Premium => "/chat/premium/stream",
        }
    }
}

/// Body of a stream request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamRequest {
    pub session_id: String,
    pub user_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Map<String, Value>>,
}

impl StreamRequest {
    pub fn new(session_id: impl Into<String>, user_message: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_message: user_message.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: Map<String, Value>) -> Self {
        self.context = Some(context);
        self
    }
}

/// Failures raised before the first frame is sent.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Session not found")]
    SessionNotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for RelayError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::SessionNotFound(id) => RelayError::SessionNotFound(id),
            other => RelayError::Store(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Longest accepted silence between two upstream fragments.
    pub idle_timeout: Duration,
    /// Number of stored messages loaded for prompt building.
    pub history_limit: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30),
            history_limit: 10,
        }
    }
}

/// Why a turn ended without completing.
#[derive(Debug)]
enum TurnFailure {
    Upstream(ClientError),
    IdleTimeout,
}

impl TurnFailure {
    fn user_message(&self) -> &'static str {
        match self {
            TurnFailure::Upstream(ClientError::Timeout) | TurnFailure::IdleTimeout => {
                TIMEOUT_ERROR_MESSAGE
            }
            TurnFailure::Upstream(_) => GENERIC_ERROR_MESSAGE,
        }
    }
}

/// Logs when a turn's stream is dropped before reaching a terminal frame.
struct DisconnectGuard {
    session_id: String,
    finished: bool,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if !self.finished {
            info!(
                session_id = %self.session_id,
                "Client disconnected mid-turn, upstream request cancelled"
            );
        }
    }
}

/// Everything the stream body owns for one turn.
struct TurnTask {
    upstream: Arc<dyn ModelStream>,
    store: Arc<dyn SessionStore>,
    notifier: Arc<dyn TurnNotifier>,
    idle_timeout: Duration,
    session: Session,
    user_message: String,
    plan: TurnPlan,
}

pub struct Relay {
    upstream: Arc<dyn ModelStream>,
    store: Arc<dyn SessionStore>,
    notifier: Arc<dyn TurnNotifier>,
    config: RelayConfig,
}

impl Relay {
    pub fn new(
        upstream: Arc<dyn ModelStream>,
        store: Arc<dyn SessionStore>,
        notifier: Arc<dyn TurnNotifier>,
        config: RelayConfig,
    ) -> Self {
        Self {
            upstream,
            store,
            notifier,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Validate the request, load the session and start the turn.
    pub async fn open(
        &self,
        request: StreamRequest,
        variant: StreamVariant,
    ) -> Result<FrameStream, RelayError> {
        let user_message = request.user_message.trim();
        if user_message.is_empty() {
            return Err(RelayError::InvalidRequest(
                "user_message must not be empty".to_string(),
            ));
        }

        let session = self
            .store
            .get_session(&request.session_id)
            .await?
            .ok_or_else(|| RelayError::SessionNotFound(request.session_id.clone()))?;
        let history = self
            .store
            .recent_messages(&session.id, self.config.history_limit)
            .await?;

        let context = TurnContext::from_json(request.context.as_ref());
        let plan = mentor::plan_turn(&session, &history, user_message, &context, variant);
        debug!(
            session_id = %session.id,
            mode = %plan.mode,
            ?variant,
            prompt_messages = plan.prompt.message_count(),
            "Opening turn"
        );

        let task = TurnTask {
            upstream: self.upstream.clone(),
            store: self.store.clone(),
            notifier: self.notifier.clone(),
            idle_timeout: self.config.idle_timeout,
            session,
            user_message: user_message.to_string(),
            plan,
        };
        Ok(task.run())
    }
}

impl TurnTask {
    fn run(self) -> FrameStream {
        Box::pin(async_stream::stream! {
            let mut guard = DisconnectGuard {
                session_id: self.session.id.clone(),
                finished: false,
            };
            let mut content = String::new();
            let mut stats = TurnStats {
                model: self.upstream.model_name().to_string(),
                ..Default::default()
            };

            let opened = tokio::time::timeout(
                self.idle_timeout,
                self.upstream.open_stream(self.plan.prompt.clone(), &self.plan.options),
            )
            .await;

            let failure = match opened {
                Err(_) => Some(TurnFailure::IdleTimeout),
                Ok(Err(e)) => Some(TurnFailure::Upstream(e)),
                Ok(Ok(mut chunks)) => loop {
                    match tokio::time::timeout(self.idle_timeout, chunks.next()).await {
                        Err(_) => break Some(TurnFailure::IdleTimeout),
                        Ok(None) => break None,
                        Ok(Some(Err(e))) => break Some(TurnFailure::Upstream(e)),
                        Ok(Some(Ok(StreamChunk::Delta(text)))) => {
                            if text.is_empty() {
                                continue;
                            }
                            content.push_str(&text);
                            yield StreamEvent::Chunk {
                                content: text,
                                metadata: self.plan.chunk_metadata.clone(),
                            }
                            .encode();
                        }
                        Ok(Some(Ok(StreamChunk::Usage(usage)))) => stats.usage = usage,
                        Ok(Some(Ok(StreamChunk::Finish(reason)))) => stats.finish_reason = Some(reason),
                    }
                },
            };

            let terminal = self.finish(&content, &stats, failure.as_ref()).await;
            guard.finished = true;
            yield terminal.encode();
        })
    }

    /// Persist the turn, schedule the notification and build the terminal frame.
    async fn finish(
        &self,
        content: &str,
        stats: &TurnStats,
        failure: Option<&TurnFailure>,
    ) -> StreamEvent {
        let enrichment = mentor::enrich(content, self.plan.mode, self.plan.variant, stats);

        let terminal = match failure {
            None => {
                info!(
                    session_id = %self.session.id,
                    chars = content.chars().count(),
                    "Turn completed"
                );
                StreamEvent::Complete {
                    metadata: enrichment.metadata.clone(),
                    suggestions: enrichment.suggestions.clone(),
                    next_steps: enrichment.next_steps.clone(),
                }
            }
            Some(failure) => {
                match failure {
                    TurnFailure::Upstream(e) => warn!(
                        session_id = %self.session.id,
                        kind = e.kind(),
                        chars = content.len(),
                        "Upstream failed: {}",
                        e
                    ),
                    TurnFailure::IdleTimeout => warn!(
                        session_id = %self.session.id,
                        "Upstream idle for more than {:?}",
                        self.idle_timeout
                    ),
                }
                StreamEvent::error(failure.user_message())
            }
        };

        self.persist(content, enrichment.metadata, failure.is_some())
            .await;
        self.notify(content, failure.is_none());
        terminal
    }

    async fn persist(&self, content: &str, mut metadata: Map<String, Value>, incomplete: bool) {
        let user = NewMessage::user(&self.session.id, &self.user_message);
        if let Err(e) = self.store.append_message(user).await {
            warn!("Failed to store user message for session {}: {}", self.session.id, e);
            return;
        }

        if content.is_empty() {
            return;
        }
        if incomplete {
            metadata.insert("incomplete".into(), Value::Bool(true));
        }
        let mentor = NewMessage {
            session_id: self.session.id.clone(),
            message: content.to_string(),
            sender: Sender::Mentor,
            message_type: self.plan.message_type.clone(),
            metadata,
        };
        if let Err(e) = self.store.append_message(mentor).await {
            warn!("Failed to store mentor message for session {}: {}", self.session.id, e);
        }
    }

    fn notify(&self, content: &str, completed: bool) {
        let notifier = self.notifier.clone();
        let summary = TurnSummary {
            session_id: self.session.id.clone(),
            user_id: self.session.user_id.clone(),
            mode: self.plan.mode.to_string(),
            response_chars: content.chars().count(),
            completed,
        };
        tokio::spawn(async move {
            let session_id = summary.session_id.clone();
            if let Err(e) = notifier.turn_completed(summary).await {
                warn!("Turn notification failed for session {}: {}", session_id, e);
            }
        });
    }
}
