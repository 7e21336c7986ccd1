//! Session and message store contract, plus an in-memory implementation.
//!
//! The relay reads sessions and appends messages only after a turn has
//! reached its terminal state. Anything richer (users, persistence, scoring)
//! lives behind these traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Session '{0}' not found")]
    SessionNotFound(String),

    #[error("Store backend error: {0}")]
    Backend(String),
}

/// A learning session owned by the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub current_topic: Option<String>,
    #[serde(default)]
    pub learning_objectives: Vec<String>,
    #[serde(default = "default_difficulty")]
    pub difficulty_level: String,
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_difficulty() -> String {
    "beginner".to_string()
}

fn default_active() -> bool {
    true
}

/// Fields accepted when creating a session.
#[derive(Debug, Clone, Deserialize)]
pub struct NewSession {
    pub user_id: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub learning_objectives: Vec<String>,
    #[serde(default = "default_difficulty")]
    pub difficulty_level: String,
}

impl Session {
    pub fn new(request: NewSession) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: request.user_id,
            subject: request.subject,
            current_topic: None,
            learning_objectives: request.learning_objectives,
            difficulty_level: request.difficulty_level,
            created_at: Utc::now(),
            is_active: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Mentor,
}

/// A stored chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub id: String,
    pub session_id: String,
    pub message: String,
    pub sender: Sender,
    pub message_type: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

/// A message to append.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub session_id: String,
    pub message: String,
    pub sender: Sender,
    pub message_type: String,
    pub metadata: Map<String, Value>,
}

impl NewMessage {
    pub fn user(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            message: message.into(),
            sender: Sender::User,
            message_type: "text".to_string(),
            metadata: Map::new(),
        }
    }
}

/// Session/message store used by the relay.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, request: NewSession) -> Result<Session, StoreError>;

    async fn get_session(&self, id: &str) -> Result<Option<Session>, StoreError>;

    /// The most recent `limit` messages of a session, oldest first.
    async fn recent_messages(&self, id: &str, limit: usize) -> Result<Vec<ChatMessage>, StoreError>;

    async fn append_message(&self, message: NewMessage) -> Result<ChatMessage, StoreError>;
}

/// In-memory store backed by `RwLock`ed maps.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    messages: RwLock<HashMap<String, Vec<ChatMessage>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session with a caller-chosen id.
    pub async fn insert(&self, session: Session) {
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session);
    }

    /// Every message of a session, oldest first.
    pub async fn messages(&self, id: &str) -> Vec<ChatMessage> {
        self.messages
            .read()
            .await
            .get(id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create_session(&self, request: NewSession) -> Result<Session, StoreError> {
        let session = Session::new(request);
        self.insert(session.clone()).await;
        Ok(session)
    }

    async fn get_session(&self, id: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions.read().await.get(id).cloned())
    }

    async fn recent_messages(&self, id: &str, limit: usize) -> Result<Vec<ChatMessage>, StoreError> {
        let messages = self.messages.read().await;
        let all = messages.get(id).map(Vec::as_slice).unwrap_or_default();
        let start = all.len().saturating_sub(limit);
        Ok(all[start..].to_vec())
    }

    async fn append_message(&self, message: NewMessage) -> Result<ChatMessage, StoreError> {
        if !self.sessions.read().await.contains_key(&message.session_id) {
            return Err(StoreError::SessionNotFound(message.session_id));
        }

        let stored = ChatMessage {
            id: Uuid::new_v4().to_string(),
            session_id: message.session_id,
            message: message.message,
            sender: message.sender,
            message_type: message.message_type,
            metadata: message.metadata,
            timestamp: Utc::now(),
        };
        self.messages
            .write()
            .await
            .entry(stored.session_id.clone())
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }
}

/// Summary of a finished turn, handed to analytics.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TurnSummary {
    pub session_id: String,
    pub user_id: String,
    pub mode: String,
    pub response_chars: usize,
    pub completed: bool,
}

/// Receives a notification after every turn. Failures never affect the turn.
#[async_trait]
pub trait TurnNotifier: Send + Sync {
    async fn turn_completed(&self, summary: TurnSummary) -> Result<(), StoreError>;
}

/// Notifier that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl TurnNotifier for LogNotifier {
    async fn turn_completed(&self, summary: TurnSummary) -> Result<(), StoreError> {
        info!(
            session_id = %summary.session_id,
            user_id = %summary.user_id,
            mode = %summary.mode,
            chars = summary.response_chars,
            completed = summary.completed,
            "Turn finished"
        );
        Ok(())
    }
}
