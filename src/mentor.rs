//! Mentor turn planning: learning modes, prompts and response enrichment.

pub mod enrich;
pub mod prompt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::client::StreamOptions;
use crate::model::{Message, Prompt};
use crate::relay::StreamVariant;
use crate::session::{ChatMessage, Sender, Session};

pub use enrich::{enrich, Enrichment, TurnStats};

/// Number of stored messages inserted between the system prompt and the user message.
pub const HISTORY_WINDOW: usize = 6;

/// How the mentor approaches a turn.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LearningMode {
    #[default]
    Adaptive,
    Socratic,
    Debug,
    Challenge,
    Mentor,
}

impl LearningMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LearningMode::Adaptive => "adaptive",
            LearningMode::Socratic => "socratic",
            LearningMode::Debug => "debug",
            LearningMode::Challenge => "challenge",
            LearningMode::Mentor => "mentor",
        }
    }

    /// Pick a mode from the wording of the user's message.
    ///
    /// # Example
    /// ```
    /// use chatrelay::mentor::LearningMode;
    ///
    /// assert_eq!(LearningMode::detect("Why does this loop never end?"), LearningMode::Socratic);
    /// assert_eq!(LearningMode::detect("Quiz me on pointers"), LearningMode::Challenge);
    /// assert_eq!(LearningMode::detect("Explain recursion"), LearningMode::Adaptive);
    /// ```
    pub fn detect(message: &str) -> Self {
        const RULES: &[(LearningMode, &[&str])] = &[
            (LearningMode::Socratic, &["why", "how does", "what if", "explain why"]),
            (
                LearningMode::Debug,
                &["confused", "don't understand", "mistake", "wrong", "error"],
            ),
            (
                LearningMode::Challenge,
                &["challenge", "harder", "difficult", "test me", "quiz"],
            ),
            (
                LearningMode::Mentor,
                &["career", "professional", "industry", "job", "work"],
            ),
        ];

        let lower = message.to_lowercase();
        RULES
            .iter()
            .find(|(_, words)| words.iter().any(|w| lower.contains(w)))
            .map(|(mode, _)| *mode)
            .unwrap_or_default()
    }
}

impl fmt::Display for LearningMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LearningMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "adaptive" => Ok(LearningMode::Adaptive),
            "socratic" => Ok(LearningMode::Socratic),
            "debug" => Ok(LearningMode::Debug),
            "challenge" => Ok(LearningMode::Challenge),
            "mentor" => Ok(LearningMode::Mentor),
            other => Err(format!("unknown learning mode '{}'", other)),
        }
    }
}

/// Recognised keys of the free-form request context.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnContext {
    pub learning_mode: Option<LearningMode>,
    pub user_background: Option<String>,
    pub recent_topics: Vec<String>,
    pub learning_style: Option<String>,
}

impl TurnContext {
    /// Read the known keys, ignoring anything else or anything mistyped.
    pub fn from_json(context: Option<&Map<String, Value>>) -> Self {
        let Some(context) = context else {
            return Self::default();
        };
        let text = |key: &str| {
            context
                .get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        Self {
            learning_mode: text("learning_mode").and_then(|m| m.parse().ok()),
            user_background: text("user_background"),
            recent_topics: context
                .get("recent_topics")
                .and_then(Value::as_array)
                .map(|topics| {
                    topics
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            learning_style: text("learning_style"),
        }
    }
}

/// Everything the relay needs to run one turn.
#[derive(Debug, Clone)]
pub struct TurnPlan {
    pub mode: LearningMode,
    pub variant: StreamVariant,
    pub prompt: Prompt,
    pub options: StreamOptions,
    /// Stored as the mentor message's `message_type`.
    pub message_type: String,
    /// Attached to every chunk frame, if any.
    pub chunk_metadata: Option<Map<String, Value>>,
}

/// Build the prompt and options for one turn.
pub fn plan_turn(
    session: &Session,
    history: &[ChatMessage],
    user_message: &str,
    context: &TurnContext,
    variant: StreamVariant,
) -> TurnPlan {
    let mode = match variant {
        StreamVariant::Standard => LearningMode::Adaptive,
        StreamVariant::Premium => context
            .learning_mode
            .unwrap_or_else(|| LearningMode::detect(user_message)),
    };

    let instructions = prompt::system_prompt(mode, variant, session, context, history);
    let start = history.len().saturating_sub(HISTORY_WINDOW);
    let window = history[start..]
        .iter()
        .map(|m| match m.sender {
            Sender::User => Message::user(m.message.clone()),
            Sender::Mentor => Message::assistant(m.message.clone()),
        })
        .collect();

    let (message_type, chunk_metadata) = match variant {
        StreamVariant::Standard => ("explanation".to_string(), None),
        StreamVariant::Premium => {
            let mut metadata = Map::new();
            metadata.insert("mode".into(), Value::String(mode.to_string()));
            (format!("premium_{}", mode), Some(metadata))
        }
    };

    TurnPlan {
        mode,
        variant,
        prompt: Prompt::new(instructions, window, user_message),
        options: prompt::stream_options(mode),
        message_type,
        chunk_metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;
    use crate::session::{NewMessage, NewSession};
    use chrono::Utc;
    use serde_json::json;

    fn session() -> Session {
        Session::new(NewSession {
            user_id: "u1".into(),
            subject: Some("Algorithms".into()),
            learning_objectives: vec!["recursion".into()],
            difficulty_level: "intermediate".into(),
        })
    }

    fn stored(sender: Sender, text: &str) -> ChatMessage {
        let new = NewMessage::user("s1", text);
        ChatMessage {
            id: text.to_string(),
            session_id: new.session_id,
            message: new.message,
            sender,
            message_type: new.message_type,
            metadata: new.metadata,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_detect_priority() {
        // socratic keywords win over debug ones
        assert_eq!(
            LearningMode::detect("Why is my answer wrong?"),
            LearningMode::Socratic
        );
        assert_eq!(
            LearningMode::detect("I'm confused about closures"),
            LearningMode::Debug
        );
        assert_eq!(
            LearningMode::detect("What jobs use Rust?"),
            LearningMode::Mentor
        );
    }

    #[test]
    fn test_context_parsing() {
        let context = json!({
            "learning_mode": "Challenge",
            "user_background": "  ",
            "recent_topics": ["loops", 3, "arrays"],
            "unrelated": true
        });
        let parsed = TurnContext::from_json(context.as_object());
        assert_eq!(parsed.learning_mode, Some(LearningMode::Challenge));
        assert_eq!(parsed.user_background, None);
        assert_eq!(parsed.recent_topics, vec!["loops".to_string(), "arrays".to_string()]);

        let bad_mode = json!({"learning_mode": "telepathy"});
        assert_eq!(TurnContext::from_json(bad_mode.as_object()).learning_mode, None);
        assert_eq!(TurnContext::from_json(None), TurnContext::default());
    }

    #[test]
    fn test_standard_plan_ignores_requested_mode() {
        let context = TurnContext {
            learning_mode: Some(LearningMode::Debug),
            ..Default::default()
        };
        let plan = plan_turn(&session(), &[], "Explain recursion", &context, StreamVariant::Standard);
        assert_eq!(plan.mode, LearningMode::Adaptive);
        assert_eq!(plan.message_type, "explanation");
        assert!(plan.chunk_metadata.is_none());
    }

    #[test]
    fn test_premium_plan_uses_mode_and_history_window() {
        let history: Vec<_> = (0..8)
            .map(|i| {
                let sender = if i % 2 == 0 { Sender::User } else { Sender::Mentor };
                stored(sender, &format!("m{}", i))
            })
            .collect();
        let plan = plan_turn(
            &session(),
            &history,
            "Why does recursion need a base case?",
            &TurnContext::default(),
            StreamVariant::Premium,
        );

        assert_eq!(plan.mode, LearningMode::Socratic);
        assert_eq!(plan.message_type, "premium_socratic");
        assert_eq!(
            plan.chunk_metadata.as_ref().and_then(|m| m.get("mode")),
            Some(&json!("socratic"))
        );
        // system + 6 history + user
        assert_eq!(plan.prompt.message_count(), 8);
        let messages: Vec<_> = plan.prompt.messages.iter().collect();
        assert_eq!(messages[1].content, "m2");
        assert_eq!(messages[1].role, Role::User);
        assert_eq!(messages[2].role, Role::Assistant);
        assert_eq!(plan.prompt.last().content, "Why does recursion need a base case?");
    }
}
