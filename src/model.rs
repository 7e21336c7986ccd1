//! Provider-agnostic prompt and streaming types.

use nonempty::NonEmpty;
use serde::{Deserialize, Serialize};

/// Role of the message sender.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single message in the prompt sent upstream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Full prompt context for one completion.
///
/// Always holds at least one message. By convention the system
/// instructions come first and the user's new message comes last,
/// with conversation history in between.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prompt {
    pub messages: NonEmpty<Message>,
}

impl Prompt {
    /// Build a prompt from system instructions, prior history and the new user message.
    pub fn new(instructions: impl Into<String>, history: Vec<Message>, user: impl Into<String>) -> Self {
        let mut messages = NonEmpty::new(Message::system(instructions));
        messages.extend(history);
        messages.push(Message::user(user));
        Self { messages }
    }

    /// The final message of the prompt, normally the user's input.
    pub fn last(&self) -> &Message {
        self.messages.last()
    }

    /// Messages sent upstream, the system prompt included. Never zero.
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }
}

/// Reason for finishing the response generation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    OutputTokens,
    ContentFilter,
    Other,
}

impl FinishReason {
    /// Map an OpenAI-style `finish_reason` string.
    pub fn from_wire(reason: &str) -> Self {
        match reason {
            "stop" => FinishReason::Stop,
            "length" => FinishReason::OutputTokens,
            "content_filter" => FinishReason::ContentFilter,
            _ => FinishReason::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::OutputTokens => "output_tokens",
            FinishReason::ContentFilter => "content_filter",
            FinishReason::Other => "other",
        }
    }
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u32>,
}

/// One item of an upstream completion stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum StreamChunk {
    /// Incremental content fragment
    Delta(String),

    /// Token usage information
    Usage(Usage),

    /// Finish reason, the final marker of a successful stream
    Finish(FinishReason),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_order() {
        let prompt = Prompt::new(
            "be helpful",
            vec![Message::user("hi"), Message::assistant("hello")],
            "Explain recursion",
        );

        assert_eq!(prompt.message_count(), 4);
        assert_eq!(prompt.messages.head.role, Role::System);
        assert_eq!(prompt.last(), &Message::user("Explain recursion"));
    }

    #[test]
    fn test_finish_reason_from_wire() {
        assert_eq!(FinishReason::from_wire("stop"), FinishReason::Stop);
        assert_eq!(FinishReason::from_wire("length"), FinishReason::OutputTokens);
        assert_eq!(FinishReason::from_wire("tool_calls"), FinishReason::Other);
    }
}
