//! Wire frames exchanged between the relay and the browser.
//!
//! Every frame is one JSON object with a `type` discriminator, written as a
//! single SSE `data:` line followed by a blank line:
//!
//! ```text
//! data: {"type":"chunk","content":"Recur","metadata":{"mode":"socratic"}}
//!
//! data: {"type":"complete","metadata":{},"suggestions":["Try an example"],"next_steps":null}
//!
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Prefix of every frame line.
pub const FRAME_PREFIX: &str = "data: ";

/// Separator that terminates a frame.
pub const FRAME_TERMINATOR: &str = "\n\n";

/// Content type of the streaming response.
pub const STREAM_CONTENT_TYPE: &str = "text/event-stream";

/// One event of a relayed stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    /// Incremental content fragment.
    Chunk {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<Map<String, Value>>,
    },

    /// Terminal success event carrying the derived enrichment.
    Complete {
        #[serde(default)]
        metadata: Map<String, Value>,
        #[serde(default)]
        suggestions: Vec<String>,
        #[serde(default)]
        next_steps: Option<String>,
    },

    /// Terminal failure event with a human-readable message.
    Error { message: String },
}

impl StreamEvent {
    pub fn chunk(content: impl Into<String>) -> Self {
        StreamEvent::Chunk {
            content: content.into(),
            metadata: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        StreamEvent::Error {
            message: message.into(),
        }
    }

    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Chunk { .. })
    }

    /// Encode as one wire frame.
    pub fn encode(&self) -> Bytes {
        // Serializing maps of `Value`s with string keys cannot fail.
        let json = serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","message":"Sorry, I encountered an error. Please try again."}"#
                .to_string()
        });
        Bytes::from(format!("{}{}{}", FRAME_PREFIX, json, FRAME_TERMINATOR))
    }

    /// Parse the JSON payload of one frame (without the `data: ` prefix).
    pub fn decode(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chunk_wire_shape() {
        let mut metadata = Map::new();
        metadata.insert("mode".into(), json!("socratic"));
        let frame = StreamEvent::Chunk {
            content: "Recur".into(),
            metadata: Some(metadata),
        }
        .encode();

        let text = std::str::from_utf8(&frame).unwrap();
        assert!(text.starts_with("data: {"));
        assert!(text.ends_with("}\n\n"));
        let value: Value = serde_json::from_str(text[FRAME_PREFIX.len()..].trim_end()).unwrap();
        assert_eq!(
            value,
            json!({"type": "chunk", "content": "Recur", "metadata": {"mode": "socratic"}})
        );
    }

    #[test]
    fn test_plain_chunk_omits_metadata() {
        let frame = StreamEvent::chunk("hi").encode();
        assert_eq!(&frame[..], b"data: {\"type\":\"chunk\",\"content\":\"hi\"}\n\n");
    }

    #[test]
    fn test_decode_complete_with_missing_fields() {
        let event = StreamEvent::decode(r#"{"type":"complete","suggestions":["Try an example"]}"#).unwrap();
        assert_eq!(
            event,
            StreamEvent::Complete {
                metadata: Map::new(),
                suggestions: vec!["Try an example".into()],
                next_steps: None,
            }
        );
        assert!(event.is_terminal());
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        assert!(StreamEvent::decode(r#"{"type":"ping"}"#).is_err());
        assert!(StreamEvent::decode(r#"{"type":"chunk"}"#).is_err());
    }
}
