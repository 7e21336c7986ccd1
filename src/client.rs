//! Upstream client trait and error types.

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::model::{Prompt, StreamChunk};

/// Errors that can occur while talking to the model provider.
///
/// Each variant is a distinct failure kind so the relay can decide what the
/// browser is told without inspecting provider text.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Provider unreachable, connection dropped or a 5xx status.
    #[error("Upstream unavailable: {0}")]
    Unavailable(String),

    #[error("Upstream rate limited the request")]
    RateLimited,

    /// A frame arrived that could not be decoded.
    #[error("Malformed upstream frame: {0}")]
    MalformedFrame(String),

    /// Any other non-success status (bad key, bad model, bad request).
    #[error("Upstream rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Upstream timed out")]
    Timeout,

    #[error("HTTP error: {0}")]
    Http(reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// Whether retrying the same request could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Unavailable(_) | ClientError::RateLimited)
    }

    /// Short, stable name of the failure kind for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientError::Unavailable(_) => "unavailable",
            ClientError::RateLimited => "rate_limited",
            ClientError::MalformedFrame(_) => "malformed_frame",
            ClientError::Rejected { .. } => "rejected",
            ClientError::Timeout => "timeout",
            ClientError::Http(_) => "http",
            ClientError::Config(_) => "config",
        }
    }

    /// Classify a non-success HTTP status from the provider.
    pub fn from_status(status: reqwest::StatusCode, message: String) -> Self {
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            ClientError::RateLimited
        } else if status.is_server_error() {
            ClientError::Unavailable(format!("HTTP {}: {}", status, message))
        } else {
            ClientError::Rejected {
                status: status.as_u16(),
                message,
            }
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ClientError::Timeout
        } else if e.is_connect() || e.is_request() || e.is_body() {
            ClientError::Unavailable(e.to_string())
        } else if e.is_decode() {
            ClientError::MalformedFrame(e.to_string())
        } else {
            ClientError::Http(e)
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::MalformedFrame(e.to_string())
    }
}

/// Lazy, finite, non-restartable sequence of upstream chunks.
///
/// Dropping the stream releases the upstream connection.
pub type ChunkStream = BoxStream<'static, Result<StreamChunk, ClientError>>;

/// A model provider that can stream a completion.
///
/// The relay only depends on this trait, so tests can substitute a scripted
/// upstream.
///
/// # Example
/// ```rust,ignore
/// struct Scripted(Vec<&'static str>);
///
/// #[async_trait]
/// impl ModelStream for Scripted {
///     async fn open_stream(&self, _prompt: Prompt, _options: &StreamOptions) -> Result<ChunkStream, ClientError> {
///         let chunks = self.0.iter().map(|s| Ok(StreamChunk::Delta(s.to_string()))).collect::<Vec<_>>();
///         Ok(Box::pin(futures::stream::iter(chunks)))
///     }
///
///     fn model_name(&self) -> &str { "scripted" }
/// }
/// ```
#[async_trait]
pub trait ModelStream: Send + Sync {
    /// Open one streaming completion for the given prompt.
    ///
    /// Returns once the provider has accepted the request; content arrives
    /// through the returned stream.
    async fn open_stream(
        &self,
        prompt: Prompt,
        options: &StreamOptions,
    ) -> Result<ChunkStream, ClientError>;

    /// Identifier of the model that serves the completions.
    fn model_name(&self) -> &str;
}

/// Per-request generation knobs that override the client defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}
