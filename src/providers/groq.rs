//! Groq Chat Completions client implementation.
//!
//! Groq exposes an OpenAI-compatible `/chat/completions` endpoint; streamed
//! responses arrive as SSE `data:` lines terminated by `[DONE]`.
//! See: <https://console.groq.com/docs/api-reference#chat-create>

use async_trait::async_trait;
use futures::{stream, StreamExt};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::client::{ChunkStream, ClientError, ModelStream, StreamOptions};
use crate::http::build_http_client;
use crate::model::{FinishReason, Message, Prompt, Role, StreamChunk, Usage};
use crate::options::{GroqModel, HttpTransport, ModelOptions, TransportOptions};
use crate::sse::SseStreamExt;

pub const DEFAULT_API_BASE: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_MODEL: &str = "deepseek-r1-distill-llama-70b";
const DEFAULT_TEMPERATURE: f32 = 0.7;
const DEFAULT_MAX_TOKENS: u32 = 2000;
const RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Groq client using HTTP transport.
pub struct GroqClient {
    http: reqwest::Client,
    model_options: ModelOptions<GroqModel>,
    transport_options: TransportOptions<HttpTransport>,
}

impl GroqClient {
    /// Create a new Groq client.
    ///
    /// Fails when no API key is configured or the HTTP client cannot be built.
    pub fn new(
        model_options: ModelOptions<GroqModel>,
        transport_options: TransportOptions<HttpTransport>,
    ) -> Result<Self, ClientError> {
        if transport_options.provider.api_key.is_none() {
            return Err(ClientError::Config("API key is required".to_string()));
        }
        let http = build_http_client(&transport_options).map_err(ClientError::Http)?;

        Ok(Self {
            http,
            model_options,
            transport_options,
        })
    }

    fn url(&self) -> String {
        let base = self
            .transport_options
            .provider
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_API_BASE);
        format!("{}/chat/completions", base.trim_end_matches('/'))
    }

    /// Send the request once, returning the accepted response.
    async fn send(&self, body: &GroqRequest) -> Result<reqwest::Response, ClientError> {
        let api_key = self
            .transport_options
            .provider
            .api_key
            .as_ref()
            .ok_or_else(|| ClientError::Config("API key is required".to_string()))?;

        let response = self
            .http
            .post(self.url())
            .header(AUTHORIZATION, format!("Bearer {}", api_key.expose_secret()))
            .header(CONTENT_TYPE, "application/json")
            .json(body)
            .send()
            .await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::handle_error_response(status, &body));
        }

        Ok(response)
    }

    /// Map a streamed body to content chunks.
    fn process_stream(response: reqwest::Response) -> ChunkStream {
        response
            .bytes_stream()
            .sse()
            .flat_map(|result| {
                let chunks = match result {
                    Ok(line) => match serde_json::from_str::<GroqStreamChunk>(&line) {
                        Ok(chunk) => chunk.into_chunks(),
                        Err(e) => vec![Err(ClientError::MalformedFrame(e.to_string()))],
                    },
                    Err(e) => vec![Err(e)],
                };
                stream::iter(chunks)
            })
            .boxed()
    }

    /// Handle Groq error responses.
    fn handle_error_response(status: reqwest::StatusCode, body: &str) -> ClientError {
        let message = match serde_json::from_str::<GroqErrorResponse>(body) {
            Ok(error_resp) => format!(
                "Groq error ({}): {}",
                error_resp.error.error_type.unwrap_or_default(),
                error_resp.error.message
            ),
            Err(_) => body.to_string(),
        };
        ClientError::from_status(status, message)
    }
}

#[async_trait]
impl ModelStream for GroqClient {
    async fn open_stream(
        &self,
        prompt: Prompt,
        options: &StreamOptions,
    ) -> Result<ChunkStream, ClientError> {
        let body = GroqRequest::new(prompt, &self.model_options, options);
        let max_retries = self.transport_options.max_retries;
        let mut attempt = 0;

        // Retries only happen here, before any body byte has been read.
        loop {
            match self.send(&body).await {
                Ok(response) => {
                    debug!(model = %body.model, attempt, "Upstream stream opened");
                    return Ok(Self::process_stream(response));
                }
                Err(e) if e.is_retryable() && attempt < max_retries => {
                    attempt += 1;
                    warn!(kind = e.kind(), attempt, "Upstream request failed, retrying");
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn model_name(&self) -> &str {
        self.model_options.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }
}

// --- Groq API Request/Response Types ---

#[derive(Debug, Clone, Serialize)]
struct GroqRequest {
    model: String,
    messages: Vec<GroqMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
    #[serde(flatten)]
    provider_options: GroqModel,
}

impl GroqRequest {
    fn new(prompt: Prompt, model_options: &ModelOptions<GroqModel>, overrides: &StreamOptions) -> Self {
        GroqRequest {
            model: model_options
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            messages: prompt.messages.into_iter().map(GroqMessage::from).collect(),
            temperature: overrides
                .temperature
                .or(model_options.temperature)
                .or(Some(DEFAULT_TEMPERATURE)),
            top_p: model_options.top_p,
            max_tokens: overrides
                .max_tokens
                .or(model_options.max_tokens)
                .or(Some(DEFAULT_MAX_TOKENS)),
            stream: true,
            provider_options: model_options.provider.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct GroqMessage {
    role: Role,
    content: String,
}

impl From<Message> for GroqMessage {
    fn from(msg: Message) -> Self {
        GroqMessage {
            role: msg.role,
            content: msg.content,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct GroqErrorResponse {
    error: GroqError,
}

#[derive(Debug, Clone, Deserialize)]
struct GroqError {
    #[serde(rename = "type")]
    error_type: Option<String>,
    message: String,
}

// --- Groq Streaming Response Types ---

#[derive(Debug, Deserialize)]
struct GroqStreamChunk {
    choices: Vec<GroqStreamChoice>,
    /// Groq reports usage in a vendor extension on the final chunk.
    #[serde(default)]
    x_groq: Option<GroqExtension>,
    #[serde(default)]
    usage: Option<GroqUsage>,
}

#[derive(Debug, Deserialize)]
struct GroqStreamChoice {
    #[serde(default)]
    delta: Option<GroqDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GroqDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GroqExtension {
    #[serde(default)]
    usage: Option<GroqUsage>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct GroqUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

impl From<GroqUsage> for Usage {
    fn from(u: GroqUsage) -> Self {
        Usage {
            prompt_tokens: Some(u.prompt_tokens),
            completion_tokens: Some(u.completion_tokens),
        }
    }
}

impl GroqStreamChunk {
    /// Flatten one upstream chunk into delta, usage and finish items, in that order.
    fn into_chunks(self) -> Vec<Result<StreamChunk, ClientError>> {
        let mut out = Vec::new();
        let mut finish = None;

        for choice in self.choices {
            if let Some(content) = choice.delta.and_then(|d| d.content) {
                if !content.is_empty() {
                    out.push(Ok(StreamChunk::Delta(content)));
                }
            }
            if let Some(reason) = choice.finish_reason {
                finish = Some(FinishReason::from_wire(&reason));
            }
        }

        let usage = self.usage.or(self.x_groq.and_then(|x| x.usage));
        if let Some(usage) = usage {
            out.push(Ok(StreamChunk::Usage(usage.into())));
        }
        if let Some(reason) = finish {
            out.push(Ok(StreamChunk::Finish(reason)));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::ReasoningFormat;

    #[test]
    fn test_request_defaults_and_overrides() {
        let prompt = Prompt::new("system", vec![], "hi");
        let options = ModelOptions::new(GroqModel::default());
        let body = GroqRequest::new(
            prompt,
            &options,
            &StreamOptions {
                temperature: Some(0.2),
                max_tokens: None,
            },
        );

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], DEFAULT_MODEL);
        assert_eq!(json["stream"], true);
        assert_eq!(json["max_tokens"], DEFAULT_MAX_TOKENS);
        assert!((json["temperature"].as_f64().unwrap() - 0.2).abs() < 1e-6);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
        assert!(json.get("reasoning_format").is_none());
    }

    #[test]
    fn test_request_carries_sampling_and_reasoning_options() {
        let prompt = Prompt::new("system", vec![], "hi");
        let options = ModelOptions::new(GroqModel::new().with_reasoning_format(ReasoningFormat::Hidden))
            .with_top_p(0.9);
        let body = GroqRequest::new(prompt, &options, &StreamOptions::default());

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["reasoning_format"], "hidden");
        assert!((json["top_p"].as_f64().unwrap() - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_chunk_flattening() {
        let chunk: GroqStreamChunk = serde_json::from_str(
            r#"{"id":"c1","choices":[{"index":0,"delta":{"content":"Recur"},"finish_reason":null}]}"#,
        )
        .unwrap();
        let items: Vec<_> = chunk.into_chunks().into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(items, vec![StreamChunk::Delta("Recur".into())]);

        let last: GroqStreamChunk = serde_json::from_str(
            r#"{"id":"c1","choices":[{"index":0,"delta":{},"finish_reason":"stop"}],
                "x_groq":{"usage":{"prompt_tokens":12,"completion_tokens":3,"total_tokens":15}}}"#,
        )
        .unwrap();
        let items: Vec<_> = last.into_chunks().into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(
            items,
            vec![
                StreamChunk::Usage(Usage {
                    prompt_tokens: Some(12),
                    completion_tokens: Some(3)
                }),
                StreamChunk::Finish(FinishReason::Stop),
            ]
        );
    }

    #[test]
    fn test_error_response_classification() {
        let body = r#"{"error":{"message":"Invalid API Key","type":"invalid_request_error"}}"#;
        match GroqClient::handle_error_response(reqwest::StatusCode::UNAUTHORIZED, body) {
            ClientError::Rejected { status, message } => {
                assert_eq!(status, 401);
                assert!(message.contains("Invalid API Key"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_new_requires_api_key() {
        let result = GroqClient::new(
            ModelOptions::new(GroqModel::default()),
            TransportOptions::new(HttpTransport::default()),
        );
        assert!(matches!(result, Err(ClientError::Config(_))));
    }
}
