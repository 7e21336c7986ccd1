//! Settings for the upstream completion call.
//!
//! [`ModelOptions`] shapes the request body (which model, how it samples),
//! [`TransportOptions`] shapes how the request travels (connect budget,
//! retries, proxy). Both carry a provider-specific part so each provider can
//! add fields without widening the common structs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// API key wrapper whose `Debug` output never shows the key.
#[derive(Clone)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(s: String) -> Self {
        Self(s)
    }

    /// The raw key, for building the `Authorization` header.
    pub fn expose_secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString([REDACTED])")
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self::new(s.to_string())
    }
}

/// Body-level settings for a completion request.
///
/// Unset fields fall back to the provider's defaults. Per-turn values in
/// [`crate::client::StreamOptions`] take precedence over `temperature` and
/// `max_tokens` here.
///
/// # Example
/// ```rust
/// use chatrelay::options::{GroqModel, ModelOptions, ReasoningFormat};
///
/// let options = ModelOptions::new(GroqModel::new().with_reasoning_format(ReasoningFormat::Hidden))
///     .with_model("deepseek-r1-distill-llama-70b")
///     .with_top_p(0.9)
///     .with_max_tokens(2000);
/// assert_eq!(options.max_tokens, Some(2000));
/// assert_eq!(options.provider.reasoning_format, Some(ReasoningFormat::Hidden));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModelOptions<T> {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    /// Nucleus sampling cutoff, sent as `top_p` when set.
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    pub provider: T,
}

impl<T> ModelOptions<T> {
    pub fn new(provider: T) -> Self {
        Self {
            model: None,
            temperature: None,
            top_p: None,
            max_tokens: None,
            provider,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// How the upstream request is carried.
#[derive(Debug, Clone)]
pub struct TransportOptions<T> {
    /// Budget for establishing the connection.
    ///
    /// Streamed bodies are not bounded here; idle detection happens per
    /// fragment in the relay.
    pub connect_timeout: Option<Duration>,

    /// Retries for a retryable failure, only before any byte is read.
    pub max_retries: u32,

    pub provider: T,
}

impl<T> TransportOptions<T> {
    /// No connect budget and no retries until configured.
    pub fn new(provider: T) -> Self {
        Self {
            connect_timeout: None,
            max_retries: 0,
            provider,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// Endpoint and credentials for an HTTP provider.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    pub api_key: Option<SecretString>,
    /// Overrides the provider's public API base, e.g. for a local mock.
    pub base_url: Option<String>,
    /// Outbound proxy for every scheme, e.g. `http://proxy.internal:3128`.
    pub proxy: Option<String>,
}

impl HttpTransport {
    pub fn new(api_key: impl Into<SecretString>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            base_url: None,
            proxy: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }
}

/// What a reasoning model does with its chain of thought.
///
/// `Raw` leaves `<think>` blocks inline in the streamed content, `Parsed`
/// moves them to a separate field and `Hidden` drops them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningFormat {
    Raw,
    Parsed,
    Hidden,
}

impl ReasoningFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningFormat::Raw => "raw",
            ReasoningFormat::Parsed => "parsed",
            ReasoningFormat::Hidden => "hidden",
        }
    }
}

impl fmt::Display for ReasoningFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReasoningFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raw" => Ok(ReasoningFormat::Raw),
            "parsed" => Ok(ReasoningFormat::Parsed),
            "hidden" => Ok(ReasoningFormat::Hidden),
            other => Err(format!(
                "unknown reasoning format '{}', expected raw, parsed or hidden",
                other
            )),
        }
    }
}

/// Groq-only body fields, flattened into the request.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GroqModel {
    /// Omitted from the request when unset; models without reasoning reject it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_format: Option<ReasoningFormat>,
}

impl GroqModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reasoning_format(mut self, format: ReasoningFormat) -> Self {
        self.reasoning_format = Some(format);
        self
    }
}
