use anyhow::{anyhow, Context};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::options::{
    GroqModel, HttpTransport, ModelOptions, ReasoningFormat, SecretString, TransportOptions,
};
use crate::relay::RelayConfig;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub groq_api_key: SecretString,
    pub groq_base_url: Option<String>,
    pub groq_model: Option<String>,
    pub groq_proxy: Option<String>,
    pub groq_top_p: Option<f32>,
    /// `None` leaves the field out of the request, for models without reasoning.
    pub reasoning_format: Option<ReasoningFormat>,
    pub idle_timeout: Duration,
    pub history_limit: usize,
    pub max_retries: u32,
    pub connect_timeout: Duration,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8001
}

/// Parse `key` straight into its target type, so out-of-range values fail
/// instead of wrapping.
fn parse<T>(var: &impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var(key)
        .map(|value| {
            value
                .trim()
                .parse::<T>()
                .with_context(|| format!("{} has an invalid value '{}'", key, value))
        })
        .transpose()
}

impl ServerConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Read the configuration through `lookup`, which maps a variable name to its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let groq_api_key = var("GROQ_API_KEY").context("GROQ_API_KEY is not set")?;
        let port = parse(&var, "CHATRELAY_PORT")?.unwrap_or_else(default_port);

        let groq_top_p = parse::<f32>(&var, "GROQ_TOP_P")?;
        if let Some(top_p) = groq_top_p {
            if !(top_p > 0.0 && top_p <= 1.0) {
                return Err(anyhow!("GROQ_TOP_P must be in (0, 1], got {}", top_p));
            }
        }

        let reasoning_format = match var("GROQ_REASONING_FORMAT") {
            Some(value) if value.trim().eq_ignore_ascii_case("none") => None,
            Some(value) => Some(
                value
                    .parse::<ReasoningFormat>()
                    .map_err(|e| anyhow!("GROQ_REASONING_FORMAT: {}", e))?,
            ),
            None => Some(ReasoningFormat::Hidden),
        };

        Ok(Self {
            host: var("CHATRELAY_HOST").unwrap_or_else(default_host),
            port,
            groq_api_key: SecretString::new(groq_api_key),
            groq_base_url: var("GROQ_BASE_URL"),
            groq_model: var("GROQ_MODEL"),
            groq_proxy: var("GROQ_PROXY"),
            groq_top_p,
            reasoning_format,
            idle_timeout: Duration::from_secs(
                parse(&var, "CHATRELAY_IDLE_TIMEOUT_SECS")?.unwrap_or(30),
            ),
            history_limit: parse(&var, "CHATRELAY_HISTORY_LIMIT")?.unwrap_or(10),
            max_retries: parse(&var, "CHATRELAY_MAX_RETRIES")?.unwrap_or(2),
            connect_timeout: Duration::from_secs(
                parse(&var, "CHATRELAY_REQUEST_TIMEOUT_SECS")?.unwrap_or(10),
            ),
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn model_options(&self) -> ModelOptions<GroqModel> {
        let mut provider = GroqModel::new();
        if let Some(format) = self.reasoning_format {
            provider = provider.with_reasoning_format(format);
        }
        let mut options = ModelOptions::new(provider);
        if let Some(model) = &self.groq_model {
            options = options.with_model(model.clone());
        }
        if let Some(top_p) = self.groq_top_p {
            options = options.with_top_p(top_p);
        }
        options
    }

    pub fn transport_options(&self) -> TransportOptions<HttpTransport> {
        let mut transport = HttpTransport::new(self.groq_api_key.clone());
        if let Some(base_url) = &self.groq_base_url {
            transport = transport.with_base_url(base_url.clone());
        }
        if let Some(proxy) = &self.groq_proxy {
            transport = transport.with_proxy(proxy.clone());
        }
        TransportOptions::new(transport)
            .with_connect_timeout(self.connect_timeout)
            .with_max_retries(self.max_retries)
    }

    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            idle_timeout: self.idle_timeout,
            history_limit: self.history_limit,
        }
    }
}
