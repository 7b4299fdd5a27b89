use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{FlowError, FlowResult};

use super::{Oracle, OracleError, OracleRequest};

/// Which OpenAI-compatible service to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OracleProvider {
    OpenAI,
    Groq,
}

impl OracleProvider {
    fn default_base_url(&self) -> &'static str {
        match self {
            OracleProvider::OpenAI => "https://api.openai.com/v1",
            OracleProvider::Groq => "https://api.groq.com/openai/v1",
        }
    }

    fn default_model(&self) -> &'static str {
        match self {
            OracleProvider::OpenAI => "gpt-4-turbo",
            OracleProvider::Groq => "mixtral-8x7b-32768",
        }
    }
}

impl std::str::FromStr for OracleProvider {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(OracleProvider::OpenAI),
            "groq" => Ok(OracleProvider::Groq),
            other => Err(FlowError::Config(format!("unknown LLM provider: {other}"))),
        }
    }
}

/// Connection settings for [`OpenAiOracle`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleConfig {
    pub provider: OracleProvider,
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Overrides the per-request temperature when set.
    #[serde(default)]
    pub temperature: Option<f32>,
}

fn default_max_tokens() -> u32 {
    2000
}

impl OracleConfig {
    pub fn new(provider: OracleProvider, api_key: impl Into<String>) -> Self {
        Self {
            provider,
            api_key: api_key.into(),
            model: provider.default_model().into(),
            base_url: provider.default_base_url().into(),
            max_tokens: default_max_tokens(),
            temperature: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Read `LLM_PROVIDER` (default `groq`) and the matching key/model vars.
    pub fn from_env() -> FlowResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> FlowResult<Self> {
        let provider: OracleProvider = lookup("LLM_PROVIDER")
            .unwrap_or_else(|| "groq".into())
            .parse()?;
        let (key_var, model_var) = match provider {
            OracleProvider::OpenAI => ("OPENAI_API_KEY", "OPENAI_MODEL"),
            OracleProvider::Groq => ("GROQ_API_KEY", "GROQ_MODEL"),
        };
        let api_key = lookup(key_var)
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                FlowError::Config(format!("{key_var} is required when LLM_PROVIDER={provider:?}"))
            })?;

        let mut config = Self::new(provider, api_key);
        if let Some(model) = lookup(model_var) {
            config.model = model;
        }
        if provider == OracleProvider::OpenAI {
            if let Some(url) = lookup("OPENAI_BASE_URL") {
                config.base_url = url;
            }
        }
        Ok(config)
    }
}

/// Oracle backed by an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiOracle {
    client: Client,
    config: OracleConfig,
}

impl OpenAiOracle {
    pub fn new(config: OracleConfig) -> FlowResult<Self> {
        if config.api_key.trim().is_empty() {
            return Err(FlowError::Config("oracle api_key is empty".into()));
        }
        Ok(Self {
            client: Client::new(),
            config,
        })
    }

    pub fn with_client(client: Client, config: OracleConfig) -> Self {
        Self { client, config }
    }

    fn build_body(&self, request: &OracleRequest) -> serde_json::Value {
        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": request.prompt}));

        json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": self.config.temperature.unwrap_or(request.temperature),
            "max_tokens": request.max_tokens.unwrap_or(self.config.max_tokens),
        })
    }
}

#[async_trait]
impl Oracle for OpenAiOracle {
    fn name(&self) -> &str {
        match self.config.provider {
            OracleProvider::OpenAI => "openai",
            OracleProvider::Groq => "groq",
        }
    }

    async fn invoke(&self, request: OracleRequest) -> Result<String, OracleError> {
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let body = self.build_body(&request);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport_error(e, &request))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &text));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| classify_transport_error(e, &request))?;

        let content = data
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .trim()
            .to_string();

        if content.is_empty() {
            return Err(OracleError::Unavailable(format!(
                "{} returned an empty completion",
                self.name()
            )));
        }

        if let Some(usage) = data.get("usage") {
            tracing::debug!(oracle = %self.name(), %usage, "oracle call finished");
        }
        Ok(content)
    }
}

fn classify_transport_error(err: reqwest::Error, request: &OracleRequest) -> OracleError {
    if err.is_timeout() {
        OracleError::Timeout(request.timeout)
    } else {
        OracleError::Unavailable(err.to_string())
    }
}

fn classify_status(status: StatusCode, body: &str) -> OracleError {
    match status.as_u16() {
        401 | 403 => OracleError::Auth(format!("HTTP {}: {body}", status.as_u16())),
        _ => OracleError::Unavailable(format!("HTTP {}: {body}", status.as_u16())),
    }
}
