//! The reasoning oracle: a text-in/text-out backend used for planning and by
//! the reasoning capability.

mod openai;

pub use openai::{OpenAiOracle, OracleConfig, OracleProvider};

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::error::{FlowError, FlowResult};

/// A single oracle call.
#[derive(Debug, Clone)]
pub struct OracleRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Budget the backend should respect. The caller enforces it as well.
    pub timeout: Duration,
}

impl OracleRequest {
    pub fn new(prompt: impl Into<String>, timeout: Duration) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            temperature: 0.3,
            max_tokens: None,
            timeout,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Distinguishable oracle failure signals.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OracleError {
    #[error("unreachable: {0}")]
    Unavailable(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("authentication failed: {0}")]
    Auth(String),
}

impl From<OracleError> for FlowError {
    fn from(err: OracleError) -> Self {
        match err {
            OracleError::Unavailable(msg) => FlowError::OracleUnavailable(msg),
            OracleError::Timeout(d) => FlowError::OracleTimeout {
                timeout_ms: d.as_millis() as u64,
            },
            OracleError::Auth(msg) => FlowError::OracleAuthFailure(msg),
        }
    }
}

/// Text-in/text-out reasoning backend.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    async fn invoke(&self, request: OracleRequest) -> Result<String, OracleError>;
}

/// Invoke an oracle under the request's timeout, racing cancellation.
///
/// The timeout is enforced here regardless of whether the backend honours it.
pub async fn invoke_bounded(
    oracle: &dyn Oracle,
    request: OracleRequest,
    cancel: &CancellationToken,
) -> FlowResult<String> {
    let timeout = request.timeout;
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(FlowError::Cancelled),
        result = tokio::time::timeout(timeout, oracle.invoke(request)) => match result {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(FlowError::OracleTimeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        },
    }
}
