//! HTTP capability: makes requests to external APIs.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::Method;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use crate::error::{FlowError, FlowResult};
use crate::types::{CapabilityKind, Context};

use super::{has_value, Capability, CapabilityOutput};

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_TIMEOUT_SECS: f64 = 600.0;
const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 goalflow";

/// Performs an HTTP request described by the step parameters.
///
/// Parameters: `url` (required), `method` (default GET), `headers`, `body`,
/// `timeout` in seconds. Non-2xx responses are failures that still carry
/// `{status_code, body, headers}`.
pub struct HttpCapability {
    client: reqwest::Client,
}

impl HttpCapability {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpCapability {
    fn default() -> Self {
        Self::new()
    }
}

/// Request parameters after normalizing whatever the oracle produced.
#[derive(Debug)]
struct HttpRequest {
    method: Method,
    url: String,
    headers: HeaderMap,
    body: Option<Value>,
    timeout: Duration,
}

impl HttpRequest {
    fn from_parameters(parameters: &Map<String, Value>) -> Result<Self, String> {
        let url = parameters
            .get("url")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or("Missing 'url' parameter")?
            .to_string();

        let method = parameters
            .get("method")
            .and_then(|v| v.as_str())
            .filter(|m| !m.trim().is_empty())
            .unwrap_or("GET")
            .trim()
            .to_uppercase();
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| format!("Unsupported HTTP method: {method}"))?;

        let mut headers = HeaderMap::new();
        if let Some(Value::Object(map)) = parameters.get("headers") {
            for (name, value) in map {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                let name = HeaderName::from_bytes(name.as_bytes())
                    .map_err(|_| format!("Invalid header name: {name}"))?;
                let value = HeaderValue::from_str(&value)
                    .map_err(|_| format!("Invalid value for header {}", name.as_str()))?;
                headers.insert(name, value);
            }
        }
        if !headers.contains_key(USER_AGENT) {
            headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
        }

        let body = parameters
            .get("body")
            .filter(|b| has_value(Some(b)))
            .cloned();

        let timeout = match parameters.get("timeout") {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
        .filter(|s| s.is_finite() && *s > 0.0)
        .and_then(|s| Duration::try_from_secs_f64(s.min(MAX_TIMEOUT_SECS)).ok())
        .unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS));

        Ok(Self {
            method,
            url,
            headers,
            body,
            timeout,
        })
    }

    fn sends_body(&self) -> bool {
        matches!(self.method, Method::POST | Method::PUT | Method::PATCH)
    }
}

fn header_map_to_json(headers: &HeaderMap) -> Value {
    let map: Map<String, Value> = headers
        .iter()
        .filter_map(|(k, v)| {
            v.to_str()
                .ok()
                .map(|v| (k.as_str().to_string(), Value::String(v.to_string())))
        })
        .collect();
    Value::Object(map)
}

#[async_trait]
impl Capability for HttpCapability {
    fn name(&self) -> &str {
        "http"
    }

    fn description(&self) -> &str {
        "Make HTTP requests to external APIs and URLs"
    }

    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Network
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "method": {"type": "string", "description": "HTTP method (GET, POST, PUT, DELETE, ...)"},
                "url": {"type": "string", "description": "Full URL to call"},
                "headers": {"type": "object", "description": "Optional HTTP headers"},
                "body": {"type": "object", "description": "Optional JSON body for POST, PUT, PATCH"},
                "timeout": {"type": "integer", "description": "Request timeout in seconds"}
            },
            "required": ["url"]
        })
    }

    fn required_parameters(&self) -> &[&'static str] {
        &["url"]
    }

    async fn execute(
        &self,
        parameters: &Map<String, Value>,
        _context: &mut Context,
        cancel: &CancellationToken,
    ) -> FlowResult<CapabilityOutput> {
        let request = match HttpRequest::from_parameters(parameters) {
            Ok(r) => r,
            Err(message) => return Ok(CapabilityOutput::failure(message)),
        };
        tracing::debug!(method = %request.method, url = %request.url, "http request");

        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .headers(request.headers.clone())
            .timeout(request.timeout);
        if request.sends_body() {
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }
        }

        let send = async {
            let response = builder.send().await?;
            let status = response.status();
            let headers = header_map_to_json(response.headers());
            let text = response.text().await?;
            Ok::<_, reqwest::Error>((status, headers, text))
        };

        let (status, headers, text) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FlowError::Cancelled),
            result = send => match result {
                Ok(parts) => parts,
                Err(e) if e.is_timeout() => {
                    return Err(FlowError::StepTimeout {
                        capability: self.name().to_string(),
                        timeout_ms: request.timeout.as_millis() as u64,
                    });
                }
                Err(e) => {
                    return Ok(CapabilityOutput::failure(format!("HTTP request failed: {e}")));
                }
            },
        };

        let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));
        let status_code = status.as_u16();
        let result = json!({
            "status_code": status_code,
            "body": body,
            "headers": headers,
        });

        if status.is_success() {
            Ok(CapabilityOutput::success(result))
        } else {
            let message = format!("HTTP {status_code}: {}", result["body"]);
            tracing::warn!(url = %request.url, status = status_code, "http request failed");
            Ok(CapabilityOutput::failure_with_result(message, result))
        }
    }
}
